// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! A GPIO port: PIN/DDR/PORT triplet plus pin-change interrupt, matching the
//! `.portb`/`.portc`/`.portd` shape in `sim_megax8.h` (`r_port`, `r_ddr`,
//! `r_pin`, plus a `pcint` enable/raised/vector selector). Electrical
//! behavior of individual pins (what drives PIN when DDR says input) is a
//! host-side model's job — spec.md §1 leaves "concrete peripheral device
//! models" out of scope; this type only keeps the three registers
//! consistent and exposes a pin-change IRQ line external models can drive.

use crate::{PeripheralTickResult, Peripheral, SimResult};

const PIN: u64 = 0;
const DDR: u64 = 1;
const PORT: u64 = 2;

#[derive(Debug, Clone)]
pub struct GpioPort {
    pin: u8,
    ddr: u8,
    port: u8,
    pcint_vector: u8,
    pcint_enabled: bool,
    pcint_mask: u8,
    last_pin: u8,
}

impl GpioPort {
    pub fn new(pcint_vector: u8) -> Self {
        Self {
            pin: 0,
            ddr: 0,
            port: 0,
            pcint_vector,
            pcint_enabled: false,
            pcint_mask: 0,
            last_pin: 0,
        }
    }

    /// Drives input pins from an external host-side model (pty, test
    /// harness). Output pins (`ddr` bit set) are unaffected: the external
    /// model observes them through `port`, not `drive_inputs`.
    pub fn drive_inputs(&mut self, levels: u8) {
        self.pin = (self.pin & self.ddr) | (levels & !self.ddr);
    }

    pub fn set_pcint_enable(&mut self, enabled: bool, mask: u8) {
        self.pcint_enabled = enabled;
        self.pcint_mask = mask;
    }

    pub fn output_levels(&self) -> u8 {
        self.port & self.ddr
    }
}

impl Peripheral for GpioPort {
    fn read(&self, offset: u64) -> SimResult<u8> {
        Ok(match offset {
            PIN => self.pin,
            DDR => self.ddr,
            PORT => self.port,
            _ => 0,
        })
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        match offset {
            // Writing PIN toggles the corresponding PORT bits on real AVR
            // hardware (the "toggle on PINx write" feature).
            PIN => self.port ^= value,
            DDR => self.ddr = value,
            PORT => self.port = value,
            _ => {}
        }
        Ok(())
    }

    fn run(&mut self) -> PeripheralTickResult {
        if self.pcint_enabled {
            let changed = (self.pin ^ self.last_pin) & self.pcint_mask;
            self.last_pin = self.pin;
            if changed != 0 {
                return PeripheralTickResult {
                    raised_vectors: vec![self.pcint_vector],
                    extra_cycles: 0,
                };
            }
        } else {
            self.last_pin = self.pin;
        }
        PeripheralTickResult::default()
    }

    fn reset(&mut self) {
        self.ddr = 0;
        self.port = 0;
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "pin": self.pin, "ddr": self.ddr, "port": self.port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_write_toggles_port() {
        let mut p = GpioPort::new(3);
        p.write(PORT, 0b0000_0001).unwrap();
        p.write(PIN, 0b0000_0001).unwrap();
        assert_eq!(p.read(PORT).unwrap(), 0b0000_0000);
    }

    #[test]
    fn output_levels_mask_by_ddr() {
        let mut p = GpioPort::new(3);
        p.write(DDR, 0b0000_0011).unwrap();
        p.write(PORT, 0b0000_1111).unwrap();
        assert_eq!(p.output_levels(), 0b0000_0011);
    }
}
