// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The MCU factory (C8): two named variants, `atmega328p` and `attiny85`,
//! shaped after `sim_megax8.h` and `sim_tinyx5.h` respectively. Each variant
//! is a fixed flash/ram/eeprom size plus a fixed peripheral wiring; there is
//! no generic "build your own chip" path, matching how `sim_megax8.h`/
//! `sim_tinyx5.h` are themselves hand-written per-chip shapes rather than a
//! data-driven chip description. Register addresses below are this core's
//! own simplified IO map rather than a byte-exact copy of the datasheet's —
//! concrete peripheral/datasheet fidelity is explicitly out of scope (spec's
//! "concrete peripheral device model" exclusion); what is preserved exactly
//! is each chip's *shape*: which peripherals exist and which vector numbers
//! they raise.

use std::sync::{Arc, Mutex};

use crate::bus::SystemBus;
use crate::cpu::avr::Avr;
use crate::peripherals::{eeprom::Eeprom, gpio::GpioPort, timer0::Timer0, twi::Twi, usart::Usart0};
use crate::{Machine, Peripheral, SimResult, SimulationConfig};

/// Vector numbers this factory wires up. Real silicon assigns many more;
/// only the peripherals this core models get a slot.
pub mod vectors {
    pub const PCINT0: u8 = 3;
    pub const PCINT1: u8 = 4;
    pub const PCINT2: u8 = 5;
    pub const TIMER0_OVF: u8 = 16;
    pub const USART_RXC: u8 = 18;
    pub const USART_TXC: u8 = 19;
    pub const USART_UDRE: u8 = 20;
    pub const EE_READY: u8 = 22;
    pub const TWI: u8 = 24;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuVariant {
    Atmega328p,
    Attiny85,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown MCU variant {0:?}")]
pub struct UnknownMcu(pub String);

impl McuVariant {
    pub fn from_name(name: &str) -> Result<Self, UnknownMcu> {
        match name.to_ascii_lowercase().as_str() {
            "atmega328p" | "atmega328" => Ok(McuVariant::Atmega328p),
            "attiny85" | "attiny85v" => Ok(McuVariant::Attiny85),
            other => Err(UnknownMcu(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            McuVariant::Atmega328p => "atmega328p",
            McuVariant::Attiny85 => "attiny85",
        }
    }

    pub fn flash_size(self) -> usize {
        match self {
            McuVariant::Atmega328p => 32 * 1024,
            McuVariant::Attiny85 => 8 * 1024,
        }
    }

    pub fn ramend(self) -> u16 {
        match self {
            McuVariant::Atmega328p => 0x08FF,
            McuVariant::Attiny85 => 0x025F,
        }
    }

    pub fn io_end(self) -> u16 {
        match self {
            McuVariant::Atmega328p => 0x0100,
            McuVariant::Attiny85 => 0x0060,
        }
    }

    pub fn eeprom_size(self) -> usize {
        match self {
            McuVariant::Atmega328p => 1024,
            McuVariant::Attiny85 => 512,
        }
    }

    /// Words per interrupt vector table entry (`sim_megax8.h`'s two-word
    /// `JMP` vectors vs. `sim_tinyx5.h`'s one-word `RJMP` vectors).
    pub fn vector_size(self) -> u32 {
        match self {
            McuVariant::Atmega328p => 2,
            McuVariant::Attiny85 => 1,
        }
    }
}

struct Timer0Primary(Arc<Mutex<Timer0>>);
impl std::fmt::Debug for Timer0Primary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Timer0Primary").finish()
    }
}
impl Peripheral for Timer0Primary {
    fn read(&self, offset: u64) -> SimResult<u8> {
        self.0.lock().unwrap().read(offset)
    }
    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        self.0.lock().unwrap().write(offset, value)
    }
    fn run(&mut self) -> crate::PeripheralTickResult {
        self.0.lock().unwrap().run()
    }
    fn reset(&mut self) {
        self.0.lock().unwrap().reset();
    }
    fn snapshot(&self) -> serde_json::Value {
        self.0.lock().unwrap().snapshot()
    }
}

struct Timer0Control(Arc<Mutex<Timer0>>);
impl std::fmt::Debug for Timer0Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Timer0Control").finish()
    }
}
impl Peripheral for Timer0Control {
    fn read(&self, offset: u64) -> SimResult<u8> {
        Ok(self.0.lock().unwrap().read_control(offset))
    }
    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        self.0.lock().unwrap().write_control(offset, value);
        Ok(())
    }
}

fn wire_timer0(bus: &mut SystemBus, main_base: u16, control_base: u16, overflow_vector: u8) {
    let timer = Arc::new(Mutex::new(Timer0::new(overflow_vector)));
    bus.register_peripheral("timer0", main_base, 5, Box::new(Timer0Primary(timer.clone())));
    bus.register_peripheral("timer0.control", control_base, 2, Box::new(Timer0Control(timer)));
}

/// Builds a `Machine<Avr>` for the named variant. Firmware still has to be
/// loaded and the machine reset before it is runnable (spec §6).
pub fn make_by_name(name: &str, config: SimulationConfig) -> Result<Machine<Avr>, UnknownMcu> {
    let variant = McuVariant::from_name(name)?;
    Ok(make(variant, config))
}

pub fn make(variant: McuVariant, config: SimulationConfig) -> Machine<Avr> {
    let mut bus = SystemBus::new(variant.ramend(), variant.io_end(), config.clone());
    bus.set_flash_size(variant.flash_size());
    bus.vector_size = variant.vector_size();

    bus.register_peripheral("eeprom", 0, 0, Box::new(Eeprom::new(variant.eeprom_size(), vectors::EE_READY)));

    match variant {
        McuVariant::Atmega328p => {
            bus.register_peripheral("portb", 0x23, 3, Box::new(GpioPort::new(vectors::PCINT0)));
            bus.register_peripheral("portc", 0x26, 3, Box::new(GpioPort::new(vectors::PCINT1)));
            bus.register_peripheral("portd", 0x29, 3, Box::new(GpioPort::new(vectors::PCINT2)));
            wire_timer0(&mut bus, 0x44, 0x6E, vectors::TIMER0_OVF);
            bus.register_peripheral(
                "usart0",
                0xC0,
                4,
                Box::new(Usart0::new(vectors::USART_RXC, vectors::USART_TXC, vectors::USART_UDRE)),
            );
            bus.register_peripheral("twi", 0xB8, 5, Box::new(Twi::new(vectors::TWI)));
        }
        McuVariant::Attiny85 => {
            bus.register_peripheral("portb", 0x36, 3, Box::new(GpioPort::new(vectors::PCINT0)));
            wire_timer0(&mut bus, 0x52, 0x58, vectors::TIMER0_OVF);
        }
    }

    Machine::new(Avr::new(), bus, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atmega328p_has_expected_memory_shape() {
        let machine = make(McuVariant::Atmega328p, SimulationConfig::default());
        assert_eq!(machine.bus.ramend, 0x08FF);
        assert_eq!(machine.bus.flash.len(), 32 * 1024);
    }

    #[test]
    fn attiny85_omits_usart_and_twi() {
        let machine = make(McuVariant::Attiny85, SimulationConfig::default());
        assert!(machine.bus.peripherals.iter().all(|p| p.name != "usart0" && p.name != "twi"));
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(McuVariant::from_name("msp430").is_err());
    }
}
