// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! TWI (two-wire / I2C) peripheral: framework surface only. `avr_twi.c`'s
//! slave/master state machine body is entirely `#if 0`'d out in the
//! original — spec.md §9 flags this as an open question resolved in favor
//! of exposing the register/ioctl/IRQ framework without guessing at the
//! bit-level protocol. `TWDR` reads and writes land here inert; the
//! `IOCTL_MASTER_SEND`/`IOCTL_SLAVE_RECV` codes exist so a host-side model
//! can drive the wire protocol from outside this core, the same way the
//! UART bridge in `usart.rs` is driven from outside.

use super::ioctl_tag;
use crate::{PeripheralTickResult, Peripheral, SimResult, SimulationError};

pub const IOCTL_MASTER_SEND: u32 = ioctl_tag(*b"twiS");
pub const IOCTL_SLAVE_RECV: u32 = ioctl_tag(*b"twiR");

const TWBR: u64 = 0;
const TWSR: u64 = 1;
const TWAR: u64 = 2;
const TWDR: u64 = 3;
const TWCR: u64 = 4;

#[derive(Debug, Default, Clone)]
pub struct Twi {
    twbr: u8,
    twsr: u8,
    twar: u8,
    twdr: u8,
    twcr: u8,
    vector: u8,
}

impl Twi {
    pub fn new(vector: u8) -> Self {
        Self {
            vector,
            ..Default::default()
        }
    }
}

impl Peripheral for Twi {
    fn read(&self, offset: u64) -> SimResult<u8> {
        Ok(match offset {
            TWBR => self.twbr,
            TWSR => self.twsr,
            TWAR => self.twar,
            TWDR => self.twdr,
            TWCR => self.twcr,
            _ => 0,
        })
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        match offset {
            TWBR => self.twbr = value,
            TWSR => self.twsr = value,
            TWAR => self.twar = value,
            TWDR => self.twdr = value,
            TWCR => self.twcr = value,
            _ => {}
        }
        Ok(())
    }

    fn run(&mut self) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }

    fn reset(&mut self) {
        let vector = self.vector;
        *self = Twi::new(vector);
    }

    fn ioctl(&mut self, code: u32, _arg: &mut [u8]) -> Option<SimResult<()>> {
        if code == IOCTL_MASTER_SEND || code == IOCTL_SLAVE_RECV {
            return Some(Err(SimulationError::Unimplemented(
                "TWI bit-level protocol is deferred; framework surface only",
            )));
        }
        None
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "twbr": self.twbr, "twsr": self.twsr, "twar": self.twar, "twdr": self.twdr, "twcr": self.twcr })
    }
}
