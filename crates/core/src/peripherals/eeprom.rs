// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! EEPROM peripheral: owns `eeprom[]` (spec §3) and exposes it only through
//! ioctl, never through the data-space IO dispatch — firmware reaches it via
//! the EEAR/EEDR/EECR register protocol, which is the part of the datasheet
//! this core treats as a concrete-peripheral detail (spec §1 out-of-scope
//! list: "concrete peripheral device models"). The GDB stub and the loader's
//! persisted-EEPROM-image path both go through the ioctl surface below.

use super::ioctl_tag;
use crate::{PeripheralTickResult, Peripheral, SimResult, SimulationError};

pub const IOCTL_BULK_LOAD: u32 = ioctl_tag(*b"eeL0");
pub const IOCTL_READ_BYTE: u32 = ioctl_tag(*b"eeR0");
pub const IOCTL_WRITE_BYTE: u32 = ioctl_tag(*b"eeW0");
pub const IOCTL_SNAPSHOT: u32 = ioctl_tag(*b"eeS0");

#[derive(Debug, Clone)]
pub struct Eeprom {
    cells: Vec<u8>,
    ee_ready_vector: u8,
}

impl Eeprom {
    pub fn new(size: usize, ee_ready_vector: u8) -> Self {
        Self {
            cells: vec![0xFF; size],
            ee_ready_vector,
        }
    }

    pub fn ready_vector(&self) -> u8 {
        self.ee_ready_vector
    }
}

impl Peripheral for Eeprom {
    fn read(&self, _offset: u64) -> SimResult<u8> {
        Ok(0)
    }

    fn write(&mut self, _offset: u64, _value: u8) -> SimResult<()> {
        Ok(())
    }

    fn run(&mut self) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }

    fn reset(&mut self) {}

    fn ioctl(&mut self, code: u32, arg: &mut [u8]) -> Option<SimResult<()>> {
        if code == IOCTL_BULK_LOAD {
            let n = arg.len().min(self.cells.len());
            self.cells[..n].copy_from_slice(&arg[..n]);
            return Some(Ok(()));
        }
        if code == IOCTL_READ_BYTE && arg.len() >= 3 {
            let offset = u16::from_le_bytes([arg[0], arg[1]]) as usize;
            return Some(match self.cells.get(offset) {
                Some(&b) => {
                    arg[2] = b;
                    Ok(())
                }
                None => Err(SimulationError::MemoryViolation(offset as u64)),
            });
        }
        if code == IOCTL_WRITE_BYTE && arg.len() >= 3 {
            let offset = u16::from_le_bytes([arg[0], arg[1]]) as usize;
            return Some(match self.cells.get_mut(offset) {
                Some(slot) => {
                    *slot = arg[2];
                    Ok(())
                }
                None => Err(SimulationError::MemoryViolation(offset as u64)),
            });
        }
        None
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "cells": self.cells })
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        if let Some(cells) = state.get("cells").and_then(|v| v.as_array()) {
            for (slot, value) in self.cells.iter_mut().zip(cells) {
                *slot = value.as_u64().unwrap_or(0xFF) as u8;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_load_then_byte_read() {
        let mut ee = Eeprom::new(4, 23);
        let mut image = vec![1, 2, 3, 4];
        ee.ioctl(IOCTL_BULK_LOAD, &mut image).unwrap().unwrap();
        let mut arg = [2u8, 0, 0];
        ee.ioctl(IOCTL_READ_BYTE, &mut arg).unwrap().unwrap();
        assert_eq!(arg[2], 3);
    }

    #[test]
    fn unprogrammed_eeprom_reads_0xff() {
        let ee = Eeprom::new(4, 23);
        assert_eq!(ee.cells[0], 0xFF);
    }
}
