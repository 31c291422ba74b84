// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

/// A contiguous chunk of bytes destined for flash at `start_addr` (a byte,
/// not word, address — the loader already expanded words to bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u64,
    pub data: Vec<u8>,
}

/// Reduced firmware shape the core consumes from the external loader
/// (spec §6). `mcu_name`/`f_cpu` select the variant and clock via C8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramImage {
    pub flash: Segment,
    pub eeprom: Option<Vec<u8>>,
    pub mcu_name: String,
    pub f_cpu: u32,
    pub symbols: Option<std::collections::HashMap<u32, String>>,
}

impl ProgramImage {
    pub fn new(mcu_name: impl Into<String>, f_cpu: u32, flash_bytes: Vec<u8>) -> Self {
        Self {
            flash: Segment {
                start_addr: 0,
                data: flash_bytes,
            },
            eeprom: None,
            mcu_name: mcu_name.into(),
            f_cpu,
            symbols: None,
        }
    }
}

/// A flat byte-addressed memory region with a fill byte applied at
/// construction (flash is unprogrammed `0xFF`, data starts `0x00`).
#[derive(Debug, Clone)]
pub struct LinearMemory {
    pub data: Vec<u8>,
}

impl LinearMemory {
    pub fn new(size: usize, fill: u8) -> Self {
        Self {
            data: vec![fill; size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_u8(&self, addr: u64) -> Option<u8> {
        self.data.get(addr as usize).copied()
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> bool {
        match self.data.get_mut(addr as usize) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Loads `segment` if it fits entirely within this region, leaving
    /// everything outside the segment untouched.
    pub fn load_from_segment(&mut self, segment: &Segment) -> bool {
        let end = segment.start_addr + segment.data.len() as u64;
        if end > self.data.len() as u64 {
            return false;
        }
        let offset = segment.start_addr as usize;
        self.data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        true
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_fills_unprogrammed_with_0xff() {
        let mem = LinearMemory::new(1024, 0xFF);
        assert_eq!(mem.read_u8(0), Some(0xFF));
        assert_eq!(mem.read_u8(1023), Some(0xFF));
        assert_eq!(mem.read_u8(1024), None);
    }

    #[test]
    fn data_fills_zero() {
        let mem = LinearMemory::new(2048, 0x00);
        assert_eq!(mem.read_u8(0), Some(0));
    }

    #[test]
    fn load_from_segment_rejects_overflow() {
        let mut mem = LinearMemory::new(4, 0xFF);
        let fits = Segment {
            start_addr: 2,
            data: vec![1, 2],
        };
        assert!(mem.load_from_segment(&fits));
        assert_eq!(mem.read_u8(2), Some(1));

        let overflow = Segment {
            start_addr: 3,
            data: vec![1, 2],
        };
        assert!(!mem.load_from_segment(&overflow));
        assert_eq!(mem.read_u8(3), Some(1), "rejected load must not partially write");
    }
}
