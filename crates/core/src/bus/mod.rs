// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The data-space bus (C3) plus the peripheral chain it dispatches into
//! (C7) and the cycle timer queue that drains alongside it (C4).

use crate::interrupt::InterruptController;
use crate::irq::IrqBus;
use crate::memory::LinearMemory;
use crate::timers::CycleTimerQueue;
use crate::{Bus, Peripheral, SimResult, SimulationConfig, SimulationError};

pub struct PeripheralEntry {
    pub name: String,
    pub io_base: u16,
    pub io_size: u16,
    pub dev: Box<dyn Peripheral>,
}

/// GDB's flat address space (spec §4.9): flash below 0x10000, data RAM from
/// 0x800000, EEPROM from 0x810000.
pub const GDB_DATA_BASE: u32 = 0x0080_0000;
pub const GDB_EEPROM_BASE: u32 = 0x0081_0000;

pub struct SystemBus {
    pub flash: LinearMemory,
    pub data: LinearMemory,
    pub ramend: u16,
    pub peripherals: Vec<PeripheralEntry>,
    /// Index into `peripherals` for each IO-space address, `None` when no
    /// handler is registered and the default data-space store/load applies.
    ior: Vec<Option<usize>>,
    iow: Vec<Option<usize>>,
    pub irq: IrqBus,
    pub timers: CycleTimerQueue,
    pub interrupts: InterruptController,
    pub cycle: u64,
    pub firmware_sha256: Option<String>,
    /// Words per interrupt vector table entry (spec §4.6: `pc = vector *
    /// vector_size`). 2 on parts whose vector table reserves a full `JMP`
    /// per entry (e.g. ATmega328P), 1 on parts small enough for `RJMP`
    /// (e.g. ATtiny85); set by the MCU factory, defaults to 1.
    pub vector_size: u32,
    config: SimulationConfig,
}

impl SystemBus {
    /// `ramend` is the last valid data-space address; `io_end` is the first
    /// SRAM address (32 general registers + IO + extended IO).
    pub fn new(ramend: u16, io_end: u16, config: SimulationConfig) -> Self {
        let io_slots = (io_end - 32) as usize;
        Self {
            flash: LinearMemory::new(0, 0xFF),
            data: LinearMemory::new(ramend as usize + 1, 0x00),
            ramend,
            peripherals: Vec::new(),
            ior: vec![None; io_slots],
            iow: vec![None; io_slots],
            irq: IrqBus::new(),
            timers: CycleTimerQueue::new(),
            interrupts: InterruptController::new(),
            cycle: 0,
            firmware_sha256: None,
            vector_size: 1,
            config,
        }
    }

    pub fn set_flash_size(&mut self, size: usize) {
        self.flash = LinearMemory::new(size, 0xFF);
    }

    /// Registers a peripheral and claims `[io_base, io_base + io_size)` in
    /// the IO dispatch tables. A peripheral with no addressable registers
    /// (a pure host-side model, spec §3 invariant) may pass `io_size = 0`.
    pub fn register_peripheral(
        &mut self,
        name: impl Into<String>,
        io_base: u16,
        io_size: u16,
        dev: Box<dyn Peripheral>,
    ) {
        let index = self.peripherals.len();
        self.peripherals.push(PeripheralEntry {
            name: name.into(),
            io_base,
            io_size,
            dev,
        });
        for addr in io_base..io_base + io_size {
            let slot = (addr - 32) as usize;
            if slot < self.ior.len() {
                self.ior[slot] = Some(index);
                self.iow[slot] = Some(index);
            }
        }
    }

    pub fn peripheral_mut(&mut self, name: &str) -> Option<&mut dyn Peripheral> {
        self.peripherals
            .iter_mut()
            .find(|p| p.name == name)
            .map(|p| p.dev.as_mut())
    }

    /// Routes a bulk EEPROM image to the peripheral named `"eeprom"` via the
    /// ioctl bulk-load convention in `peripherals::eeprom`.
    pub fn load_eeprom(&mut self, bytes: &[u8]) {
        if let Some(p) = self.peripheral_mut("eeprom") {
            let mut buf = bytes.to_vec();
            let _ = p.ioctl(crate::peripherals::eeprom::IOCTL_BULK_LOAD, &mut buf);
        }
    }

    pub fn reset_peripherals(&mut self) {
        for p in &mut self.peripherals {
            p.dev.reset();
        }
    }

    /// Walks the peripheral chain looking for the first handler of `code`
    /// (spec §4.7: "lookup walks the chain until a handler returns success").
    pub fn ioctl(&mut self, code: u32, arg: &mut [u8]) -> Option<SimResult<()>> {
        for p in &mut self.peripherals {
            if let Some(result) = p.dev.ioctl(code, arg) {
                return Some(result);
            }
        }
        None
    }

    fn io_range(&self) -> std::ops::Range<u16> {
        32..(32 + self.ior.len() as u16)
    }

    /// GDB-space read/write (spec §4.9 address routing), used by the debug
    /// stub and `DebugControl::read_memory`/`write_memory`.
    pub fn read_gdb_byte(&self, addr: u32) -> SimResult<u8> {
        if addr < 0x10000 {
            self.flash
                .read_u8(addr as u64)
                .ok_or(SimulationError::MemoryViolation(addr as u64))
        } else if addr >= GDB_EEPROM_BASE {
            Err(SimulationError::Unimplemented(
                "EEPROM GDB read routes through ioctl; no immutable path",
            ))
        } else if addr >= GDB_DATA_BASE {
            let data_addr = (addr - GDB_DATA_BASE) as u16;
            self.read_u8(data_addr)
        } else {
            Err(SimulationError::MemoryViolation(addr as u64))
        }
    }

    pub fn write_gdb_byte(&mut self, addr: u32, value: u8) -> SimResult<()> {
        if addr < 0x10000 {
            if !self.flash.write_u8(addr as u64, value) {
                return Err(SimulationError::MemoryViolation(addr as u64));
            }
            Ok(())
        } else if addr >= GDB_EEPROM_BASE {
            let offset = addr - GDB_EEPROM_BASE;
            let mut arg = [(offset & 0xFF) as u8, (offset >> 8) as u8, value];
            match self.ioctl(crate::peripherals::eeprom::IOCTL_WRITE_BYTE, &mut arg) {
                Some(r) => r,
                None => Err(SimulationError::Unimplemented("no eeprom peripheral attached")),
            }
        } else if addr >= GDB_DATA_BASE {
            let data_addr = (addr - GDB_DATA_BASE) as u16;
            self.write_u8(data_addr, value)
        } else {
            Err(SimulationError::MemoryViolation(addr as u64))
        }
    }
}

impl Bus for SystemBus {
    fn read_u8(&self, addr: u16) -> SimResult<u8> {
        if addr > self.ramend {
            return Err(SimulationError::MemoryViolation(addr as u64));
        }
        if self.io_range().contains(&addr) {
            let slot = (addr - 32) as usize;
            if let Some(index) = self.ior[slot] {
                let entry = &self.peripherals[index];
                return entry.dev.read((addr - entry.io_base) as u64);
            }
        }
        self.data
            .read_u8(addr as u64)
            .ok_or(SimulationError::MemoryViolation(addr as u64))
    }

    fn write_u8(&mut self, addr: u16, value: u8) -> SimResult<()> {
        if addr > self.ramend {
            return Err(SimulationError::MemoryViolation(addr as u64));
        }
        if self.io_range().contains(&addr) {
            let slot = (addr - 32) as usize;
            if let Some(index) = self.iow[slot] {
                let entry = &mut self.peripherals[index];
                let offset = (addr - entry.io_base) as u64;
                return entry.dev.write(offset, value);
            }
        }
        self.data.write_u8(addr as u64, value);
        Ok(())
    }

    /// Runs every peripheral's `run()` in registration order, then drains
    /// the cycle timer queue (spec §4.4, §5 ordering guarantee).
    fn tick_peripherals(&mut self, cycle: u64) -> Vec<u8> {
        let mut raised = Vec::new();
        for p in &mut self.peripherals {
            let result = p.dev.run();
            raised.extend(result.raised_vectors);
        }
        let _due = self.timers.drain_due(cycle);
        raised
    }

    fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulationConfig;

    #[derive(Debug, Default)]
    struct Echo(u8);
    impl Peripheral for Echo {
        fn read(&self, _offset: u64) -> SimResult<u8> {
            Ok(self.0)
        }
        fn write(&mut self, _offset: u64, value: u8) -> SimResult<()> {
            self.0 = value;
            Ok(())
        }
    }

    #[test]
    fn unhandled_io_address_falls_back_to_data_space() {
        let mut bus = SystemBus::new(0x08FF, 0x100, SimulationConfig::default());
        bus.write_u8(0x40, 7).unwrap();
        assert_eq!(bus.read_u8(0x40).unwrap(), 7);
    }

    #[test]
    fn registered_handler_overrides_data_space() {
        let mut bus = SystemBus::new(0x08FF, 0x100, SimulationConfig::default());
        bus.register_peripheral("echo", 0x40, 1, Box::new(Echo::default()));
        bus.write_u8(0x40, 9).unwrap();
        assert_eq!(bus.read_u8(0x40).unwrap(), 9);
        // the handler, not the raw data array, owns the byte.
        assert_eq!(bus.data.read_u8(0x40), Some(0));
    }

    #[test]
    fn write_above_ramend_is_a_violation() {
        let mut bus = SystemBus::new(0x08FF, 0x100, SimulationConfig::default());
        assert!(bus.write_u8(0x0900, 1).is_err());
    }
}
