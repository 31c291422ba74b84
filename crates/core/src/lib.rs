// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod interrupt;
pub mod irq;
pub mod memory;
pub mod peripherals;
pub mod regbit;
pub mod snapshot;
pub mod system;
pub mod timers;

pub use config::SimulationConfig;

use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Arch {
    Avr,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("unknown opcode {0:#06x} at flash word {1:#x}")]
    DecodeError(u16, u32),
    #[error("stack pointer {0:#x} left the [32, ramend] window")]
    StackViolation(u32),
    #[error("peripheral deadlock: sleeping with interrupts globally disabled")]
    SleepDeadlock,
    #[error("simulation halted")]
    Halt,
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),
    #[error("simulation error: {0}")]
    Other(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// SHA-256 of a flash image, used to tag snapshots with the firmware they
/// were taken against (spec §6) so a restore against different firmware can
/// be rejected instead of silently producing garbage.
pub fn firmware_digest(flash: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(flash);
    format!("{:x}", hasher.finalize())
}

/// Result of a peripheral's per-instruction `run`/`tick`.
#[derive(Debug, Clone, Default)]
pub struct PeripheralTickResult {
    /// Vector numbers this peripheral wants raised as a result of the tick.
    pub raised_vectors: Vec<u8>,
    /// Cycles to burn beyond the normal one (rare; most peripherals are free).
    pub extra_cycles: u32,
}

/// Observes simulation events without participating in them.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_step_start(&self, _pc_words: u32, _opcode: u16) {}
    fn on_step_end(&self, _cycles: u32) {}
    fn on_memory_write(&self, _addr: u64, _old: u8, _new: u8) {}
    fn on_peripheral_tick(&self, _name: &str, _cycles: u32) {}
    fn on_crash(&self, _pc_words: u32, _reason: &str) {}
}

/// One simulated MCU core. The workspace currently has a single implementation
/// (`cpu::avr::Avr`); the trait is kept generic the way the rest of this
/// codebase keeps its seams as trait objects rather than hardcoding the one
/// architecture it ships today.
pub trait Cpu: Send {
    fn reset(&mut self, bus: &mut dyn Bus) -> SimResult<()>;

    /// Runs exactly one `run_one` tick: fetch, decode, execute, flag
    /// materialize, peripheral run, cycle-timer drain, interrupt service.
    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
        config: &SimulationConfig,
    ) -> SimResult<()>;

    fn step_batch(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
        config: &SimulationConfig,
        max_count: u32,
    ) -> SimResult<u32> {
        for i in 0..max_count {
            if matches!(self.run_state(), RunState::Crashed | RunState::Done) {
                return Ok(i);
            }
            self.step(bus, observers, config)?;
        }
        Ok(max_count)
    }

    fn set_pc(&mut self, pc_words: u32);
    fn get_pc(&self) -> u32;
    fn set_sp(&mut self, sp: u16);
    fn get_sp(&self) -> u16;
    fn run_state(&self) -> RunState;
    fn set_run_state(&mut self, state: RunState);

    /// Raises interrupt vector `vec` (sets `raised`, and if enabled, `pending`).
    fn raise_interrupt(&mut self, vec: u8);

    // Debug access. Register ids follow the GDB numbering in §4.9:
    // 0-31 = R0-R31, 32 = SREG, 33 = SP, 34 = PC.
    fn get_register(&self, id: u8) -> u32;
    fn set_register(&mut self, id: u8, val: u32);
    fn snapshot(&self) -> snapshot::CpuSnapshot;
    fn apply_snapshot(&mut self, snapshot: &snapshot::CpuSnapshot);
    fn get_register_names(&self) -> Vec<String>;
    fn index_of_register(&self, name: &str) -> Option<u8>;
    fn recent_pcs(&self) -> &[u32];
}

/// MCU run state (spec §3 "state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Limbo,
    Stopped,
    Running,
    Sleeping,
    Step,
    StepDone,
    Done,
    Crashed,
}

/// A memory-mapped peripheral participating in the bus's IO dispatch (C3)
/// and the peripheral framework (C7).
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u64) -> SimResult<u8>;
    fn write(&mut self, offset: u64, value: u8) -> SimResult<()>;

    /// Side-effect-free probe for the debugger/observers.
    fn peek(&self, _offset: u64) -> Option<u8> {
        None
    }

    /// Called once per instruction, in registration order, after the
    /// instruction's own effects are committed (spec §5 ordering).
    fn run(&mut self) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }

    fn reset(&mut self) {}

    /// Tagged command dispatch (spec §4.7). Returns `None` if this
    /// peripheral does not recognize `code`.
    fn ioctl(&mut self, _code: u32, _arg: &mut [u8]) -> Option<SimResult<()>> {
        None
    }

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
    fn restore(&mut self, _state: serde_json::Value) -> SimResult<()> {
        Ok(())
    }
}

/// The data-space bus: flat byte space over regs + IO + extended IO + SRAM,
/// with per-address handler override (C3) and the peripheral chain (C7).
pub trait Bus {
    fn read_u8(&self, addr: u16) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u16, value: u8) -> SimResult<()>;

    /// Runs every peripheral's `run()` in registration order, then drains the
    /// cycle-timer queue (C4). Returns vector numbers peripherals want raised.
    fn tick_peripherals(&mut self, cycle: u64) -> Vec<u8>;

    fn config(&self) -> &SimulationConfig;
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }

    fn read_u16(&self, addr: u16) -> SimResult<u16> {
        let lo = self.read_u8(addr)? as u16;
        let hi = self.read_u8(addr + 1)? as u16;
        Ok(lo | (hi << 8))
    }

    fn write_u16(&mut self, addr: u16, value: u16) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, (value >> 8) as u8)?;
        Ok(())
    }
}

use std::collections::HashSet;

/// Ceiling on simultaneously-armed software breakpoints (spec §4.9).
pub const MAX_BREAKPOINTS: usize = 32;

/// The GDB-facing control surface (C9 drives the CPU exclusively through
/// this trait; it never reaches into `Avr`/`SystemBus` fields directly).
pub trait DebugControl {
    /// Returns `false` (table full, already at `MAX_BREAKPOINTS`) without
    /// inserting when the address isn't already armed.
    fn add_breakpoint(&mut self, addr_words: u32) -> bool;
    fn remove_breakpoint(&mut self, addr_words: u32);
    fn clear_breakpoints(&mut self);

    fn run(&mut self, max_steps: Option<u32>) -> SimResult<StopReason>;
    fn step_single(&mut self) -> SimResult<StopReason>;

    fn read_core_reg(&self, id: u8) -> u32;
    fn write_core_reg(&mut self, id: u8, val: u32);

    /// `addr` is a flat address in the GDB address space described in
    /// §4.9 (`< 0x10000` flash, `>= 0x800000` data, `>= 0x810000` EEPROM).
    fn read_memory(&self, addr: u32, len: usize) -> SimResult<Vec<u8>>;
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()>;

    fn get_pc(&self) -> u32;
    fn set_pc(&mut self, pc_words: u32);
    fn get_register_names(&self) -> Vec<String>;
    fn get_cycle_count(&self) -> u64;
    fn run_state(&self) -> RunState;
    fn reset(&mut self) -> SimResult<()>;

    fn snapshot(&self) -> snapshot::MachineSnapshot;
    fn restore(&mut self, snapshot: &snapshot::MachineSnapshot) -> SimResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint(u32),
    StepDone,
    MaxStepsReached,
    Crashed,
    ManualStop,
}

pub struct Machine<C: Cpu> {
    pub cpu: C,
    pub bus: bus::SystemBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,

    pub breakpoints: HashSet<u32>,
    last_breakpoint: Option<u32>,
    pub total_cycles: u64,
    pub config: SimulationConfig,
}

impl<C: Cpu> Machine<C> {
    pub fn new(cpu: C, bus: bus::SystemBus, config: SimulationConfig) -> Self {
        Self {
            cpu,
            bus,
            observers: Vec::new(),
            breakpoints: HashSet::new(),
            last_breakpoint: None,
            total_cycles: 0,
            config,
        }
    }

    /// Loads a flash image (and optional EEPROM image) and resets the MCU.
    pub fn load_firmware(&mut self, image: &memory::ProgramImage) -> SimResult<()> {
        if !self.bus.flash.load_from_segment(&image.flash) {
            return Err(SimulationError::Other(
                "firmware image does not fit in flash".into(),
            ));
        }
        if let Some(eeprom) = &image.eeprom {
            self.bus.load_eeprom(eeprom);
        }
        self.bus.firmware_sha256 = Some(firmware_digest(&self.bus.flash.data));
        for observer in &self.observers {
            observer.on_simulation_start();
        }
        self.reset()
    }

    pub fn reset(&mut self) -> SimResult<()> {
        self.cpu.reset(&mut self.bus)
    }

    pub fn step(&mut self) -> SimResult<()> {
        self.cpu.step(&mut self.bus, &self.observers, &self.config)?;
        self.total_cycles = self.bus.cycle;
        Ok(())
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            cpu: self.cpu.snapshot(),
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot()))
                .collect(),
            firmware_sha256: self.bus.firmware_sha256.clone(),
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: &snapshot::MachineSnapshot) -> SimResult<()> {
        self.cpu.apply_snapshot(&snapshot.cpu);
        for p in &mut self.bus.peripherals {
            if let Some(state) = snapshot.peripherals.get(&p.name) {
                p.dev.restore(state.clone())?;
            }
        }
        Ok(())
    }

    pub fn peek_peripheral(&self, name: &str) -> Option<serde_json::Value> {
        self.bus
            .peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.dev.snapshot())
    }
}

impl<C: Cpu> DebugControl for Machine<C> {
    fn add_breakpoint(&mut self, addr_words: u32) -> bool {
        if self.breakpoints.contains(&addr_words) {
            return true;
        }
        if self.breakpoints.len() >= MAX_BREAKPOINTS {
            return false;
        }
        self.breakpoints.insert(addr_words);
        true
    }

    fn remove_breakpoint(&mut self, addr_words: u32) {
        self.breakpoints.remove(&addr_words);
    }

    fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    fn run(&mut self, max_steps: Option<u32>) -> SimResult<StopReason> {
        let mut steps = 0u32;
        loop {
            let pc = self.cpu.get_pc();
            if self.breakpoints.contains(&pc) && self.last_breakpoint != Some(pc) {
                self.last_breakpoint = Some(pc);
                return Ok(StopReason::Breakpoint(pc));
            }
            self.last_breakpoint = None;

            if let Some(limit) = max_steps {
                if steps >= limit {
                    return Ok(StopReason::MaxStepsReached);
                }
            }

            match self.step() {
                Ok(()) => {}
                Err(SimulationError::Halt) => return Ok(StopReason::Crashed),
                Err(e) => return Err(e),
            }
            steps += 1;

            if matches!(self.cpu.run_state(), RunState::Crashed) {
                return Ok(StopReason::Crashed);
            }
        }
    }

    fn step_single(&mut self) -> SimResult<StopReason> {
        self.step()?;
        if matches!(self.cpu.run_state(), RunState::Crashed) {
            return Ok(StopReason::Crashed);
        }
        Ok(StopReason::StepDone)
    }

    fn read_core_reg(&self, id: u8) -> u32 {
        self.cpu.get_register(id)
    }

    fn write_core_reg(&mut self, id: u8, val: u32) {
        self.cpu.set_register(id, val);
    }

    fn read_memory(&self, addr: u32, len: usize) -> SimResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u32 {
            out.push(self.bus.read_gdb_byte(addr + i)?);
        }
        Ok(out)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> SimResult<()> {
        for (i, byte) in data.iter().enumerate() {
            self.bus.write_gdb_byte(addr + i as u32, *byte)?;
        }
        Ok(())
    }

    fn get_pc(&self) -> u32 {
        self.cpu.get_pc()
    }

    fn set_pc(&mut self, pc_words: u32) {
        self.cpu.set_pc(pc_words);
    }

    fn get_register_names(&self) -> Vec<String> {
        self.cpu.get_register_names()
    }

    fn get_cycle_count(&self) -> u64 {
        self.total_cycles
    }

    fn run_state(&self) -> RunState {
        self.cpu.run_state()
    }

    fn reset(&mut self) -> SimResult<()> {
        self.cpu.reset(&mut self.bus)
    }

    fn snapshot(&self) -> snapshot::MachineSnapshot {
        self.snapshot()
    }

    fn restore(&mut self, snapshot: &snapshot::MachineSnapshot) -> SimResult<()> {
        self.apply_snapshot(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::avr::{make, McuVariant};

    fn machine() -> Machine<cpu::avr::Avr> {
        make(McuVariant::Atmega328p, SimulationConfig::default())
    }

    #[test]
    fn breakpoint_table_rejects_past_the_cap() {
        let mut m = machine();
        for addr in 0..MAX_BREAKPOINTS as u32 {
            assert!(m.add_breakpoint(addr), "insert {addr} should fit under the cap");
        }
        assert!(!m.add_breakpoint(MAX_BREAKPOINTS as u32), "33rd distinct address must be rejected");
        assert_eq!(m.breakpoints.len(), MAX_BREAKPOINTS);
    }

    #[test]
    fn re_arming_an_existing_breakpoint_does_not_consume_capacity() {
        let mut m = machine();
        for addr in 0..MAX_BREAKPOINTS as u32 {
            assert!(m.add_breakpoint(addr));
        }
        assert!(m.add_breakpoint(0), "re-adding an already-armed address must succeed");
        assert_eq!(m.breakpoints.len(), MAX_BREAKPOINTS);
    }
}
