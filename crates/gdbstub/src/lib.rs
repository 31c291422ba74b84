// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! C9: a GDB remote-serial-protocol stub over TCP. `gdbstub_arch` ships no
//! AVR `Arch`, so this crate defines its own — register layout and id
//! numbering follow `avr-gdb`'s convention (0-31 = R0-R31, 32 = SREG,
//! 33 = SP, 34 = PC, PC reported as a byte address) the way
//! `DebugControl::read_core_reg`/`write_core_reg` already expect.

use core::convert::Infallible;
use core::num::NonZeroUsize;
use gdbstub::arch::{Arch, RegId, Registers};
use gdbstub::stub::{BaseStopReason, GdbStub};
use gdbstub::target::ext::base::singlethread::{
    SingleRegisterAccess, SingleRegisterAccessOps, SingleThreadBase, SingleThreadResume,
    SingleThreadSingleStep,
};
use gdbstub::target::ext::base::BaseOps;
use gdbstub::target::ext::breakpoints::{BreakpointsOps, SwBreakpointOps};
use gdbstub::target::{Target, TargetError, TargetResult};
use labwired_core::cpu::Avr;
use labwired_core::{Cpu, DebugControl, Machine, StopReason};
use std::marker::PhantomData;
use std::net::{TcpListener, TcpStream};

/// `avr-gdb`'s register file: 32 general registers, SREG, SP, PC (byte
/// address). Used for both the bulk `g`/`G` packets and, per-field, the
/// `p`/`P` single-register packets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AvrRegisters {
    pub r: [u8; 32],
    pub sreg: u8,
    pub sp: u16,
    pub pc: u32,
}

impl Registers for AvrRegisters {
    type ProgramCounter = u32;

    fn pc(&self) -> Self::ProgramCounter {
        self.pc
    }

    fn gdb_serialize(&self, mut write_byte: impl FnMut(Option<u8>)) {
        for b in self.r {
            write_byte(Some(b));
        }
        write_byte(Some(self.sreg));
        write_byte(Some((self.sp & 0xFF) as u8));
        write_byte(Some((self.sp >> 8) as u8));
        for b in self.pc.to_le_bytes() {
            write_byte(Some(b));
        }
    }

    fn gdb_deserialize(&mut self, bytes: &[u8]) -> Result<(), ()> {
        if bytes.len() < 32 + 1 + 2 + 4 {
            return Err(());
        }
        self.r.copy_from_slice(&bytes[0..32]);
        self.sreg = bytes[32];
        self.sp = u16::from_le_bytes([bytes[33], bytes[34]]);
        self.pc = u32::from_le_bytes([bytes[35], bytes[36], bytes[37], bytes[38]]);
        Ok(())
    }
}

/// Maps a GDB register id (§4.9 numbering) to the field it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvrRegId {
    R(u8),
    Sreg,
    Sp,
    Pc,
}

impl RegId for AvrRegId {
    fn from_raw_id(id: usize) -> Option<(Self, Option<NonZeroUsize>)> {
        match id {
            0..=31 => Some((AvrRegId::R(id as u8), NonZeroUsize::new(1))),
            32 => Some((AvrRegId::Sreg, NonZeroUsize::new(1))),
            33 => Some((AvrRegId::Sp, NonZeroUsize::new(2))),
            34 => Some((AvrRegId::Pc, NonZeroUsize::new(4))),
            _ => None,
        }
    }
}

pub enum AvrArch {}

impl Arch for AvrArch {
    type Usize = u32;
    type Registers = AvrRegisters;
    type RegId = AvrRegId;
    type BreakpointKind = usize;

    fn target_description_xml() -> Option<&'static str> {
        None
    }
}

pub struct LabwiredTarget<C: Cpu> {
    pub machine: Machine<C>,
}

impl<C: Cpu> LabwiredTarget<C> {
    pub fn new(machine: Machine<C>) -> Self {
        Self { machine }
    }
}

impl Target for LabwiredTarget<Avr> {
    type Arch = AvrArch;
    type Error = Infallible;

    fn base_ops(&mut self) -> BaseOps<'_, Self::Arch, Self::Error> {
        BaseOps::SingleThread(self)
    }

    fn support_breakpoints(&mut self) -> Option<BreakpointsOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadBase for LabwiredTarget<Avr> {
    fn read_registers(&mut self, regs: &mut AvrRegisters) -> TargetResult<(), Self> {
        for i in 0..32u8 {
            regs.r[i as usize] = self.machine.read_core_reg(i) as u8;
        }
        regs.sreg = self.machine.read_core_reg(32) as u8;
        regs.sp = self.machine.read_core_reg(33) as u16;
        regs.pc = self.machine.read_core_reg(34);
        Ok(())
    }

    fn write_registers(&mut self, regs: &AvrRegisters) -> TargetResult<(), Self> {
        for i in 0..32u8 {
            self.machine.write_core_reg(i, regs.r[i as usize] as u32);
        }
        self.machine.write_core_reg(32, regs.sreg as u32);
        self.machine.write_core_reg(33, regs.sp as u32);
        self.machine.write_core_reg(34, regs.pc);
        Ok(())
    }

    fn support_single_register_access(&mut self) -> Option<SingleRegisterAccessOps<'_, (), Self>> {
        Some(self)
    }

    fn read_addrs(&mut self, start_addr: u32, data: &mut [u8]) -> TargetResult<usize, Self> {
        let mem = self
            .machine
            .read_memory(start_addr, data.len())
            .map_err(|_| TargetError::NonFatal)?;
        let len = mem.len().min(data.len());
        data[..len].copy_from_slice(&mem[..len]);
        Ok(len)
    }

    fn write_addrs(&mut self, start_addr: u32, data: &[u8]) -> TargetResult<(), Self> {
        self.machine
            .write_memory(start_addr, data)
            .map_err(|_| TargetError::NonFatal)?;
        Ok(())
    }

    fn support_resume(
        &mut self,
    ) -> Option<gdbstub::target::ext::base::singlethread::SingleThreadResumeOps<'_, Self>> {
        Some(self)
    }
}

impl SingleRegisterAccess<()> for LabwiredTarget<Avr> {
    fn read_register(&mut self, _tid: (), reg_id: AvrRegId, buf: &mut [u8]) -> TargetResult<usize, Self> {
        Ok(match reg_id {
            AvrRegId::R(n) => {
                buf[0] = self.machine.read_core_reg(n) as u8;
                1
            }
            AvrRegId::Sreg => {
                buf[0] = self.machine.read_core_reg(32) as u8;
                1
            }
            AvrRegId::Sp => {
                let v = self.machine.read_core_reg(33) as u16;
                buf[..2].copy_from_slice(&v.to_le_bytes());
                2
            }
            AvrRegId::Pc => {
                let v = self.machine.read_core_reg(34);
                buf[..4].copy_from_slice(&v.to_le_bytes());
                4
            }
        })
    }

    fn write_register(&mut self, _tid: (), reg_id: AvrRegId, val: &[u8]) -> TargetResult<(), Self> {
        match reg_id {
            AvrRegId::R(n) => self.machine.write_core_reg(n, val[0] as u32),
            AvrRegId::Sreg => self.machine.write_core_reg(32, val[0] as u32),
            AvrRegId::Sp => {
                self.machine
                    .write_core_reg(33, u16::from_le_bytes([val[0], val[1]]) as u32);
            }
            AvrRegId::Pc => {
                self.machine
                    .write_core_reg(34, u32::from_le_bytes([val[0], val[1], val[2], val[3]]));
            }
        }
        Ok(())
    }
}

impl SingleThreadResume for LabwiredTarget<Avr> {
    fn resume(&mut self, _signal: Option<gdbstub::common::Signal>) -> Result<(), Self::Error> {
        Ok(())
    }

    fn support_single_step(
        &mut self,
    ) -> Option<gdbstub::target::ext::base::singlethread::SingleThreadSingleStepOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadSingleStep for LabwiredTarget<Avr> {
    fn step(&mut self, _signal: Option<gdbstub::common::Signal>) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl gdbstub::target::ext::breakpoints::Breakpoints for LabwiredTarget<Avr> {
    fn support_sw_breakpoint(&mut self) -> Option<SwBreakpointOps<'_, Self>> {
        Some(self)
    }
}

impl gdbstub::target::ext::breakpoints::SwBreakpoint for LabwiredTarget<Avr> {
    fn add_sw_breakpoint(&mut self, addr: u32, _kind: usize) -> TargetResult<bool, Self> {
        if self.machine.add_breakpoint(addr) {
            Ok(true)
        } else {
            // Breakpoint table is at `MAX_BREAKPOINTS` (spec §4.9); report E01.
            Err(TargetError::Errno(1))
        }
    }

    fn remove_sw_breakpoint(&mut self, addr: u32, _kind: usize) -> TargetResult<bool, Self> {
        self.machine.remove_breakpoint(addr);
        Ok(true)
    }
}

pub struct GdbServer {
    port: u16,
}

impl GdbServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn run(&self, machine: Machine<Avr>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))?;
        tracing::info!("GDB server listening on 0.0.0.0:{}", self.port);

        let (stream, addr) = listener.accept()?;
        tracing::info!("GDB client connected from {}", addr);

        let mut target = LabwiredTarget::new(machine);
        let gdb = GdbStub::new(stream);

        match gdb.run_blocking::<GdbEventLoop>(&mut target) {
            Ok(reason) => tracing::info!("GDB session ended: {:?}", reason),
            Err(e) => tracing::error!("GDB session error: {:?}", e),
        }

        Ok(())
    }
}

pub struct GdbEventLoop(PhantomData<()>);

impl gdbstub::stub::run_blocking::BlockingEventLoop for GdbEventLoop {
    type Target = LabwiredTarget<Avr>;
    type Connection = TcpStream;
    type StopReason = BaseStopReason<(), u32>;

    fn wait_for_stop_reason(
        target: &mut Self::Target,
        conn: &mut Self::Connection,
    ) -> Result<
        gdbstub::stub::run_blocking::Event<Self::StopReason>,
        gdbstub::stub::run_blocking::WaitForStopReasonError<
            <Self::Target as Target>::Error,
            <Self::Connection as gdbstub::conn::Connection>::Error,
        >,
    > {
        use gdbstub::stub::run_blocking::Event;
        use std::io::Read;

        loop {
            let mut byte = [0];
            conn.set_nonblocking(true).ok();
            let incoming = match conn.read(&mut byte) {
                Ok(1) => {
                    conn.set_nonblocking(false).ok();
                    Some(byte[0])
                }
                _ => {
                    conn.set_nonblocking(false).ok();
                    None
                }
            };

            if let Some(b) = incoming {
                return Ok(Event::IncomingData(b));
            }

            match target.machine.run(Some(1000)) {
                Ok(StopReason::Breakpoint(_)) => {
                    return Ok(Event::TargetStopped(BaseStopReason::Signal(
                        gdbstub::common::Signal::SIGTRAP,
                    )))
                }
                Ok(StopReason::StepDone) => {
                    return Ok(Event::TargetStopped(BaseStopReason::Signal(
                        gdbstub::common::Signal::SIGTRAP,
                    )))
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("GDB simulation error: {}", e);
                    return Ok(Event::TargetStopped(BaseStopReason::Signal(
                        gdbstub::common::Signal::SIGSEGV,
                    )));
                }
            }
        }
    }

    fn on_interrupt(
        _target: &mut Self::Target,
    ) -> Result<Option<Self::StopReason>, <Self::Target as Target>::Error> {
        Ok(Some(BaseStopReason::Signal(gdbstub::common::Signal::SIGINT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labwired_core::bus::SystemBus;
    use labwired_core::SimulationConfig;

    fn harness() -> LabwiredTarget<Avr> {
        let mut bus = SystemBus::new(0x08FF, 0x100, SimulationConfig::default());
        bus.set_flash_size(0x8000);
        let mut cpu = Avr::new();
        cpu.reset(&mut bus).unwrap();
        let machine = Machine::new(cpu, bus, SimulationConfig::default());
        LabwiredTarget::new(machine)
    }

    #[test]
    fn bulk_register_read_write_round_trips() {
        let mut target = harness();
        target.machine.write_core_reg(0, 0x42);
        target.machine.write_core_reg(34, 0x100);

        let mut regs = AvrRegisters::default();
        target.read_registers(&mut regs).unwrap();
        assert_eq!(regs.r[0], 0x42);
        assert_eq!(regs.pc, 0x100);

        regs.r[1] = 0x99;
        target.write_registers(&regs).unwrap();
        assert_eq!(target.machine.read_core_reg(1), 0x99);
    }

    #[test]
    fn single_register_access_reads_pc_as_four_little_endian_bytes() {
        let mut target = harness();
        target.machine.write_core_reg(34, 0x0102);
        let mut buf = [0u8; 4];
        let n = target.read_register((), AvrRegId::Pc, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn breakpoint_add_remove_round_trips() {
        let mut target = harness();
        target.add_sw_breakpoint(0x10, 0).unwrap();
        assert!(target.machine.breakpoints.contains(&0x10));
        target.remove_sw_breakpoint(0x10, 0).unwrap();
        assert!(!target.machine.breakpoints.contains(&0x10));
    }

    #[test]
    fn a_full_breakpoint_table_reports_errno_1() {
        let mut target = harness();
        for addr in 0..labwired_core::MAX_BREAKPOINTS as u32 {
            target.add_sw_breakpoint(addr, 0).unwrap();
        }
        let err = target
            .add_sw_breakpoint(labwired_core::MAX_BREAKPOINTS as u32, 0)
            .unwrap_err();
        assert!(matches!(err, TargetError::Errno(1)));
    }
}
