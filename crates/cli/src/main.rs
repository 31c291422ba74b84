// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use human_size::{Byte, SpecificSize};
use labwired_core::{snapshot::MachineSnapshot, system::avr, Cpu, DebugControl, RunState, SimulationConfig, StopReason};
use tracing::{error, info, warn};

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;

/// LabWired AVR simulator: runs a firmware image against a named MCU
/// variant, optionally exposing a GDB remote-serial stub instead of
/// running to completion on its own.
#[derive(Parser, Debug)]
#[command(author, version, about = "LabWired AVR simulator", long_about = None)]
struct Cli {
    /// Path to the firmware image (ELF, or Intel HEX with a .hex/.ihex extension).
    firmware: PathBuf,

    /// MCU variant to simulate.
    #[arg(short = 'm', long = "mcu", default_value = "atmega328p")]
    mcu: String,

    /// Clock frequency in Hz, informational only (the core is cycle-driven,
    /// not wall-clock-driven; this is surfaced to observers/snapshots).
    #[arg(short = 'f', long = "freq")]
    freq: Option<u32>,

    /// Emit a tracing line for every executed instruction.
    #[arg(short = 't', long = "trace")]
    trace: bool,

    /// Start a GDB remote-serial stub on this TCP port instead of free-running.
    #[arg(short = 'g', long = "gdb")]
    gdb: Option<u16>,

    /// Verbose logging (debug level); repeat is not supported, use RUST_LOG for finer control.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Cap on instructions executed in free-run mode before giving up (0 = unbounded).
    #[arg(long = "max-steps", default_value_t = 0)]
    max_steps: u32,

    /// Restore machine state from a snapshot file before running.
    #[arg(long = "snapshot-load")]
    snapshot_load: Option<PathBuf>,

    /// Write machine state to a snapshot file once the run stops.
    #[arg(long = "snapshot-save")]
    snapshot_save: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn describe_size(bytes: usize) -> String {
    SpecificSize::new(bytes as f64, Byte)
        .map(|size| size.to_string())
        .unwrap_or_else(|_| format!("{bytes} B"))
}

fn run() -> Result<u8> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = SimulationConfig {
        trace_instructions: cli.trace,
        ..SimulationConfig::default()
    };

    let mut machine = avr::make_by_name(&cli.mcu, config)
        .with_context(|| format!("unknown MCU variant '{}'", cli.mcu))?;

    info!(
        mcu = cli.mcu.as_str(),
        flash = describe_size(machine.bus.flash.len()),
        ram = describe_size(machine.bus.data.len()),
        "machine configured"
    );

    if let Some(path) = &cli.snapshot_load {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot file: {path:?}"))?;
        let snapshot: MachineSnapshot =
            serde_json::from_str(&text).context("snapshot file is not valid JSON")?;
        machine
            .restore(&snapshot)
            .context("failed to apply snapshot to machine")?;
        info!(path = ?path, "restored machine state from snapshot");
    } else {
        let mut image = labwired_loader::load_firmware(&cli.firmware)
            .with_context(|| format!("failed to load firmware: {:?}", cli.firmware))?;
        if let Some(freq) = cli.freq {
            image.f_cpu = freq;
        }
        machine
            .load_firmware(&image)
            .context("firmware does not fit the selected MCU's flash")?;
        info!(
            path = ?cli.firmware,
            f_cpu = image.f_cpu,
            "loaded firmware"
        );
    }

    if let Some(port) = cli.gdb {
        if cli.snapshot_save.is_some() {
            warn!("--snapshot-save is ignored when --gdb is attached; save via the debugger's own detach hook instead");
        }
        info!(port, "starting GDB remote-serial stub");
        labwired_gdbstub::GdbServer::new(port)
            .run(machine)
            .context("GDB stub exited with an error")?;
        return Ok(EXIT_OK);
    }

    let exit_code = run_to_completion(&mut machine, &cli)?;

    if let Some(path) = &cli.snapshot_save {
        let snapshot = machine.snapshot();
        let text = serde_json::to_string_pretty(&snapshot).context("failed to serialize snapshot")?;
        std::fs::write(path, text).with_context(|| format!("failed to write snapshot file: {path:?}"))?;
        info!(path = ?path, "wrote machine state snapshot");
    }

    Ok(exit_code)
}

fn run_to_completion(machine: &mut labwired_core::Machine<labwired_core::cpu::avr::Avr>, cli: &Cli) -> Result<u8> {
    let max_steps = if cli.max_steps == 0 { None } else { Some(cli.max_steps) };
    match machine.run(max_steps) {
        Ok(StopReason::Crashed) => {
            error!(
                pc = machine.get_pc(),
                cycles = machine.get_cycle_count(),
                "simulation crashed"
            );
            dump_registers(machine);
            Ok(EXIT_FATAL)
        }
        Ok(StopReason::MaxStepsReached) => {
            warn!(max_steps = cli.max_steps, "stopped: max step count reached");
            Ok(EXIT_OK)
        }
        Ok(reason) => {
            info!(?reason, cycles = machine.get_cycle_count(), "run stopped");
            Ok(EXIT_OK)
        }
        Err(err) => {
            error!(error = %err, "simulation aborted");
            dump_registers(machine);
            Ok(EXIT_FATAL)
        }
    }
}

fn dump_registers(machine: &labwired_core::Machine<labwired_core::cpu::avr::Avr>) {
    for (id, name) in machine.cpu.get_register_names().iter().enumerate() {
        error!(register = name.as_str(), value = machine.cpu.get_register(id as u8));
    }
    if matches!(machine.cpu.run_state(), RunState::Crashed) {
        error!(recent_pcs = ?machine.cpu.recent_pcs(), "recent program counters before crash");
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
