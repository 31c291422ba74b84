// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Whole-pipeline scenarios: a hand-assembled flash image driven through
//! the MCU factory and the interpreter's own `step`/`run`, without going
//! through the `labwired` binary itself.

use labwired_core::memory::ProgramImage;
use labwired_core::system::avr::{make, vectors, McuVariant};
use labwired_core::{Bus, Cpu, DebugControl, RunState, SimulationConfig};

fn word_le(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 2);
    for w in words {
        out.push((*w & 0xFF) as u8);
        out.push((*w >> 8) as u8);
    }
    out
}

/// `LDI r16,1 / LDI r17,1 / ADD r16,r17 / ADD r17,r16 / RJMP -4`, looping
/// the two low ALU registers through an 8-bit Fibonacci sequence forever.
fn fibonacci_firmware() -> Vec<u8> {
    word_le(&[
        0xE001, // LDI r16, 1
        0xE011, // LDI r17, 1
        0x0F01, // ADD r16, r17
        0x0F10, // ADD r17, r16
        0xCFFD, // RJMP -3 (back to the first ADD)
    ])
}

#[test]
fn fibonacci_in_registers_matches_wrapping_reference() {
    let mut machine = make(McuVariant::Atmega328p, SimulationConfig::default());
    machine
        .load_firmware(&ProgramImage::new("atmega328p", 16_000_000, fibonacci_firmware()))
        .unwrap();

    let passes = 10u32;
    machine.step().unwrap(); // LDI r16, 1
    machine.step().unwrap(); // LDI r17, 1
    for _ in 0..passes {
        machine.step().unwrap(); // ADD r16, r17
        machine.step().unwrap(); // ADD r17, r16
        machine.step().unwrap(); // RJMP
    }

    let (mut r16, mut r17) = (1u8, 1u8);
    for _ in 0..passes {
        r16 = r16.wrapping_add(r17);
        r17 = r17.wrapping_add(r16);
    }

    assert_eq!(machine.cpu.get_register(16), r16 as u32);
    assert_eq!(machine.cpu.get_register(17), r17 as u32);
    assert_eq!(machine.cpu.run_state(), RunState::Running);
}

/// Timer0 in Normal mode, prescaler 1, TOIE0 + global interrupts enabled:
/// running 256 cycles must service exactly one overflow vector and clear
/// the overflow flag on service.
#[test]
fn timer0_overflow_fires_exactly_once_per_256_cycles() {
    let mut machine = make(McuVariant::Atmega328p, SimulationConfig::default());
    let firmware = word_le(&[
        0x9478, // SEI
        0xCFFF, // RJMP -1 (spin forever once interrupts are on)
    ]);
    machine
        .load_firmware(&ProgramImage::new("atmega328p", 16_000_000, firmware))
        .unwrap();

    // TCCR0B @ 0x45 (timer0.control offset 1 from base 0x44): CS0[2:0] = 001 (clk/1).
    machine.bus.write_u8(0x45, 0b0000_0001).unwrap();
    // TIMSK0 is modeled as timer0.control offset 0 (base 0x6E): TOIE0 = bit0.
    machine.bus.write_u8(0x6E, 0b0000_0001).unwrap();

    // ATmega328P reserves a two-word JMP slot per vector (spec §4.6).
    let expected_pc = vectors::TIMER0_OVF as u32 * 2;
    let mut serviced = false;
    for _ in 0..600 {
        machine.step().unwrap();
        if machine.cpu.get_pc() == expected_pc {
            serviced = true;
            break;
        }
    }

    assert!(serviced, "expected timer0 overflow to service within 600 cycles");
}

/// Repeated `CALL` to itself past the stack's low bound must crash the
/// core without touching the register file.
#[test]
fn recursive_call_past_stack_bound_crashes_cleanly() {
    let mut machine = make(McuVariant::Attiny85, SimulationConfig::default());
    // CALL 0x0000, looping forever, each call pushing 2 return-address bytes.
    let firmware = word_le(&[0x940E, 0x0000]);
    machine
        .load_firmware(&ProgramImage::new("attiny85", 8_000_000, firmware))
        .unwrap();

    let registers_before = (0..32).map(|r| machine.cpu.get_register(r)).collect::<Vec<_>>();

    // A stack-space violation is reported as an error out of `run`, distinct
    // from the clean `StopReason::Crashed` a Halt condition produces, but it
    // still leaves the core in `Crashed` state for the caller to inspect.
    let result = machine.run(Some(10_000));
    assert!(result.is_err(), "recursing past the stack's low bound must surface an error");
    assert_eq!(machine.cpu.run_state(), RunState::Crashed);

    let registers_after = (0..32).map(|r| machine.cpu.get_register(r)).collect::<Vec<_>>();
    assert_eq!(registers_before, registers_after, "crash must not corrupt the register file");
}

/// `SEI; SLEEP;` with a timer scheduled to overflow must report Sleeping
/// and then resume once the vector services.
#[test]
fn sleep_then_wake_on_scheduled_interrupt() {
    let mut machine = make(McuVariant::Atmega328p, SimulationConfig::default());
    let firmware = word_le(&[
        0x9478, // SEI
        0x9588, // SLEEP
        0xCFFF, // RJMP -1
    ]);
    machine
        .load_firmware(&ProgramImage::new("atmega328p", 16_000_000, firmware))
        .unwrap();

    machine.bus.write_u8(0x45, 0b0000_0001).unwrap(); // TCCR0B: clk/1
    machine.bus.write_u8(0x6E, 0b0000_0001).unwrap(); // TIMSK0: TOIE0

    machine.step().unwrap(); // SEI
    machine.step().unwrap(); // SLEEP

    assert_eq!(machine.cpu.run_state(), RunState::Sleeping);

    for _ in 0..300 {
        machine.step().unwrap();
        if machine.cpu.run_state() != RunState::Sleeping {
            break;
        }
    }

    assert_ne!(machine.cpu.run_state(), RunState::Sleeping, "must wake once the timer overflows");
}
