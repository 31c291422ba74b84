// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! USART0: grounded on the teacher's `peripherals/uart.rs` (TX sink as
//! `Arc<Mutex<Vec<u8>>>` with optional stdout echo, `as_any`/`as_any_mut`
//! for the CLI's `attach_uart_tx_sink`-style wiring) and on the register
//! layout and three interrupt vectors (`RXC`, `TXC`, `UDRE`) of `.uart` in
//! `sim_megax8.h`. The bit-banged baud-rate timing spec.md §1 leaves to the
//! concrete peripheral model is not simulated: writes to UDR complete
//! (and raise TXC/UDRE) on the very next `run()`.

use crate::{PeripheralTickResult, Peripheral, SimResult};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const UDR: u64 = 0; // data register
const UCSRA: u64 = 1;
const UCSRB: u64 = 2;
const UCSRC: u64 = 3;

const UCSRA_RXC: u8 = 1 << 7;
const UCSRA_TXC: u8 = 1 << 6;
const UCSRA_UDRE: u8 = 1 << 5;
const UCSRB_RXCIE: u8 = 1 << 7;
const UCSRB_TXCIE: u8 = 1 << 6;
const UCSRB_UDRIE: u8 = 1 << 5;

#[derive(Debug)]
pub struct Usart0 {
    udr: u8,
    ucsra: u8,
    ucsrb: u8,
    ucsrc: u8,
    pending_tx: bool,
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
    rxc_vector: u8,
    txc_vector: u8,
    udre_vector: u8,
}

impl Usart0 {
    pub fn new(rxc_vector: u8, txc_vector: u8, udre_vector: u8) -> Self {
        Self {
            udr: 0,
            ucsra: UCSRA_UDRE,
            ucsrb: 0,
            ucsrc: 0,
            pending_tx: false,
            sink: None,
            echo_stdout: true,
            rxc_vector,
            txc_vector,
            udre_vector,
        }
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    /// Feeds a byte in from the host side (pty/test harness), raising RXC.
    pub fn push_rx(&mut self, byte: u8) {
        self.udr = byte;
        self.ucsra |= UCSRA_RXC;
    }
}

impl Peripheral for Usart0 {
    fn read(&self, offset: u64) -> SimResult<u8> {
        Ok(match offset {
            UDR => self.udr,
            UCSRA => self.ucsra,
            UCSRB => self.ucsrb,
            UCSRC => self.ucsrc,
            _ => 0,
        })
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        match offset {
            UDR => {
                self.udr = value;
                self.ucsra &= !UCSRA_UDRE;
                self.pending_tx = true;
            }
            UCSRA => {
                // RXC/TXC are cleared by writing 1 (datasheet convention).
                self.ucsra &= !(value & (UCSRA_RXC | UCSRA_TXC));
            }
            UCSRB => self.ucsrb = value,
            UCSRC => self.ucsrc = value,
            _ => {}
        }
        Ok(())
    }

    fn run(&mut self) -> PeripheralTickResult {
        let mut raised = Vec::new();
        if self.pending_tx {
            self.pending_tx = false;
            if let Some(sink) = &self.sink {
                if let Ok(mut guard) = sink.lock() {
                    guard.push(self.udr);
                }
            }
            if self.echo_stdout {
                let _ = write!(io::stdout(), "{}", self.udr as char);
                let _ = io::stdout().flush();
            }
            self.ucsra |= UCSRA_UDRE | UCSRA_TXC;
            if self.ucsrb & UCSRB_UDRIE != 0 {
                raised.push(self.udre_vector);
            }
            if self.ucsrb & UCSRB_TXCIE != 0 {
                raised.push(self.txc_vector);
            }
        }
        if self.ucsra & UCSRA_RXC != 0 && self.ucsrb & UCSRB_RXCIE != 0 {
            raised.push(self.rxc_vector);
        }
        PeripheralTickResult {
            raised_vectors: raised,
            extra_cycles: 0,
        }
    }

    fn reset(&mut self) {
        let (rxc, txc, udre) = (self.rxc_vector, self.txc_vector, self.udre_vector);
        *self = Usart0::new(rxc, txc, udre);
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "udr": self.udr, "ucsra": self.ucsra, "ucsrb": self.ucsrb, "ucsrc": self.ucsrc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writing_udr_transmits_on_next_run() {
        let mut u = Usart0::new(18, 20, 19);
        let sink = Arc::new(Mutex::new(Vec::new()));
        u.set_sink(Some(sink.clone()), false);
        u.write(UDR, b'A').unwrap();
        assert_eq!(u.ucsra & UCSRA_UDRE, 0);
        u.run();
        assert_eq!(sink.lock().unwrap().clone(), vec![b'A']);
        assert_ne!(u.ucsra & UCSRA_UDRE, 0);
    }

    #[test]
    fn rx_byte_raises_vector_when_enabled() {
        let mut u = Usart0::new(18, 20, 19);
        u.write(UCSRB, UCSRB_RXCIE).unwrap();
        u.push_rx(b'Z');
        let result = u.run();
        assert_eq!(result.raised_vectors, vec![18]);
    }
}
