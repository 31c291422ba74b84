// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use labwired_core::memory::ProgramImage;
use labwired_core::system::avr::{make, McuVariant};
use labwired_core::SimulationConfig;
use labwired_gdbstub::GdbServer;

fn compute_checksum(data: &str) -> String {
    let sum: u8 = data.as_bytes().iter().fold(0, |acc, &x| acc.wrapping_add(x));
    format!("{:02x}", sum)
}

fn send_packet(stream: &mut TcpStream, data: &str) {
    let packet = format!("${}#{}", data, compute_checksum(data));
    stream.write_all(packet.as_bytes()).unwrap();
    stream.flush().unwrap();
}

fn read_packet(stream: &mut TcpStream) -> String {
    let mut buffer = [0; 2048];
    let mut response = String::new();
    let start = std::time::Instant::now();
    loop {
        if start.elapsed() > Duration::from_secs(2) {
            panic!("timed out reading GDB packet, data so far: {:?}", response);
        }
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                response.push_str(&String::from_utf8_lossy(&buffer[..n]));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            Err(e) => panic!("error reading GDB packet: {:?}", e),
        }

        if response == "+" {
            response.clear();
            continue;
        }

        if response.contains('$') && response.contains('#') {
            let hash_idx = response.find('#').unwrap();
            if response.len() >= hash_idx + 3 {
                break;
            }
        }
    }
    response
}

fn word_le(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 2);
    for w in words {
        out.push((*w & 0xFF) as u8);
        out.push((*w >> 8) as u8);
    }
    out
}

/// `LDI r16,1 / LDI r17,1 / ADD r16,r17 / ADD r17,r16 / RJMP -3`, an
/// infinite loop so the continue/interrupt round trip always has
/// something to land on.
fn looping_firmware() -> Vec<u8> {
    word_le(&[0xE001, 0xE011, 0x0F01, 0x0F10, 0xCFFD])
}

#[test]
fn gdb_rsp_basic_commands() {
    let port = 9301;
    thread::spawn(move || {
        let mut machine = make(McuVariant::Atmega328p, SimulationConfig::default());
        let image = ProgramImage::new("atmega328p", 16_000_000, looping_firmware());
        machine.load_firmware(&image).unwrap();

        let server = GdbServer::new(port);
        server.run(machine).unwrap();
    });

    thread::sleep(Duration::from_millis(150));

    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    stream.write_all(b"+").unwrap();

    // Read r0 (register id 0 in GDB's numbering).
    send_packet(&mut stream, "p0");
    let resp = read_packet(&mut stream);
    assert!(!resp.contains('E'), "failed to read r0: {resp}");

    // Single step advances PC by exactly one instruction word.
    send_packet(&mut stream, "s");
    let resp = read_packet(&mut stream);
    assert!(resp.contains("05"), "expected SIGTRAP stop reply after step, got: {resp}");

    // PC is register id 34 per this target's GDB register numbering.
    send_packet(&mut stream, "p22");
    let resp = read_packet(&mut stream);
    assert!(!resp.contains('E'), "failed to read PC (id 0x22 = 34): {resp}");

    // Continue, then send the RSP interrupt byte and expect a stop reply.
    send_packet(&mut stream, "c");
    thread::sleep(Duration::from_millis(100));
    stream.write_all(&[0x03]).unwrap();
    stream.flush().unwrap();
    let resp = read_packet(&mut stream);
    assert!(
        resp.contains("02") || resp.contains("T02") || resp.contains("S02"),
        "expected SIGINT stop reply after interrupt, got: {resp}"
    );

    // Flash word 0 should read back as the first LDI's low byte (0x01).
    send_packet(&mut stream, "m0,2");
    let resp = read_packet(&mut stream);
    assert!(!resp.contains("E01"), "GDB memory read failed: {resp}");
}
