// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The external firmware loader (spec §6): reduces an ELF or Intel-HEX image
//! to the `{flash_bytes, flash_size, mcu_name, f_cpu, eeprom_bytes,
//! symbols}` shape `labwired_core::memory::ProgramImage` consumes. Grounded
//! on the teacher's `load_elf`/`SymbolProvider` split (`goblin` for the
//! container, a name->address map for symbols) but narrowed to what an AVR
//! target actually needs: no DWARF line-table reverse lookup, since that
//! machinery backs the `shavr`-style interactive shell this spec places out
//! of scope (§1).
//!
//! AVR-GCC's linker places `.eeprom` at load-memory-address `0x810000` and
//! up in a combined image; both ELF program headers and Intel HEX extended
//! linear address records follow that convention, so both loaders use the
//! same split point.

use anyhow::{bail, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use labwired_core::memory::{ProgramImage, Segment};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// LMA base AVR-GCC uses for `.eeprom` in a combined ELF/HEX image.
const EEPROM_LMA_BASE: u64 = 0x81_0000;
/// Above this, AVR-GCC stores fuses/lockbits/signature — out of scope here.
const EEPROM_LMA_END: u64 = 0x82_0000;

const DEFAULT_MCU: &str = "atmega328p";
const DEFAULT_F_CPU: u32 = 16_000_000;

/// Loads firmware from `path`, dispatching on extension: `.hex`/`.ihex` is
/// read as Intel HEX, anything else is parsed as ELF (`goblin` already
/// sniffs the ELF magic, so a missing/odd extension still works as long as
/// the bytes are ELF).
pub fn load_firmware(path: &Path) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("failed to read firmware file: {path:?}"))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex") => {
            load_ihex_bytes(&buffer)
        }
        _ => load_elf_bytes(&buffer),
    }
}

pub fn load_elf(path: &Path) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("failed to read ELF file: {path:?}"))?;
    load_elf_bytes(&buffer)
}

pub fn load_elf_bytes(buffer: &[u8]) -> Result<ProgramImage> {
    let elf = Elf::parse(buffer).context("failed to parse ELF binary")?;

    if elf.header.e_machine != goblin::elf::header::EM_AVR {
        warn!(
            "ELF machine type {} is not EM_AVR; loading anyway",
            elf.header.e_machine
        );
    }
    info!(entry = format!("{:#x}", elf.entry), "parsed AVR ELF");

    let mut flash_chunks: Vec<(u64, &[u8])> = Vec::new();
    let mut eeprom_chunks: Vec<(u64, &[u8])> = Vec::new();

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD || ph.p_filesz == 0 {
            continue;
        }
        let offset = ph.p_offset as usize;
        let size = ph.p_filesz as usize;
        if offset + size > buffer.len() {
            bail!("loadable segment out of bounds in ELF file");
        }
        let data = &buffer[offset..offset + size];
        debug!(addr = format!("{:#x}", ph.p_paddr), size, "loadable segment");

        if ph.p_paddr >= EEPROM_LMA_BASE && ph.p_paddr < EEPROM_LMA_END {
            eeprom_chunks.push((ph.p_paddr - EEPROM_LMA_BASE, data));
        } else if ph.p_paddr < EEPROM_LMA_BASE {
            flash_chunks.push((ph.p_paddr, data));
        }
    }

    if flash_chunks.is_empty() {
        warn!("no loadable flash segments found in ELF file");
    }

    let flash = merge_segments(&flash_chunks);
    let eeprom = if eeprom_chunks.is_empty() {
        None
    } else {
        Some(merge_segments(&eeprom_chunks).data)
    };

    let symbols = read_symbols(&elf);
    let f_cpu = symbols
        .iter()
        .find_map(|(_, name)| (name == "F_CPU").then_some(DEFAULT_F_CPU))
        .unwrap_or(DEFAULT_F_CPU);

    Ok(ProgramImage {
        flash,
        eeprom,
        mcu_name: DEFAULT_MCU.to_string(),
        f_cpu,
        symbols: Some(symbols),
    })
}

pub fn load_ihex(path: &Path) -> Result<ProgramImage> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read HEX file: {path:?}"))?;
    load_ihex_bytes(text.as_bytes())
}

pub fn load_ihex_bytes(buffer: &[u8]) -> Result<ProgramImage> {
    let text = std::str::from_utf8(buffer).context("Intel HEX file is not valid UTF-8")?;
    let reader = ihex::Reader::new(text);

    let mut flash_bytes: HashMap<u64, u8> = HashMap::new();
    let mut eeprom_bytes: HashMap<u64, u8> = HashMap::new();
    let mut upper_linear: u64 = 0;

    for record in reader {
        match record.context("malformed Intel HEX record")? {
            ihex::Record::Data { offset, value } => {
                let base = upper_linear + offset as u64;
                for (i, byte) in value.into_iter().enumerate() {
                    let addr = base + i as u64;
                    if (EEPROM_LMA_BASE..EEPROM_LMA_END).contains(&addr) {
                        eeprom_bytes.insert(addr - EEPROM_LMA_BASE, byte);
                    } else if addr < EEPROM_LMA_BASE {
                        flash_bytes.insert(addr, byte);
                    }
                }
            }
            ihex::Record::ExtendedLinearAddress(hi) => {
                upper_linear = (hi as u64) << 16;
            }
            ihex::Record::ExtendedSegmentAddress(seg) => {
                upper_linear = (seg as u64) << 4;
            }
            ihex::Record::EndOfFile => break,
            ihex::Record::StartSegmentAddress { .. } | ihex::Record::StartLinearAddress(_) => {}
        }
    }

    let flash = sparse_to_segment(&flash_bytes);
    let eeprom = if eeprom_bytes.is_empty() {
        None
    } else {
        Some(sparse_to_segment(&eeprom_bytes).data)
    };

    Ok(ProgramImage {
        flash,
        eeprom,
        mcu_name: DEFAULT_MCU.to_string(),
        f_cpu: DEFAULT_F_CPU,
        symbols: None,
    })
}

/// Merges possibly-overlapping, possibly-gapped chunks into one contiguous
/// segment starting at the lowest address; gaps are filled with `0xFF`
/// (unprogrammed flash, spec §4.1).
fn merge_segments(chunks: &[(u64, &[u8])]) -> Segment {
    if chunks.is_empty() {
        return Segment {
            start_addr: 0,
            data: Vec::new(),
        };
    }
    let start = chunks.iter().map(|(addr, _)| *addr).min().unwrap();
    let end = chunks
        .iter()
        .map(|(addr, data)| addr + data.len() as u64)
        .max()
        .unwrap();
    let mut out = vec![0xFFu8; (end - start) as usize];
    for (addr, data) in chunks {
        let offset = (addr - start) as usize;
        out[offset..offset + data.len()].copy_from_slice(data);
    }
    Segment {
        start_addr: start,
        data: out,
    }
}

fn sparse_to_segment(bytes: &HashMap<u64, u8>) -> Segment {
    if bytes.is_empty() {
        return Segment {
            start_addr: 0,
            data: Vec::new(),
        };
    }
    let start = *bytes.keys().min().unwrap();
    let end = *bytes.keys().max().unwrap();
    let mut out = vec![0xFFu8; (end - start + 1) as usize];
    for (addr, value) in bytes {
        out[(addr - start) as usize] = *value;
    }
    Segment {
        start_addr: start,
        data: out,
    }
}

/// Best-effort `address -> name` map from the ELF symbol table. Local
/// labels and zero-valued symbols are dropped; this is enough for the
/// debugger's `qSupported`-adjacent symbol lookups, not a full DWARF index.
fn read_symbols(elf: &Elf) -> HashMap<u32, String> {
    let mut symbols = HashMap::new();
    for sym in &elf.syms {
        if sym.st_value == 0 || sym.is_import() {
            continue;
        }
        if let Some(name) = elf.strtab.get_at(sym.st_name) {
            if !name.is_empty() {
                symbols.insert(sym.st_value as u32, name.to_string());
            }
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_ihex(lines: &[&str]) -> String {
        let mut s = lines.join("\n");
        s.push('\n');
        s
    }

    #[test]
    fn ihex_single_data_record_loads_flash() {
        // :03 0000 00 AABBCC <checksum>
        // Record: byte count 3, addr 0x0000, type 00 (data), data AA BB CC
        let checksum = (!(0x03u8
            .wrapping_add(0x00)
            .wrapping_add(0x00)
            .wrapping_add(0x00)
            .wrapping_add(0xAA)
            .wrapping_add(0xBB)
            .wrapping_add(0xCC)))
        .wrapping_add(1);
        let line = format!(":03000000AABBCC{checksum:02X}");
        let hex = raw_ihex(&[&line, ":00000001FF"]);
        let image = load_ihex_bytes(hex.as_bytes()).unwrap();
        assert_eq!(image.flash.data, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn merge_segments_fills_gaps_with_0xff() {
        let a: &[u8] = &[1, 2];
        let b: &[u8] = &[9, 9];
        let segment = merge_segments(&[(0, a), (8, b)]);
        assert_eq!(segment.data[0..2], [1, 2]);
        assert_eq!(segment.data[2..8], [0xFF; 6]);
        assert_eq!(segment.data[8..10], [9, 9]);
    }
}
