// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub cpu: CpuSnapshot,
    pub peripherals: HashMap<String, serde_json::Value>,
    /// SHA-256 of the flash image this snapshot was taken against, so a
    /// restore against a different firmware can be rejected instead of
    /// silently producing garbage (spec §6 persisted-flash requirement).
    pub firmware_sha256: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CpuSnapshot {
    Avr(AvrCpuSnapshot),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AvrCpuSnapshot {
    pub registers: [u8; 32],
    pub sreg: [bool; 8],
    pub pc_words: u32,
    pub cycle: u64,
    pub state: String,
    pub pending_wait: u8,
    pub i_shadow: bool,
}
