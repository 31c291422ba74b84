// LabWired AVR - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Cycle timer queue (C4): ordered future-cycle callbacks, processed once at
//! the end of every `run_one`. Kept as a sorted `Vec` rather than a binary
//! heap — entries must stay stable on equal keys (spec §4.4) and the queue
//! is expected to hold a handful of live timers at most.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(pub u32);

struct Entry {
    id: TimerId,
    when_cycle: u64,
}

#[derive(Debug, Default)]
pub struct CycleTimerQueue {
    entries: Vec<Entry>,
    next_id: u32,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("when_cycle", &self.when_cycle)
            .finish()
    }
}

impl CycleTimerQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedules a new callback for `when_cycle`, returning an id that can
    /// be used to cancel it. Ties are broken by insertion order.
    pub fn schedule(&mut self, when_cycle: u64) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let pos = self
            .entries
            .iter()
            .position(|e| e.when_cycle > when_cycle)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { id, when_cycle });
        id
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.entries.retain(|e| e.id != id);
    }

    /// Pops and returns every timer due at or before `cycle`, in the order
    /// they should fire.
    pub fn drain_due(&mut self, cycle: u64) -> Vec<TimerId> {
        let split = self
            .entries
            .iter()
            .position(|e| e.when_cycle > cycle)
            .unwrap_or(self.entries.len());
        self.entries.drain(0..split).map(|e| e.id).collect()
    }

    /// Cycles remaining until the next entry fires, for sleep estimation
    /// (spec §4.4, §5 suspension points).
    pub fn ticks_until_next(&self, cycle: u64) -> Option<u64> {
        self.entries.first().map(|e| e.when_cycle.saturating_sub(cycle))
    }
}
