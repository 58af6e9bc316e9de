use crate::base::behavior::Cycle;
use crate::base::packet::Packet;

/// One outstanding miss. The packet aggregates every waiter that coalesced
/// into this line.
#[derive(Debug)]
pub struct MshrEntry {
    pub line: u64,
    pub packet: Packet,
    pub ready_at: Option<Cycle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrOutcome {
    Allocated,
    Coalesced,
    Full,
}

/// Miss-status holding registers: at most one entry per line address.
#[derive(Debug)]
pub struct MshrTable {
    capacity: usize,
    entries: Vec<MshrEntry>,
}

impl MshrTable {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MSHR capacity must be nonzero");
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    pub fn has_entry(&self, line: u64) -> bool {
        self.entries.iter().any(|entry| entry.line == line)
    }

    pub fn can_allocate(&self, line: u64) -> bool {
        self.has_entry(line) || self.entries.len() < self.capacity
    }

    pub fn occupancy(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupancy_ratio(&self) -> f64 {
        self.entries.len() as f64 / self.capacity as f64
    }

    /// Track a miss. An existing entry for the line absorbs the packet's
    /// waiters; a full table refuses.
    pub fn allocate(&mut self, line: u64, packet: Packet) -> MshrOutcome {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.line == line) {
            entry.packet.merge_from(packet);
            return MshrOutcome::Coalesced;
        }
        if self.entries.len() >= self.capacity {
            return MshrOutcome::Full;
        }
        self.entries.push(MshrEntry {
            line,
            packet,
            ready_at: None,
        });
        MshrOutcome::Allocated
    }

    /// The lower level answered; the fill lands at `ready_at`.
    pub fn mark_ready(&mut self, line: u64, ready_at: Cycle) -> bool {
        match self.entries.iter_mut().find(|entry| entry.line == line) {
            Some(entry) => {
                entry.ready_at = Some(ready_at);
                true
            }
            None => false,
        }
    }

    /// Lines whose fill is due, oldest allocation first.
    pub fn ready_lines(&self, now: Cycle) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|entry| entry.ready_at.map(|at| at <= now).unwrap_or(false))
            .map(|entry| entry.line)
            .collect()
    }

    pub fn remove(&mut self, line: u64) -> Option<MshrEntry> {
        let index = self.entries.iter().position(|entry| entry.line == line)?;
        Some(self.entries.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Address;
    use crate::base::channel::{ReturnHandle, ReturnQueue};

    fn packet_with_waiter() -> (Packet, crate::base::channel::ReturnQueueRef) {
        let queue = ReturnQueue::shared();
        let packet = Packet {
            address: Address::new(0x1040),
            to_return: vec![ReturnHandle::new(&queue)],
            ..Packet::default()
        };
        (packet, queue)
    }

    #[test]
    fn one_entry_per_line() {
        let mut table = MshrTable::new(4);
        let (first, _q1) = packet_with_waiter();
        let (second, _q2) = packet_with_waiter();
        assert_eq!(table.allocate(0x41, first), MshrOutcome::Allocated);
        assert_eq!(table.allocate(0x41, second), MshrOutcome::Coalesced);
        assert_eq!(table.occupancy(), 1);
    }

    #[test]
    fn coalesce_merges_waiters() {
        let mut table = MshrTable::new(4);
        let (first, _q1) = packet_with_waiter();
        let (second, _q2) = packet_with_waiter();
        table.allocate(0x41, first);
        table.allocate(0x41, second);
        table.mark_ready(0x41, 5);
        assert_eq!(table.ready_lines(5), vec![0x41]);
        let entry = table.remove(0x41).expect("entry present");
        assert_eq!(entry.packet.to_return.len(), 2);
    }

    #[test]
    fn full_table_backpressures() {
        let mut table = MshrTable::new(1);
        let (first, _q1) = packet_with_waiter();
        let (second, _q2) = packet_with_waiter();
        assert_eq!(table.allocate(0x41, first), MshrOutcome::Allocated);
        assert_eq!(table.allocate(0x42, second), MshrOutcome::Full);
    }

    #[test]
    fn fills_wait_for_their_cycle() {
        let mut table = MshrTable::new(2);
        let (packet, _q) = packet_with_waiter();
        table.allocate(0x41, packet);
        table.mark_ready(0x41, 10);
        assert!(table.ready_lines(9).is_empty());
        assert_eq!(table.ready_lines(10).len(), 1);
        table.remove(0x41);
        assert_eq!(table.occupancy(), 0);
    }

    #[test]
    fn unanswered_entries_never_fill() {
        let mut table = MshrTable::new(2);
        let (packet, _q) = packet_with_waiter();
        table.allocate(0x41, packet);
        assert!(table.ready_lines(u64::MAX).is_empty());
        assert!(!table.mark_ready(0x99, 1));
    }

    #[test]
    fn occupancy_ratio_tracks_fill() {
        let mut table = MshrTable::new(4);
        let (packet, _q) = packet_with_waiter();
        table.allocate(0x41, packet);
        let (packet, _q) = packet_with_waiter();
        table.allocate(0x42, packet);
        assert!((table.occupancy_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
