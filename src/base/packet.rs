use num_derive::FromPrimitive;

use crate::arch::Address;
use crate::base::behavior::Cycle;
use crate::base::channel::ReturnHandle;

/// Kinds of memory access a packet can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive)]
pub enum AccessType {
    #[default]
    Load = 0,
    Rfo = 1,
    Prefetch = 2,
    Write = 3,
    Translation = 4,
}

pub const NUM_ACCESS_TYPES: usize = 5;

impl AccessType {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The envelope exchanged between components.
///
/// Either address may be undefined (zero) until translation resolves it.
/// Dependency lists hold arena indices into the issuing core's LSQ and ROB,
/// never references; completion is delivered to every handle in `to_return`.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub address: Address,
    pub v_address: Address,
    /// Response payload: the translated physical address for translations.
    pub data: Address,
    pub ip: Address,
    pub instr_id: u64,
    pub asid: u16,
    pub cpu: usize,
    pub kind: AccessType,
    pub pf_metadata: u32,
    /// The issuer insists the prefetch fills the level it was issued to.
    pub prefetch_from_this_level: bool,
    pub scheduled: bool,
    pub event_cycle: Cycle,
    pub cycle_enqueued: Cycle,
    pub to_return: Vec<ReturnHandle>,
    pub lq_depend_on_me: Vec<usize>,
    pub sq_depend_on_me: Vec<usize>,
    pub instr_depend_on_me: Vec<u64>,
}

impl Packet {
    /// Fold another in-flight request for the same line into this one.
    pub fn merge_from(&mut self, other: Packet) {
        dep_merge(&mut self.lq_depend_on_me, other.lq_depend_on_me);
        dep_merge(&mut self.sq_depend_on_me, other.sq_depend_on_me);
        dep_merge(&mut self.instr_depend_on_me, other.instr_depend_on_me);
        merge_return_handles(&mut self.to_return, other.to_return);
        // A demand merge promotes the packet out of prefetch priority.
        if self.kind == AccessType::Prefetch && other.kind != AccessType::Prefetch {
            self.kind = other.kind;
        }
        self.prefetch_from_this_level |= other.prefetch_from_this_level;
    }
}

/// Stable, deduplicating dependency-list merge. Both sides are sorted first,
/// making the result well-defined regardless of input order.
pub fn dep_merge<T: Ord + Copy>(dest: &mut Vec<T>, src: Vec<T>) {
    dest.extend(src);
    dest.sort_unstable();
    dest.dedup();
}

pub fn merge_return_handles(dest: &mut Vec<ReturnHandle>, src: Vec<ReturnHandle>) {
    dest.extend(src);
    dest.sort_unstable_by_key(ReturnHandle::id);
    dest.dedup_by_key(|handle| handle.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::channel::ReturnQueue;

    #[test]
    fn dep_merge_dedups_and_orders() {
        let mut dest = vec![5u64, 1, 3];
        dep_merge(&mut dest, vec![4, 3, 1, 9]);
        assert_eq!(dest, vec![1, 3, 4, 5, 9]);
    }

    #[test]
    fn merge_from_combines_waiters() {
        let queue_a = ReturnQueue::shared();
        let queue_b = ReturnQueue::shared();

        let mut first = Packet {
            kind: AccessType::Prefetch,
            lq_depend_on_me: vec![2],
            to_return: vec![ReturnHandle::new(&queue_a)],
            ..Packet::default()
        };
        let second = Packet {
            kind: AccessType::Load,
            lq_depend_on_me: vec![1, 2],
            to_return: vec![ReturnHandle::new(&queue_a), ReturnHandle::new(&queue_b)],
            ..Packet::default()
        };

        first.merge_from(second);
        assert_eq!(first.lq_depend_on_me, vec![1, 2]);
        assert_eq!(first.to_return.len(), 2);
        assert_eq!(first.kind, AccessType::Load);
    }
}
