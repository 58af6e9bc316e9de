use super::{tick_queues, MockMemory};
use crate::arch::Address;
use crate::base::behavior::Operable;
use crate::base::channel::{ReturnHandle, ReturnQueue, ReturnQueueRef};
use crate::base::packet::{AccessType, Packet};
use crate::mem::ptw::{PageTableWalker, PtwConfig};
use crate::mem::vmem::{VirtualMemory, VmemConfig, VmemRef};

struct Testbench {
    ptw: PageTableWalker,
    lower: MockMemory,
    upstream: ReturnQueueRef,
    levels: usize,
}

impl Testbench {
    fn new() -> Self {
        let vmem_cfg = VmemConfig {
            levels: 5,
            ..VmemConfig::default()
        };
        let vmem: VmemRef =
            std::sync::Arc::new(std::sync::RwLock::new(VirtualMemory::new(&vmem_cfg)));
        let lower = MockMemory::new(5);
        let ptw = PageTableWalker::new(PtwConfig::default(), lower.channel(), vmem);
        Self {
            ptw,
            lower,
            upstream: ReturnQueue::shared(),
            levels: vmem_cfg.levels,
        }
    }

    fn issue(&mut self, asid: u16) -> bool {
        let packet = Packet {
            v_address: Address::new(0xdead_beef_dead_beef),
            asid,
            kind: AccessType::Translation,
            to_return: vec![ReturnHandle::new(&self.upstream)],
            ..Packet::default()
        };
        self.ptw.channel().issue_read(packet)
    }

    fn cycle(&mut self) {
        let ptw_channel = self.ptw.channel();
        let lower_channel = self.lower.channel();
        let ptw_returns = self.ptw.return_queue();
        tick_queues(
            &[&ptw_channel, &lower_channel],
            &[&ptw_returns, &self.upstream.clone()],
        );
        self.lower.operate();
        self.ptw.operate_one();
    }

    fn run(&mut self, cycles: usize) {
        for _ in 0..cycles {
            self.cycle();
        }
    }

    fn responses(&self) -> usize {
        self.upstream
            .read()
            .expect("return queue poisoned")
            .visible()
    }
}

/// Two walks for the same address in different address spaces, far apart in
/// time, each take a full set of downstream reads.
#[test]
fn two_asids_produce_two_full_walks() {
    let mut tb = Testbench::new();
    assert!(tb.issue(0));
    tb.run(10_000);
    assert!(tb.issue(1));
    tb.run(10_000);

    assert_eq!(tb.lower.reads_seen, 2 * tb.levels);
    assert_eq!(tb.responses(), 2);
}

/// The same two walks issued in the same cycle proceed concurrently and
/// still produce a full set of reads each.
#[test]
fn simultaneous_walks_do_not_share_table_entries() {
    let mut tb = Testbench::new();
    assert!(tb.issue(0));
    assert!(tb.issue(1));
    tb.run(10_000);

    assert_eq!(tb.lower.reads_seen, 2 * tb.levels);
    assert_eq!(tb.responses(), 2);
}

/// Walks for the same (asid, vpn) coalesce into one set of reads while
/// every requester still gets its answer.
#[test]
fn same_page_walks_coalesce() {
    let mut tb = Testbench::new();
    let other_waiter = ReturnQueue::shared();
    assert!(tb.issue(0));
    let duplicate = Packet {
        v_address: Address::new(0xdead_beef_dead_beef),
        asid: 0,
        kind: AccessType::Translation,
        to_return: vec![ReturnHandle::new(&other_waiter)],
        ..Packet::default()
    };
    assert!(tb.ptw.channel().issue_read(duplicate));
    for _ in 0..10_000 {
        let ptw_channel = tb.ptw.channel();
        let lower_channel = tb.lower.channel();
        let ptw_returns = tb.ptw.return_queue();
        tick_queues(
            &[&ptw_channel, &lower_channel],
            &[&ptw_returns, &tb.upstream.clone(), &other_waiter],
        );
        tb.lower.operate();
        tb.ptw.operate_one();
    }

    assert_eq!(tb.lower.reads_seen, tb.levels);
    assert_eq!(tb.responses(), 1);
    assert_eq!(other_waiter.read().unwrap().visible(), 1);
}

/// The response carries the translated physical address, stable across
/// repeated walks of the same page.
#[test]
fn translations_are_stable() {
    let mut tb = Testbench::new();
    assert!(tb.issue(0));
    tb.run(10_000);
    let first = {
        let mut queue = tb.upstream.write().unwrap();
        queue.pop().expect("walk completed")
    };
    assert_ne!(first.data.raw(), 0);

    assert!(tb.issue(0));
    tb.run(10_000);
    let second = {
        let mut queue = tb.upstream.write().unwrap();
        queue.pop().expect("walk completed")
    };
    assert_eq!(first.data, second.data);
}
