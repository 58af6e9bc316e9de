mod dram_tests;
mod ptw_tests;

use crate::base::behavior::Cycle;
use crate::base::channel::{ChannelRef, Clocked, ReturnQueueRef};
use crate::base::packet::Packet;

/// A lower level that answers every read after a fixed latency and counts
/// what it saw.
pub(crate) struct MockMemory {
    channel: ChannelRef,
    inflight: Vec<(Cycle, Packet)>,
    pub(crate) reads_seen: usize,
    pub(crate) writes_seen: usize,
    latency: Cycle,
    cycle: Cycle,
}

impl MockMemory {
    pub(crate) fn new(latency: Cycle) -> Self {
        Self {
            channel: ChannelRef::new(64, 64, 64),
            inflight: Vec::new(),
            reads_seen: 0,
            writes_seen: 0,
            latency,
            cycle: 0,
        }
    }

    pub(crate) fn channel(&self) -> ChannelRef {
        self.channel.clone()
    }

    pub(crate) fn operate(&mut self) {
        let now = self.cycle;
        let (mut reads, mut writes) = (Vec::new(), Vec::new());
        self.channel.with(|ch| {
            while let Some(packet) = ch.rq.pop() {
                reads.push(packet);
            }
            while let Some(packet) = ch.pq.pop() {
                reads.push(packet);
            }
            while let Some(packet) = ch.wq.pop() {
                writes.push(packet);
            }
        });
        self.reads_seen += reads.len();
        self.writes_seen += writes.len();
        for packet in reads {
            self.inflight.push((now + self.latency, packet));
        }

        let mut index = 0;
        while index < self.inflight.len() {
            if self.inflight[index].0 <= now {
                let (_, packet) = self.inflight.remove(index);
                let mut response = packet.clone();
                response.event_cycle = now;
                for target in &packet.to_return {
                    target.push(response.clone());
                }
            } else {
                index += 1;
            }
        }
        self.cycle += 1;
    }
}

/// Swap every double-buffered queue in the harness, making this cycle's
/// writes visible.
pub(crate) fn tick_queues(channels: &[&ChannelRef], returns: &[&ReturnQueueRef]) {
    for channel in channels {
        channel.with(|ch| ch.tick());
    }
    for queue in returns {
        queue.write().expect("return queue poisoned").tick();
    }
}
