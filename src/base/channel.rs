use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::arch::BlockNumber;
use crate::base::packet::Packet;

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(0);

fn next_queue_id() -> usize {
    NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Anything with a front/back buffer pair that swaps at the global tick.
pub trait Clocked {
    fn tick(&mut self);
}

/// A bounded FIFO with single-cycle visibility: producers append to the back
/// buffer, consumers drain the front, and the scheduler swaps at cycle tick.
#[derive(Debug, Default)]
pub struct BoundedQueue {
    capacity: usize,
    coalesce: bool,
    current: VecDeque<Packet>,
    incoming: VecDeque<Packet>,
}

impl BoundedQueue {
    fn new(capacity: usize, coalesce: bool) -> Self {
        Self {
            capacity,
            coalesce,
            current: VecDeque::new(),
            incoming: VecDeque::new(),
        }
    }

    pub fn occupancy(&self) -> usize {
        self.current.len() + self.incoming.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    /// Append a packet, coalescing with an in-flight request to the same
    /// line when this queue allows it. Returns false when full.
    pub fn issue(&mut self, packet: Packet) -> Result<bool, Packet> {
        if self.coalesce {
            let found = self
                .current
                .iter_mut()
                .chain(self.incoming.iter_mut())
                .find(|queued| coalesce_match(queued, &packet));
            if let Some(queued) = found {
                queued.merge_from(packet);
                return Ok(true);
            }
        }
        if self.occupancy() >= self.capacity {
            return Err(packet);
        }
        self.incoming.push_back(packet);
        Ok(false)
    }

    /// Packets visible to the consumer this cycle.
    pub fn front(&self) -> Option<&Packet> {
        self.current.front()
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.current.pop_front()
    }

    pub fn visible(&self) -> usize {
        self.current.len()
    }
}

impl Clocked for BoundedQueue {
    fn tick(&mut self) {
        self.current.append(&mut self.incoming);
    }
}

/// Two queued requests coalesce when they name the same unit of work:
/// the same physical line for data accesses, the same `(asid, page)` for
/// translations. Translations never merge with data accesses.
fn coalesce_match(queued: &Packet, packet: &Packet) -> bool {
    use crate::arch::PageNumber;
    use crate::base::packet::AccessType;

    let queued_xlat = queued.kind == AccessType::Translation;
    let packet_xlat = packet.kind == AccessType::Translation;
    if queued_xlat != packet_xlat {
        return false;
    }
    if packet_xlat {
        queued.asid == packet.asid
            && PageNumber::from_slice(queued.v_address) == PageNumber::from_slice(packet.v_address)
    } else {
        BlockNumber::from_slice(queued.address) == BlockNumber::from_slice(packet.address)
    }
}

/// The request side of a component: read, write, and prefetch queues.
#[derive(Debug)]
pub struct RequestChannel {
    id: usize,
    pub rq: BoundedQueue,
    pub wq: BoundedQueue,
    pub pq: BoundedQueue,
    /// Requests folded into an already-queued packet for the same line.
    pub coalesced: u64,
}

impl RequestChannel {
    pub fn new(rq_size: usize, wq_size: usize, pq_size: usize) -> Self {
        Self {
            id: next_queue_id(),
            rq: BoundedQueue::new(rq_size, true),
            wq: BoundedQueue::new(wq_size, false),
            pq: BoundedQueue::new(pq_size, true),
            coalesced: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

impl Clocked for RequestChannel {
    fn tick(&mut self) {
        self.rq.tick();
        self.wq.tick();
        self.pq.tick();
    }
}

/// Cloneable handle to a request channel, shared by the owning component and
/// every upstream issuer.
#[derive(Clone)]
pub struct ChannelRef(Arc<RwLock<RequestChannel>>);

impl ChannelRef {
    pub fn new(rq_size: usize, wq_size: usize, pq_size: usize) -> Self {
        Self(Arc::new(RwLock::new(RequestChannel::new(
            rq_size, wq_size, pq_size,
        ))))
    }

    pub fn id(&self) -> usize {
        self.0.read().expect("channel lock poisoned").id()
    }

    pub fn issue_read(&self, packet: Packet) -> bool {
        self.with(|ch| match ch.rq.issue(packet) {
            Ok(coalesced) => {
                if coalesced {
                    ch.coalesced += 1;
                }
                true
            }
            Err(_) => false,
        })
    }

    pub fn issue_write(&self, packet: Packet) -> bool {
        self.with(|ch| ch.wq.issue(packet).is_ok())
    }

    pub fn issue_prefetch(&self, packet: Packet) -> bool {
        self.with(|ch| match ch.pq.issue(packet) {
            Ok(coalesced) => {
                if coalesced {
                    ch.coalesced += 1;
                }
                true
            }
            Err(_) => false,
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut RequestChannel) -> R) -> R {
        f(&mut self.0.write().expect("channel lock poisoned"))
    }
}

/// Where completions land. Double-buffered like the request queues.
#[derive(Debug, Default)]
pub struct ReturnQueue {
    id: usize,
    current: VecDeque<Packet>,
    incoming: VecDeque<Packet>,
}

pub type ReturnQueueRef = Arc<RwLock<ReturnQueue>>;

impl ReturnQueue {
    pub fn shared() -> ReturnQueueRef {
        Arc::new(RwLock::new(ReturnQueue {
            id: next_queue_id(),
            current: VecDeque::new(),
            incoming: VecDeque::new(),
        }))
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.current.pop_front()
    }

    pub fn visible(&self) -> usize {
        self.current.len()
    }
}

impl Clocked for ReturnQueue {
    fn tick(&mut self) {
        self.current.append(&mut self.incoming);
    }
}

/// Cheap cloneable address of a return queue. Identity is the queue id, so
/// dependency merges can dedup handles.
#[derive(Clone)]
pub struct ReturnHandle {
    id: usize,
    queue: ReturnQueueRef,
}

impl ReturnHandle {
    pub fn new(queue: &ReturnQueueRef) -> Self {
        Self {
            id: queue.read().expect("return queue lock poisoned").id,
            queue: queue.clone(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn push(&self, packet: Packet) {
        self.queue
            .write()
            .expect("return queue lock poisoned")
            .incoming
            .push_back(packet);
    }
}

impl std::fmt::Debug for ReturnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReturnHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Address;
    use crate::base::packet::AccessType;

    fn read_packet(addr: u64) -> Packet {
        Packet {
            address: Address::new(addr),
            kind: AccessType::Load,
            ..Packet::default()
        }
    }

    #[test]
    fn issued_packets_become_visible_only_after_tick() {
        let mut channel = RequestChannel::new(4, 4, 4);
        assert!(channel.rq.issue(read_packet(0x40)).is_ok());
        assert!(channel.rq.front().is_none(), "visible in the issue cycle");
        channel.tick();
        assert!(channel.rq.front().is_some());
    }

    #[test]
    fn full_queue_backpressures() {
        let mut channel = RequestChannel::new(2, 2, 2);
        assert!(channel.rq.issue(read_packet(0x40)).is_ok());
        assert!(channel.rq.issue(read_packet(0x80)).is_ok());
        assert!(channel.rq.issue(read_packet(0xc0)).is_err());
        channel.tick();
        channel.rq.pop();
        assert!(channel.rq.issue(read_packet(0xc0)).is_ok());
    }

    #[test]
    fn same_line_reads_coalesce() {
        let mut channel = RequestChannel::new(1, 1, 1);
        let mut first = read_packet(0x40);
        first.lq_depend_on_me = vec![0];
        let mut second = read_packet(0x44);
        second.lq_depend_on_me = vec![3];

        assert!(matches!(channel.rq.issue(first), Ok(false)));
        assert!(matches!(channel.rq.issue(second), Ok(true)));
        channel.tick();
        let merged = channel.rq.pop().expect("one merged packet");
        assert_eq!(merged.lq_depend_on_me, vec![0, 3]);
        assert!(channel.rq.pop().is_none());
    }

    #[test]
    fn return_queue_roundtrip() {
        let queue = ReturnQueue::shared();
        let handle = ReturnHandle::new(&queue);
        handle.push(read_packet(0x40));
        {
            let mut locked = queue.write().unwrap();
            assert!(locked.pop().is_none());
            locked.tick();
            assert!(locked.pop().is_some());
        }
    }
}
