use log::debug;
use serde::Deserialize;

use crate::arch::{Address, BlockNumber, PageNumber};
use crate::base::behavior::{Cycle, Operable, OperableBase};
use crate::base::channel::{ChannelRef, ReturnHandle, ReturnQueue, ReturnQueueRef};
use crate::base::packet::{AccessType, Packet};
use crate::mem::vmem::VmemRef;
use crate::sim::config::Config;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PtwConfig {
    pub name: String,
    /// Concurrent walks, MSHR-style.
    pub walk_limit: usize,
    pub rq_size: usize,
}

impl Config for PtwConfig {}

impl Default for PtwConfig {
    fn default() -> Self {
        Self {
            name: "ptw".to_string(),
            walk_limit: 8,
            rq_size: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    NeedIssue,
    Pending,
    Done,
}

/// One in-flight translation.
struct Walk {
    packet: Packet,
    asid: u16,
    vpn: u64,
    /// Page-table level of the next (or outstanding) read, counting down.
    level: usize,
    state: WalkState,
    pending_addr: Address,
    faulted: bool,
    result: Address,
    finish_at: Cycle,
}

/// Multi-level page-table walker.
///
/// Each translation performs one read per table level through the attached
/// cache hierarchy. Walks for the same `(asid, vpn)` coalesce; distinct
/// ASIDs never share table entries.
pub struct PageTableWalker {
    pub base: OperableBase,
    cfg: PtwConfig,
    channel: ChannelRef,
    lower: ChannelRef,
    returns: ReturnQueueRef,
    vmem: VmemRef,
    walks: Vec<Walk>,
}

impl PageTableWalker {
    pub fn new(cfg: PtwConfig, lower: ChannelRef, vmem: VmemRef) -> Self {
        Self {
            base: OperableBase::default(),
            channel: ChannelRef::new(cfg.rq_size, 1, 1),
            lower,
            returns: ReturnQueue::shared(),
            vmem,
            walks: Vec::new(),
            cfg,
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn channel(&self) -> ChannelRef {
        self.channel.clone()
    }

    pub fn return_queue(&self) -> ReturnQueueRef {
        self.returns.clone()
    }

    fn accept_requests(&mut self) {
        let channel = self.channel.clone();
        channel.with(|ch| {
            while let Some(front) = ch.rq.front() {
                let asid = front.asid;
                let vpn = PageNumber::from_slice(front.v_address).raw();
                if let Some(walk) = self
                    .walks
                    .iter_mut()
                    .find(|walk| walk.asid == asid && walk.vpn == vpn)
                {
                    let packet = ch.rq.pop().expect("front checked");
                    walk.packet.merge_from(packet);
                    continue;
                }
                if self.walks.len() >= self.cfg.walk_limit {
                    break;
                }
                let packet = ch.rq.pop().expect("front checked");
                let levels = self.vmem.read().expect("vmem lock poisoned").levels();
                debug!(
                    "{}: walk start asid {} vpn {vpn:#x}",
                    self.cfg.name, asid
                );
                self.walks.push(Walk {
                    packet,
                    asid,
                    vpn,
                    level: levels,
                    state: WalkState::NeedIssue,
                    pending_addr: Address::default(),
                    faulted: false,
                    result: Address::default(),
                    finish_at: 0,
                });
            }
        });
    }

    fn handle_responses(&mut self) {
        let now = self.base.cycle;
        loop {
            let response = {
                let mut queue = self.returns.write().expect("return queue poisoned");
                queue.pop()
            };
            let Some(response) = response else { break };
            let line = BlockNumber::from_slice(response.address);
            let mut completed: Vec<usize> = Vec::new();
            for (index, walk) in self.walks.iter_mut().enumerate() {
                if walk.state != WalkState::Pending
                    || BlockNumber::from_slice(walk.pending_addr) != line
                {
                    continue;
                }
                walk.level -= 1;
                if walk.level == 0 {
                    completed.push(index);
                } else {
                    walk.state = WalkState::NeedIssue;
                }
            }
            for index in completed {
                let walk = &mut self.walks[index];
                let (pa, fault) = self
                    .vmem
                    .write()
                    .expect("vmem lock poisoned")
                    .va_to_pa(walk.asid, walk.packet.v_address);
                walk.faulted |= fault;
                walk.result = pa;
                let penalty = if walk.faulted {
                    self.vmem
                        .read()
                        .expect("vmem lock poisoned")
                        .minor_fault_penalty()
                } else {
                    0
                };
                walk.state = WalkState::Done;
                walk.finish_at = now + penalty;
            }
        }
    }

    fn issue_reads(&mut self) {
        let now = self.base.cycle;
        for walk in &mut self.walks {
            if walk.state != WalkState::NeedIssue {
                continue;
            }
            let (pte_addr, fault) = self
                .vmem
                .write()
                .expect("vmem lock poisoned")
                .get_pte_pa(walk.asid, walk.packet.v_address, walk.level);
            let read = Packet {
                address: pte_addr,
                v_address: walk.packet.v_address,
                asid: walk.asid,
                cpu: walk.packet.cpu,
                kind: AccessType::Load,
                event_cycle: now,
                to_return: vec![ReturnHandle::new(&self.returns)],
                ..Packet::default()
            };
            if self.lower.issue_read(read) {
                walk.faulted |= fault;
                walk.pending_addr = pte_addr;
                walk.state = WalkState::Pending;
            }
        }
    }

    fn finish_walks(&mut self) {
        let now = self.base.cycle;
        let mut index = 0;
        while index < self.walks.len() {
            let walk = &self.walks[index];
            if walk.state != WalkState::Done || walk.finish_at > now {
                index += 1;
                continue;
            }
            let walk = self.walks.remove(index);
            let mut response = walk.packet.clone();
            response.data = walk.result;
            response.address = walk.result;
            response.event_cycle = now;
            debug!(
                "{}: walk done asid {} vpn {:#x} -> {}",
                self.cfg.name, walk.asid, walk.vpn, walk.result
            );
            for target in &walk.packet.to_return {
                target.push(response.clone());
            }
        }
    }
}

impl Operable for PageTableWalker {
    fn base(&mut self) -> &mut OperableBase {
        &mut self.base
    }

    fn base_ref(&self) -> &OperableBase {
        &self.base
    }

    fn operate(&mut self) {
        self.handle_responses();
        self.finish_walks();
        self.issue_reads();
        self.accept_requests();
    }
}
