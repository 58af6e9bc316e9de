use std::collections::VecDeque;

use log::debug;
use serde::Deserialize;

use crate::arch::{Address, BlockNumber};
use crate::base::behavior::{Cycle, Operable, OperableBase};
use crate::base::channel::{ChannelRef, ReturnHandle, ReturnQueue, ReturnQueueRef};
use crate::base::packet::{AccessType, Packet};
use crate::mem::mshr::{MshrOutcome, MshrTable};
use crate::modules::prefetch::{BranchHintQueue, PrefetchApi};
use crate::modules::{CacheModuleBuilder, PrefetcherHost, ReplacementHost};
use crate::modules::{prefetch, replacement};
use crate::sim::config::Config;
use crate::sim::stats::CacheStats;

#[derive(Debug, Clone, Copy)]
pub struct CacheShape {
    pub sets: usize,
    pub ways: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub name: String,
    pub sets: usize,
    pub ways: usize,
    pub mshr_size: usize,
    pub hit_latency: Cycle,
    pub fill_latency: Cycle,
    pub max_read_per_cycle: usize,
    pub max_write_per_cycle: usize,
    pub max_tag_check_per_cycle: usize,
    pub rq_size: usize,
    pub wq_size: usize,
    pub pq_size: usize,
    pub virtual_prefetch: bool,
    pub replacement: String,
    pub prefetcher: String,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            sets: 64,
            ways: 8,
            mshr_size: 16,
            hit_latency: 4,
            fill_latency: 1,
            max_read_per_cycle: 2,
            max_write_per_cycle: 2,
            max_tag_check_per_cycle: 4,
            rq_size: 32,
            wq_size: 32,
            pq_size: 16,
            virtual_prefetch: false,
            replacement: "lru".to_string(),
            prefetcher: "no".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn l1i(cpu: usize) -> Self {
        Self {
            name: format!("cpu{cpu}_L1I"),
            sets: 64,
            ways: 8,
            mshr_size: 8,
            hit_latency: 3,
            virtual_prefetch: true,
            ..Self::default()
        }
    }

    pub fn l1d(cpu: usize) -> Self {
        Self {
            name: format!("cpu{cpu}_L1D"),
            sets: 64,
            ways: 12,
            mshr_size: 16,
            hit_latency: 4,
            ..Self::default()
        }
    }

    pub fn l2(cpu: usize) -> Self {
        Self {
            name: format!("cpu{cpu}_L2C"),
            sets: 1024,
            ways: 8,
            mshr_size: 32,
            hit_latency: 9,
            max_tag_check_per_cycle: 2,
            max_read_per_cycle: 1,
            max_write_per_cycle: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheBlock {
    pub valid: bool,
    pub prefetch: bool,
    pub dirty: bool,
    pub address: Address,
    pub v_address: Address,
    pub ip: Address,
    pub cpu: usize,
    pub pf_metadata: u32,
}

/// Prefetch requests queued by the hooks during one cycle, issued into the
/// cache's own prefetch queue afterwards.
struct PrefetchContext<'a> {
    queued: &'a mut Vec<(Address, bool, u32)>,
    occupancy_ratio: f64,
}

impl PrefetchApi for PrefetchContext<'_> {
    fn prefetch_line(&mut self, addr: Address, fill_this_level: bool, metadata: u32) -> bool {
        self.queued.push((addr, fill_this_level, metadata));
        true
    }

    fn mshr_occupancy_ratio(&self) -> f64 {
        self.occupancy_ratio
    }
}

/// A non-blocking, MSHR-limited cache level.
pub struct Cache {
    pub base: OperableBase,
    cfg: CacheConfig,
    channel: ChannelRef,
    lower: ChannelRef,
    lower_returns: ReturnQueueRef,
    blocks: Vec<CacheBlock>,
    mshr: MshrTable,
    hit_inflight: VecDeque<Packet>,
    replacement: ReplacementHost,
    prefetcher: PrefetcherHost,
    pending_prefetches: Vec<(Address, bool, u32)>,
    branch_hints: BranchHintQueue,
    pub stats: CacheStats,
}

impl Cache {
    pub fn new(cfg: CacheConfig, lower: ChannelRef) -> Self {
        assert!(cfg.sets > 0 && cfg.ways > 0, "{}: zero-sized cache dimension", cfg.name);
        let shape = CacheShape {
            sets: cfg.sets,
            ways: cfg.ways,
        };
        let modules = CacheModuleBuilder::new()
            .replacement(replacement::by_name(&cfg.replacement, &shape))
            .prefetcher(prefetch::by_name(&cfg.prefetcher))
            .build(&shape);
        Self {
            base: OperableBase::default(),
            channel: ChannelRef::new(cfg.rq_size, cfg.wq_size, cfg.pq_size),
            lower,
            lower_returns: ReturnQueue::shared(),
            blocks: vec![CacheBlock::default(); cfg.sets * cfg.ways],
            mshr: MshrTable::new(cfg.mshr_size),
            hit_inflight: VecDeque::new(),
            replacement: modules.replacement,
            prefetcher: modules.prefetcher,
            pending_prefetches: Vec::new(),
            branch_hints: prefetch::branch_hint_queue(),
            stats: CacheStats::default(),
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
        self.lower_returns.clone()
    }

    /// Handle a core uses to forward observed branches to this cache's
    /// prefetcher.
    pub fn branch_hint_queue(&self) -> BranchHintQueue {
        self.branch_hints.clone()
    }

    fn set_of(&self, addr: Address) -> usize {
        (BlockNumber::from_slice(addr).raw() as usize) % self.cfg.sets
    }

    fn probe(&self, addr: Address) -> Option<usize> {
        let set = self.set_of(addr);
        let line = BlockNumber::from_slice(addr);
        let begin = set * self.cfg.ways;
        (0..self.cfg.ways).find_map(|way| {
            let block = &self.blocks[begin + way];
            (block.valid && BlockNumber::from_slice(block.address) == line).then_some(begin + way)
        })
    }

    /// Demand accesses train the prefetcher; prefetch traffic does not, so
    /// a prefetcher cannot chain off its own requests.
    fn invoke_cache_operate(&mut self, packet: &Packet, hit: bool, useful_prefetch: bool) -> u32 {
        if packet.kind == AccessType::Prefetch {
            return packet.pf_metadata;
        }
        let mut api = PrefetchContext {
            queued: &mut self.pending_prefetches,
            occupancy_ratio: self.mshr.occupancy_ratio(),
        };
        self.prefetcher.cache_operate(
            &mut api,
            packet.address,
            packet.ip,
            hit,
            useful_prefetch,
            packet.kind,
            packet.pf_metadata,
        )
    }

    // ---- stage 0: downstream responses arm the MSHR ----

    fn handle_lower_returns(&mut self) {
        let now = self.base.cycle;
        // During warmup the arrays warm without timing fidelity.
        let fill_latency = if self.base.warmup {
            0
        } else {
            self.cfg.fill_latency
        };
        loop {
            let response = {
                let mut queue = self.lower_returns.write().expect("return queue poisoned");
                queue.pop()
            };
            let Some(response) = response else { break };
            let line = BlockNumber::from_slice(response.address).raw();
            if !self.mshr.mark_ready(line, now + fill_latency) {
                debug!("{}: orphan fill for line {line:#x}", self.cfg.name);
            }
        }
    }

    // ---- stage 1: fills ----

    fn handle_fill(&mut self) {
        let now = self.base.cycle;
        for line in self.mshr.ready_lines(now) {
            if !self.try_fill(line) {
                break;
            }
        }
    }

    fn try_fill(&mut self, line: u64) -> bool {
        let now = self.base.cycle;
        let packet = {
            let entry = self.mshr.remove(line).expect("ready line vanished");
            entry.packet
        };
        let set = self.set_of(packet.address);
        let begin = set * self.cfg.ways;
        let way = {
            let set_blocks = &self.blocks[begin..begin + self.cfg.ways];
            self.replacement.find_victim(
                packet.cpu,
                packet.instr_id,
                set,
                set_blocks,
                packet.ip,
                packet.address,
                packet.kind,
            )
        };
        assert!(way < self.cfg.ways, "replacement returned an illegal way");

        let victim = self.blocks[begin + way].clone();
        if victim.valid && victim.dirty {
            let writeback = Packet {
                address: victim.address,
                v_address: victim.v_address,
                cpu: victim.cpu,
                kind: AccessType::Write,
                event_cycle: now,
                ..Packet::default()
            };
            if !self.lower.issue_write(writeback) {
                // Downstream write queue is full; retry the fill next cycle.
                let line_restored = self.mshr.allocate(line, packet);
                debug_assert!(line_restored == MshrOutcome::Allocated);
                self.mshr.mark_ready(line, now);
                return false;
            }
            self.stats.writebacks += 1;
        }

        let victim_addr = victim.valid.then_some(victim.address).unwrap_or_default();
        self.blocks[begin + way] = CacheBlock {
            valid: true,
            prefetch: packet.kind == AccessType::Prefetch,
            dirty: packet.kind == AccessType::Write,
            address: packet.address,
            v_address: packet.v_address,
            ip: packet.ip,
            cpu: packet.cpu,
            pf_metadata: packet.pf_metadata,
        };
        if packet.kind == AccessType::Prefetch {
            self.stats.prefetch_filled += 1;
        }

        let metadata = {
            let mut api = PrefetchContext {
                queued: &mut self.pending_prefetches,
                occupancy_ratio: self.mshr.occupancy_ratio(),
            };
            self.prefetcher.cache_fill(
                &mut api,
                packet.address,
                set,
                way,
                packet.kind == AccessType::Prefetch,
                victim_addr,
                packet.pf_metadata,
            )
        };
        self.blocks[begin + way].pf_metadata = metadata;
        self.replacement.update_replacement_state(
            packet.cpu,
            set,
            way,
            packet.address,
            packet.ip,
            victim_addr,
            packet.kind,
            false,
        );

        // Satisfy every waiter in one cycle.
        let mut response = packet.clone();
        response.event_cycle = now;
        for target in &packet.to_return {
            target.push(response.clone());
        }
        true
    }

    // ---- stage 2: writebacks from upstream ----

    fn handle_writeback(&mut self) {
        for _ in 0..self.cfg.max_write_per_cycle {
            let Some(packet) = self.channel.with(|ch| ch.wq.front().cloned()) else {
                break;
            };
            match self.probe(packet.address) {
                Some(index) => {
                    self.stats.hits[AccessType::Write.index()] += 1;
                    let set = index / self.cfg.ways;
                    let way = index % self.cfg.ways;
                    let block = &mut self.blocks[index];
                    block.dirty = true;
                    let block_addr = block.address;
                    self.replacement.update_replacement_state(
                        packet.cpu,
                        set,
                        way,
                        block_addr,
                        packet.ip,
                        Address::default(),
                        AccessType::Write,
                        true,
                    );
                }
                None => {
                    // Non-inclusive: forward the write toward memory.
                    if !self.lower.issue_write(packet.clone()) {
                        break;
                    }
                    self.stats.misses[AccessType::Write.index()] += 1;
                }
            }
            self.channel.with(|ch| ch.wq.pop());
        }
    }

    // ---- stages 3 and 4: reads, RFOs, prefetches ----

    fn handle_read(&mut self, tag_budget: &mut usize) {
        for _ in 0..self.cfg.max_read_per_cycle {
            if *tag_budget == 0 {
                break;
            }
            let Some(packet) = self.channel.with(|ch| ch.rq.front().cloned()) else {
                break;
            };
            if !self.access_block(packet) {
                break;
            }
            *tag_budget -= 1;
            self.channel.with(|ch| ch.rq.pop());
        }
    }

    fn handle_prefetch(&mut self, tag_budget: &mut usize) {
        while *tag_budget > 0 {
            let Some(packet) = self.channel.with(|ch| ch.pq.front().cloned()) else {
                break;
            };
            // A speculative prefetch with nobody waiting on it may be shed
            // under MSHR pressure; a forwarded miss carries waiters and
            // must be serviced.
            let drop_it = packet.to_return.is_empty()
                && !self.mshr.has_entry(BlockNumber::from_slice(packet.address).raw())
                && self.mshr.occupancy_ratio() > 0.5;
            if drop_it {
                self.stats.prefetch_dropped += 1;
                self.channel.with(|ch| ch.pq.pop());
                continue;
            }
            if !self.access_block(packet) {
                break;
            }
            *tag_budget -= 1;
            self.channel.with(|ch| ch.pq.pop());
        }
    }

    /// Tag-check one packet. Returns false when the packet could not be
    /// consumed this cycle (MSHR or downstream back-pressure).
    fn access_block(&mut self, packet: Packet) -> bool {
        let now = self.base.cycle;
        let line = BlockNumber::from_slice(packet.address).raw();
        match self.probe(packet.address) {
            Some(index) => {
                self.stats.hits[packet.kind.index()] += 1;
                let set = index / self.cfg.ways;
                let way = index % self.cfg.ways;
                let useful = self.blocks[index].prefetch && packet.kind != AccessType::Prefetch;
                if useful {
                    self.stats.prefetch_useful += 1;
                    self.blocks[index].prefetch = false;
                }
                let metadata = self.invoke_cache_operate(&packet, true, useful);
                self.blocks[index].pf_metadata = metadata;
                if packet.kind == AccessType::Rfo {
                    self.blocks[index].dirty = true;
                }
                let block_addr = self.blocks[index].address;
                self.replacement.update_replacement_state(
                    packet.cpu,
                    set,
                    way,
                    block_addr,
                    packet.ip,
                    Address::default(),
                    packet.kind,
                    true,
                );
                let hit_latency = if self.base.warmup {
                    0
                } else {
                    self.cfg.hit_latency
                };
                let mut response = packet;
                response.event_cycle = now + hit_latency;
                self.hit_inflight.push_back(response);
                true
            }
            None => {
                if !self.mshr.can_allocate(line) {
                    self.stats.mshr_full_stalls += 1;
                    return false;
                }
                if !self.mshr.has_entry(line) {
                    let forward = Packet {
                        address: packet.address,
                        v_address: packet.v_address,
                        ip: packet.ip,
                        instr_id: packet.instr_id,
                        asid: packet.asid,
                        cpu: packet.cpu,
                        kind: packet.kind,
                        pf_metadata: packet.pf_metadata,
                        prefetch_from_this_level: packet.kind == AccessType::Prefetch,
                        event_cycle: now,
                        to_return: vec![ReturnHandle::new(&self.lower_returns)],
                        ..Packet::default()
                    };
                    let accepted = if packet.kind == AccessType::Prefetch {
                        self.lower.issue_prefetch(forward)
                    } else {
                        self.lower.issue_read(forward)
                    };
                    if !accepted {
                        return false;
                    }
                }
                self.stats.misses[packet.kind.index()] += 1;
                self.invoke_cache_operate(&packet, false, false);
                match self.mshr.allocate(line, packet) {
                    MshrOutcome::Coalesced => self.stats.mshr_merged += 1,
                    MshrOutcome::Allocated => {}
                    MshrOutcome::Full => unreachable!("capacity checked above"),
                }
                true
            }
        }
    }

    // ---- epilogue ----

    fn handle_branch_hints(&mut self) {
        let hints = {
            let mut queue = self.branch_hints.write().expect("hint queue poisoned");
            std::mem::take(&mut *queue)
        };
        for hint in hints {
            self.prefetcher
                .branch_operate(hint.ip, hint.branch_type, hint.target);
        }
    }

    fn issue_pending_prefetches(&mut self) {
        let now = self.base.cycle;
        let pending = std::mem::take(&mut self.pending_prefetches);
        for (addr, fill_this_level, metadata) in pending {
            let packet = Packet {
                address: addr,
                v_address: addr,
                kind: AccessType::Prefetch,
                pf_metadata: metadata,
                prefetch_from_this_level: true,
                event_cycle: now,
                ..Packet::default()
            };
            // fill_this_level routes the prefetch into this cache's own
            // queue; otherwise it fills the next level down.
            let accepted = if fill_this_level {
                self.channel.issue_prefetch(packet)
            } else {
                self.lower.issue_prefetch(packet)
            };
            if accepted {
                self.stats.prefetch_issued += 1;
            }
        }
    }

    fn drain_hit_responses(&mut self) {
        let now = self.base.cycle;
        while let Some(front) = self.hit_inflight.front() {
            if front.event_cycle > now {
                break;
            }
            let response = self.hit_inflight.pop_front().expect("front checked");
            for target in &response.to_return {
                target.push(response.clone());
            }
        }
    }

    pub fn final_stats(&mut self) {
        self.replacement.final_stats();
        self.prefetcher.final_stats();
    }
}

impl Operable for Cache {
    fn base(&mut self) -> &mut OperableBase {
        &mut self.base
    }

    fn base_ref(&self) -> &OperableBase {
        &self.base
    }

    fn operate(&mut self) {
        self.handle_lower_returns();
        self.handle_fill();
        self.handle_writeback();
        let mut tag_budget = self.cfg.max_tag_check_per_cycle;
        self.handle_read(&mut tag_budget);
        self.handle_prefetch(&mut tag_budget);
        self.handle_branch_hints();
        {
            let mut api = PrefetchContext {
                queued: &mut self.pending_prefetches,
                occupancy_ratio: self.mshr.occupancy_ratio(),
            };
            self.prefetcher.cycle_operate(&mut api);
        }
        self.issue_pending_prefetches();
        self.drain_hit_responses();
    }
}
