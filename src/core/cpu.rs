use std::collections::VecDeque;

use log::debug;
use serde::Deserialize;

use crate::arch::{Address, BlockNumber, PageNumber, PageOffset};
use crate::base::behavior::{Cycle, Operable, OperableBase};
use crate::base::channel::{ChannelRef, ReturnHandle, ReturnQueue, ReturnQueueRef};
use crate::base::packet::{AccessType, Packet};
use crate::core::instr::{OooInstr, Progress, TraceInstr};
use crate::core::lsq::{LsqEntry, LsqTable};
use crate::modules::branch::{branch_by_name, btb_by_name, BranchHost, BtbHost};
use crate::modules::prefetch::{BranchHint, BranchHintQueue};
use crate::sim::config::Config;
use crate::sim::stats::CpuStats;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub ifetch_buffer_size: usize,
    pub decode_buffer_size: usize,
    pub dispatch_buffer_size: usize,
    pub rob_size: usize,
    pub lq_size: usize,
    pub sq_size: usize,
    pub fetch_width: usize,
    pub decode_width: usize,
    pub dispatch_width: usize,
    pub schedule_width: usize,
    pub execute_width: usize,
    pub lq_width: usize,
    pub sq_width: usize,
    pub retire_width: usize,
    pub decode_latency: Cycle,
    pub dispatch_latency: Cycle,
    pub schedule_latency: Cycle,
    pub execute_latency: Cycle,
    pub mispredict_penalty: Cycle,
    pub branch_predictor: String,
    pub btb: String,
}

impl Config for CoreConfig {}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ifetch_buffer_size: 64,
            decode_buffer_size: 32,
            dispatch_buffer_size: 32,
            rob_size: 352,
            lq_size: 128,
            sq_size: 72,
            fetch_width: 6,
            decode_width: 6,
            dispatch_width: 6,
            schedule_width: 6,
            execute_width: 4,
            lq_width: 2,
            sq_width: 2,
            retire_width: 5,
            decode_latency: 1,
            dispatch_latency: 1,
            schedule_latency: 0,
            execute_latency: 1,
            mispredict_penalty: 1,
            branch_predictor: "bimodal".to_string(),
            btb: "basic_btb".to_string(),
        }
    }
}

/// Downstream ports the core issues into.
pub struct CorePorts {
    pub l1i: ChannelRef,
    pub l1d: ChannelRef,
    pub ptw: ChannelRef,
    /// Branch observations for the instruction cache's prefetcher.
    pub l1i_hints: BranchHintQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    NeedTranslate,
    TranslatePending,
    NeedFetch,
    FetchPending,
}

/// One block-aligned group of instructions moving through the front end.
#[derive(Debug)]
struct FetchGroup {
    v_block: u64,
    asid: u16,
    paddr: Address,
    instr_ids: Vec<u64>,
    state: FetchState,
}

pub struct OooCpu {
    pub base: OperableBase,
    pub cpu: usize,
    cfg: CoreConfig,

    instr_id_seq: u64,
    input_queue: VecDeque<OooInstr>,
    ifetch_buffer: VecDeque<OooInstr>,
    decode_buffer: VecDeque<OooInstr>,
    dispatch_buffer: VecDeque<OooInstr>,
    pub rob: VecDeque<OooInstr>,
    lq: LsqTable,
    sq: LsqTable,
    fetch_groups: Vec<FetchGroup>,

    l1i: ChannelRef,
    l1d: ChannelRef,
    ptw: ChannelRef,
    l1i_hints: BranchHintQueue,
    l1i_returns: ReturnQueueRef,
    l1d_returns: ReturnQueueRef,
    ptw_returns: ReturnQueueRef,

    branch: BranchHost,
    btb: BtbHost,
    /// Mispredicted branch the front end waits on, if any.
    stall_on_branch: Option<u64>,
    fetch_resume_cycle: Cycle,

    pub num_retired: u64,
    pub stats: CpuStats,
    trace_drained: bool,
}

impl OooCpu {
    pub fn new(cpu: usize, cfg: CoreConfig, ports: CorePorts) -> Self {
        let branch = BranchHost::new(branch_by_name(&cfg.branch_predictor));
        let btb = BtbHost::new(btb_by_name(&cfg.btb));
        Self {
            base: OperableBase::default(),
            cpu,
            lq: LsqTable::new(cfg.lq_size),
            sq: LsqTable::new(cfg.sq_size),
            instr_id_seq: 0,
            input_queue: VecDeque::new(),
            ifetch_buffer: VecDeque::new(),
            decode_buffer: VecDeque::new(),
            dispatch_buffer: VecDeque::new(),
            rob: VecDeque::new(),
            fetch_groups: Vec::new(),
            l1i: ports.l1i,
            l1d: ports.l1d,
            ptw: ports.ptw,
            l1i_hints: ports.l1i_hints,
            l1i_returns: ReturnQueue::shared(),
            l1d_returns: ReturnQueue::shared(),
            ptw_returns: ReturnQueue::shared(),
            branch,
            btb,
            stall_on_branch: None,
            fetch_resume_cycle: 0,
            num_retired: 0,
            stats: CpuStats::default(),
            trace_drained: false,
            cfg,
        }
    }

    pub fn return_queues(&self) -> [ReturnQueueRef; 3] {
        [
            self.l1i_returns.clone(),
            self.l1d_returns.clone(),
            self.ptw_returns.clone(),
        ]
    }

    pub fn input_room(&self) -> usize {
        (2 * self.cfg.fetch_width).saturating_sub(self.input_queue.len())
    }

    /// The driver pushes decoded trace records here; `branch_target` is the
    /// next record's ip when the branch was taken.
    pub fn push_instruction(&mut self, trace: &TraceInstr, branch_target: u64) {
        let mut instr = OooInstr::from_trace(trace);
        instr.instr_id = self.instr_id_seq;
        self.instr_id_seq += 1;
        if instr.branch_taken {
            instr.branch_target = Address::new(branch_target);
        }
        self.input_queue.push_back(instr);
    }

    pub fn mark_trace_drained(&mut self) {
        self.trace_drained = true;
    }

    /// Called by the driver at every phase boundary.
    pub fn begin_phase(&mut self, warmup: bool) {
        self.base.warmup = warmup;
        self.trace_drained = false;
    }

    /// All buffers empty: nothing left to simulate on this core.
    pub fn pipeline_empty(&self) -> bool {
        self.trace_drained
            && self.input_queue.is_empty()
            && self.ifetch_buffer.is_empty()
            && self.decode_buffer.is_empty()
            && self.dispatch_buffer.is_empty()
            && self.rob.is_empty()
    }

    fn rob_position(&self, instr_id: u64) -> Option<usize> {
        let first = self.rob.front()?.instr_id;
        if instr_id < first {
            return None;
        }
        let index = (instr_id - first) as usize;
        (index < self.rob.len()).then_some(index)
    }

    // ---- retire ----

    fn retire_rob(&mut self) {
        let now = self.base.cycle;
        for _ in 0..self.cfg.retire_width {
            let Some(head) = self.rob.front() else { break };
            if head.executed != Progress::Completed {
                break;
            }
            // Stores drain to the data cache at retirement and must be
            // accepted before the entry can leave the ROB.
            let mut store_blocked = false;
            for &sq_index in &head.sq_indices {
                // Entries drained on an earlier, partially blocked attempt
                let Some(entry) = self.sq.get(sq_index) else {
                    continue;
                };
                let packet = Packet {
                    address: entry.physical_address,
                    v_address: entry.virtual_address,
                    ip: head.ip,
                    instr_id: head.instr_id,
                    asid: head.asid,
                    cpu: self.cpu,
                    kind: AccessType::Write,
                    event_cycle: now,
                    ..Packet::default()
                };
                if !self.l1d.issue_write(packet) {
                    store_blocked = true;
                    break;
                }
                self.sq.remove(sq_index);
            }
            if store_blocked {
                break;
            }

            let head = self.rob.pop_front().expect("head checked above");
            for &lq_index in &head.lq_indices {
                self.lq.remove(lq_index);
            }
            if head.is_branch {
                self.branch.last_branch_result(
                    head.ip,
                    head.branch_target,
                    head.branch_taken,
                    head.branch_type,
                );
                self.btb.update_btb(
                    head.ip,
                    head.branch_target,
                    head.branch_taken,
                    head.branch_type,
                );
            }
            self.num_retired += 1;
            self.stats.instructions += 1;
            debug!(
                "cpu {} retired instr {} ip {}",
                self.cpu, head.instr_id, head.ip
            );
        }
    }

    // ---- completion ----

    fn complete_inflight(&mut self) {
        let now = self.base.cycle;
        let mut woken: Vec<u64> = Vec::new();
        let mut resolved_stall = false;
        let stall_on = self.stall_on_branch;
        for entry in self.rob.iter_mut() {
            if entry.executed == Progress::InFlight
                && entry.event_cycle <= now
                && entry.num_pending_mem == 0
            {
                entry.executed = Progress::Completed;
                woken.append(&mut entry.reg_dependents);
                if stall_on == Some(entry.instr_id) {
                    resolved_stall = true;
                }
            }
        }
        for id in woken {
            if let Some(pos) = self.rob_position(id) {
                let dependent = &mut self.rob[pos];
                dependent.num_pending_regs = dependent.num_pending_regs.saturating_sub(1);
            }
        }
        if resolved_stall {
            self.stall_on_branch = None;
            self.fetch_resume_cycle = now + self.cfg.mispredict_penalty;
        }
    }

    // ---- execute ----

    fn execute_instruction(&mut self) {
        let now = self.base.cycle;
        let latency = self.cfg.execute_latency;
        let mut begun = 0;
        for entry in self.rob.iter_mut() {
            if begun >= self.cfg.execute_width {
                break;
            }
            if entry.scheduled
                && entry.executed == Progress::NotStarted
                && entry.num_pending_regs == 0
                && entry.event_cycle <= now
            {
                entry.executed = Progress::InFlight;
                entry.event_cycle = now + latency;
                begun += 1;
            }
        }
    }

    // ---- schedule ----

    fn schedule_instruction(&mut self) {
        let now = self.base.cycle;
        let mut scheduled = 0;
        for pos in 0..self.rob.len() {
            if scheduled >= self.cfg.schedule_width {
                break;
            }
            if self.rob[pos].scheduled {
                continue;
            }
            let loads = self.rob[pos].source_memory.len();
            let stores = self.rob[pos].destination_memory.len();
            if !self.lq.has_room(loads) || !self.sq.has_room(stores) {
                break;
            }

            let instr_id = self.rob[pos].instr_id;
            let asid = self.rob[pos].asid;

            // Register dependencies against the youngest older producer
            // still in the window.
            let mut pending = 0;
            let sources = self.rob[pos].source_registers.clone();
            for reg in sources {
                let producer = (0..pos).rev().find(|&q| {
                    self.rob[q].executed != Progress::Completed
                        && self.rob[q].destination_registers.contains(&reg)
                });
                if let Some(q) = producer {
                    self.rob[q].reg_dependents.push(instr_id);
                    pending += 1;
                }
            }

            let mut lq_indices = Vec::new();
            for addr in self.rob[pos].source_memory.clone() {
                let index = self
                    .lq
                    .insert(LsqEntry::new(instr_id, addr, asid))
                    .expect("LQ room checked above");
                lq_indices.push(index);
            }
            let mut sq_indices = Vec::new();
            for addr in self.rob[pos].destination_memory.clone() {
                let index = self
                    .sq
                    .insert(LsqEntry::new(instr_id, addr, asid))
                    .expect("SQ room checked above");
                sq_indices.push(index);
            }

            let entry = &mut self.rob[pos];
            entry.lq_indices = lq_indices;
            entry.sq_indices = sq_indices;
            entry.num_pending_regs = pending;
            entry.num_pending_mem = entry.num_mem_ops();
            entry.scheduled = true;
            entry.event_cycle = now + self.cfg.schedule_latency;
            scheduled += 1;
        }
    }

    // ---- load/store issue ----

    fn translation_packet(&self, entry: &LsqEntry) -> Packet {
        Packet {
            v_address: entry.virtual_address,
            address: Address::default(),
            instr_id: entry.instr_id,
            asid: entry.asid,
            cpu: self.cpu,
            kind: AccessType::Translation,
            event_cycle: self.base.cycle,
            to_return: vec![ReturnHandle::new(&self.ptw_returns)],
            ..Packet::default()
        }
    }

    fn operate_lsq(&mut self) {
        let ptw = self.ptw.clone();
        let l1d = self.l1d.clone();

        // Request translations for new entries, loads first.
        let mut translations = self.cfg.lq_width + self.cfg.sq_width;
        let mut lq_pending: Vec<usize> = Vec::new();
        for (index, entry) in self.lq.iter() {
            if translations == 0 {
                break;
            }
            if !entry.translation_requested {
                lq_pending.push(index);
                translations -= 1;
            }
        }
        for index in lq_pending {
            let entry = self.lq.get(index).expect("entry visited above").clone();
            let mut packet = self.translation_packet(&entry);
            packet.lq_depend_on_me = vec![index];
            if ptw.issue_read(packet) {
                if let Some(entry) = self.lq.get_mut(index) {
                    entry.translation_requested = true;
                }
            }
        }
        let mut sq_pending: Vec<usize> = Vec::new();
        for (index, entry) in self.sq.iter() {
            if translations == 0 {
                break;
            }
            if !entry.translation_requested {
                sq_pending.push(index);
                translations -= 1;
            }
        }
        for index in sq_pending {
            let entry = self.sq.get(index).expect("entry visited above").clone();
            let mut packet = self.translation_packet(&entry);
            packet.sq_depend_on_me = vec![index];
            if ptw.issue_read(packet) {
                if let Some(entry) = self.sq.get_mut(index) {
                    entry.translation_requested = true;
                }
            }
        }

        // Issue translated loads to the data cache, forwarding from older
        // same-address stores whose data is ready.
        let mut load_budget = self.cfg.lq_width;
        let mut forwards: Vec<(usize, u64)> = Vec::new();
        let mut cache_loads: Vec<usize> = Vec::new();
        for (index, entry) in self.lq.iter() {
            if load_budget == 0 {
                break;
            }
            if !entry.translated || entry.fetched || entry.fetch_requested {
                continue;
            }
            load_budget -= 1;
            let forward = self.sq.iter().find(|(_, store)| {
                store.instr_id < entry.instr_id
                    && store.translated
                    && store.physical_address == entry.physical_address
                    && self
                        .rob_position(store.instr_id)
                        .map(|pos| self.rob[pos].executed != Progress::NotStarted)
                        .unwrap_or(false)
            });
            match forward {
                Some((_, store)) => forwards.push((index, store.instr_id)),
                None => cache_loads.push(index),
            }
        }
        for (index, producer) in forwards {
            let instr_id = self.lq.get_mut(index).map(|entry| {
                entry.producer_id = Some(producer);
                entry.fetched = true;
                entry.instr_id
            });
            if let Some(instr_id) = instr_id {
                self.note_mem_op_done(instr_id);
            }
        }
        for index in cache_loads {
            let entry = self.lq.get(index).expect("entry visited above").clone();
            let packet = Packet {
                address: entry.physical_address,
                v_address: entry.virtual_address,
                instr_id: entry.instr_id,
                asid: entry.asid,
                cpu: self.cpu,
                kind: AccessType::Load,
                event_cycle: self.base.cycle,
                lq_depend_on_me: vec![index],
                to_return: vec![ReturnHandle::new(&self.l1d_returns)],
                ..Packet::default()
            };
            if l1d.issue_read(packet) {
                if let Some(entry) = self.lq.get_mut(index) {
                    entry.fetch_requested = true;
                }
            }
        }
    }

    fn note_mem_op_done(&mut self, instr_id: u64) {
        if let Some(pos) = self.rob_position(instr_id) {
            let entry = &mut self.rob[pos];
            entry.num_pending_mem = entry.num_pending_mem.saturating_sub(1);
        }
    }

    // ---- memory returns ----

    fn handle_memory_returns(&mut self) {
        // Translations: resolve LSQ entries and fetch groups.
        loop {
            let response = {
                let mut queue = self.ptw_returns.write().expect("return queue poisoned");
                queue.pop()
            };
            let Some(response) = response else { break };
            let page = PageNumber::from_slice(response.data);
            for index in response.lq_depend_on_me.iter().copied() {
                if let Some(entry) = self.lq.get_mut(index) {
                    if !entry.translated {
                        let offset = PageOffset::from_slice(entry.virtual_address);
                        entry.physical_address =
                            Address::from_slice(crate::arch::splice(page, offset));
                        entry.translated = true;
                    }
                }
            }
            let mut store_instrs: Vec<u64> = Vec::new();
            for index in response.sq_depend_on_me.iter().copied() {
                if let Some(entry) = self.sq.get_mut(index) {
                    if !entry.translated {
                        let offset = PageOffset::from_slice(entry.virtual_address);
                        entry.physical_address =
                            Address::from_slice(crate::arch::splice(page, offset));
                        entry.translated = true;
                        store_instrs.push(entry.instr_id);
                    }
                }
            }
            for instr_id in store_instrs {
                self.note_mem_op_done(instr_id);
            }
            let vpn = PageNumber::from_slice(response.v_address);
            let asid = response.asid;
            for group in &mut self.fetch_groups {
                if group.state == FetchState::TranslatePending
                    && group.asid == asid
                    && PageNumber::from_slice(Address::new(group.v_block << crate::arch::LOG2_BLOCK_SIZE)) == vpn
                {
                    let offset = PageOffset::from_slice(Address::new(
                        group.v_block << crate::arch::LOG2_BLOCK_SIZE,
                    ));
                    group.paddr = Address::from_slice(crate::arch::splice(page, offset));
                    group.state = FetchState::NeedFetch;
                }
            }
        }

        // Data returns
        loop {
            let response = {
                let mut queue = self.l1d_returns.write().expect("return queue poisoned");
                queue.pop()
            };
            let Some(response) = response else { break };
            let mut done: Vec<u64> = Vec::new();
            for index in response.lq_depend_on_me.iter().copied() {
                if let Some(entry) = self.lq.get_mut(index) {
                    if !entry.fetched {
                        entry.fetched = true;
                        done.push(entry.instr_id);
                    }
                }
            }
            for instr_id in done {
                self.note_mem_op_done(instr_id);
            }
        }

        // Instruction fetch returns
        loop {
            let response = {
                let mut queue = self.l1i_returns.write().expect("return queue poisoned");
                queue.pop()
            };
            let Some(response) = response else { break };
            let block = BlockNumber::from_slice(response.address);
            let mut fetched_ids: Vec<u64> = response.instr_depend_on_me.clone();
            self.fetch_groups.retain(|group| {
                let matches = group.state == FetchState::FetchPending
                    && BlockNumber::from_slice(group.paddr) == block;
                if matches {
                    fetched_ids.extend(&group.instr_ids);
                }
                !matches
            });
            for entry in self.ifetch_buffer.iter_mut() {
                if fetched_ids.contains(&entry.instr_id) {
                    entry.fetched = Progress::Completed;
                }
            }
        }
    }

    // ---- dispatch / decode ----

    fn dispatch_instruction(&mut self) {
        let now = self.base.cycle;
        for _ in 0..self.cfg.dispatch_width {
            if self.rob.len() >= self.cfg.rob_size {
                break;
            }
            match self.dispatch_buffer.front() {
                Some(entry) if entry.event_cycle <= now => {
                    let mut entry = self.dispatch_buffer.pop_front().expect("front checked");
                    entry.decoded = true;
                    self.rob.push_back(entry);
                }
                _ => break,
            }
        }
    }

    fn decode_instruction(&mut self) {
        let now = self.base.cycle;
        for _ in 0..self.cfg.decode_width {
            if self.dispatch_buffer.len() >= self.cfg.dispatch_buffer_size {
                break;
            }
            match self.decode_buffer.front() {
                Some(entry) if entry.event_cycle <= now => {
                    let mut entry = self.decode_buffer.pop_front().expect("front checked");
                    entry.event_cycle = now + self.cfg.dispatch_latency;
                    self.dispatch_buffer.push_back(entry);
                }
                _ => break,
            }
        }
    }

    // ---- fetch ----

    fn init_instruction(&mut self, instr: &mut OooInstr) {
        if !instr.is_branch {
            return;
        }
        self.stats.branches += 1;
        self.stats.branch_type_count[instr.branch_type.index()] += 1;
        let (predicted_target, always_taken) =
            self.btb.btb_prediction(instr.ip, instr.branch_type);
        let prediction = self.branch.predict_branch(
            instr.ip,
            predicted_target,
            always_taken,
            instr.branch_type,
        ) || always_taken;
        instr.branch_prediction = prediction;
        self.l1i_hints
            .write()
            .expect("hint queue poisoned")
            .push(BranchHint {
                ip: instr.ip,
                branch_type: instr.branch_type,
                target: predicted_target,
            });

        let direction_wrong = prediction != instr.branch_taken;
        let target_wrong = instr.branch_taken
            && instr.branch_target.raw() != 0
            && predicted_target != instr.branch_target;
        if direction_wrong || target_wrong {
            instr.branch_mispredicted = true;
            self.stats.branch_misses += 1;
            self.stats.branch_mispredict_per_type[instr.branch_type.index()] += 1;
            // Warmup waives the timing penalty; the predictors still train.
            if !self.base.warmup {
                self.stall_on_branch = Some(instr.instr_id);
            }
        }
    }

    fn fetch_instruction(&mut self) {
        let now = self.base.cycle;
        let stalled = self.stall_on_branch.is_some() || now < self.fetch_resume_cycle;

        // Bring trace records into the fetch buffer, predicting branches as
        // they enter. A mispredict stops the intake behind the branch.
        if !stalled {
            for _ in 0..self.cfg.fetch_width {
                if self.ifetch_buffer.len() >= self.cfg.ifetch_buffer_size {
                    break;
                }
                let Some(mut instr) = self.input_queue.pop_front() else {
                    break;
                };
                self.init_instruction(&mut instr);
                let mispredicted = instr.branch_mispredicted;
                self.ifetch_buffer.push_back(instr);
                if mispredicted {
                    break;
                }
            }
        }

        // Group unfetched buffer entries by block and start their walks.
        let mut started = 0;
        let mut pending: Vec<(u64, u16, Vec<u64>)> = Vec::new();
        for entry in self.ifetch_buffer.iter_mut() {
            if entry.fetched != Progress::NotStarted {
                continue;
            }
            if started >= self.cfg.fetch_width {
                break;
            }
            let block = entry.ip.raw() >> crate::arch::LOG2_BLOCK_SIZE;
            match pending.last_mut() {
                Some((last_block, last_asid, ids))
                    if *last_block == block && *last_asid == entry.asid =>
                {
                    ids.push(entry.instr_id);
                }
                _ => {
                    started += 1;
                    pending.push((block, entry.asid, vec![entry.instr_id]));
                }
            }
            entry.fetched = Progress::InFlight;
        }
        for (v_block, asid, instr_ids) in pending {
            self.fetch_groups.push(FetchGroup {
                v_block,
                asid,
                paddr: Address::default(),
                instr_ids,
                state: FetchState::NeedTranslate,
            });
        }

        // Drive the groups forward.
        let ptw = self.ptw.clone();
        let l1i = self.l1i.clone();
        for group in &mut self.fetch_groups {
            match group.state {
                FetchState::NeedTranslate => {
                    let v_address =
                        Address::new(group.v_block << crate::arch::LOG2_BLOCK_SIZE);
                    let packet = Packet {
                        v_address,
                        asid: group.asid,
                        cpu: self.cpu,
                        kind: AccessType::Translation,
                        event_cycle: now,
                        to_return: vec![ReturnHandle::new(&self.ptw_returns)],
                        ..Packet::default()
                    };
                    if ptw.issue_read(packet) {
                        group.state = FetchState::TranslatePending;
                    }
                }
                FetchState::NeedFetch => {
                    let packet = Packet {
                        address: group.paddr,
                        v_address: Address::new(group.v_block << crate::arch::LOG2_BLOCK_SIZE),
                        asid: group.asid,
                        cpu: self.cpu,
                        kind: AccessType::Load,
                        event_cycle: now,
                        instr_depend_on_me: group.instr_ids.clone(),
                        to_return: vec![ReturnHandle::new(&self.l1i_returns)],
                        ..Packet::default()
                    };
                    if l1i.issue_read(packet) {
                        group.state = FetchState::FetchPending;
                    }
                }
                FetchState::TranslatePending | FetchState::FetchPending => {}
            }
        }

        // Fetched entries move toward decode in order.
        for _ in 0..self.cfg.decode_width {
            if self.decode_buffer.len() >= self.cfg.decode_buffer_size {
                break;
            }
            match self.ifetch_buffer.front() {
                Some(entry) if entry.fetched == Progress::Completed => {
                    let mut entry = self.ifetch_buffer.pop_front().expect("front checked");
                    entry.event_cycle = now + self.cfg.decode_latency;
                    self.decode_buffer.push_back(entry);
                }
                _ => break,
            }
        }
    }
}

impl Operable for OooCpu {
    fn base(&mut self) -> &mut OperableBase {
        &mut self.base
    }

    fn base_ref(&self) -> &OperableBase {
        &self.base
    }

    fn operate(&mut self) {
        self.retire_rob();
        self.complete_inflight();
        self.execute_instruction();
        self.schedule_instruction();
        self.handle_memory_returns();
        self.operate_lsq();
        self.dispatch_instruction();
        self.decode_instruction();
        self.fetch_instruction();
        self.stats.cycles += 1;
    }
}
