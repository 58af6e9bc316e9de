use std::sync::{Arc, RwLock};

use log::info;

use crate::base::behavior::Operable;
use crate::base::channel::{ChannelRef, Clocked, ReturnQueueRef};
use crate::core::cpu::{CorePorts, OooCpu};
use crate::core::instr::TraceInstr;
use crate::mem::cache::{Cache, CacheConfig};
use crate::mem::dram::MemoryController;
use crate::mem::ptw::{PageTableWalker, PtwConfig};
use crate::mem::vmem::{VirtualMemory, VmemRef};
use crate::sim::config::MachineConfig;
use crate::sim::stats::PhaseStats;
use crate::sim::trace::TraceSource;

#[derive(Debug, Clone)]
pub struct PhaseInfo {
    pub name: String,
    pub is_warmup: bool,
    pub length: u64,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Dram,
    Cache(usize),
    Ptw(usize),
    Cpu(usize),
}

/// The assembled machine: one shared memory controller, per-core private
/// L1/L2 caches and page-table walkers, and the cores themselves.
///
/// Operables run in an explicit leaves-first order computed from the
/// producer-to-consumer channel edges recorded while wiring.
pub struct Environment {
    pub cpus: Vec<OooCpu>,
    pub caches: Vec<Cache>,
    pub ptws: Vec<PageTableWalker>,
    pub dram: MemoryController,
    pub vmem: VmemRef,
    channels: Vec<ChannelRef>,
    returns: Vec<ReturnQueueRef>,
    order: Vec<Node>,
    cycle: u64,
}

impl Environment {
    pub fn new(cfg: &MachineConfig) -> Self {
        let vmem: VmemRef = Arc::new(RwLock::new(VirtualMemory::new(&cfg.vmem)));
        let dram = MemoryController::new(cfg.dram.clone());

        let mut caches = Vec::new();
        let mut ptws = Vec::new();
        let mut cpus = Vec::new();
        let mut channels = vec![dram.channel()];
        let mut returns = Vec::new();

        // Node ids for the topological sort; edges run producer -> consumer.
        let mut nodes = vec![Node::Dram];
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let dram_node = 0usize;

        for cpu in 0..cfg.sim.num_cpus {
            let l2_cfg = cfg
                .l2
                .clone()
                .map(|mut c| {
                    c.name = format!("cpu{cpu}_{}", c.name);
                    c
                })
                .unwrap_or_else(|| CacheConfig::l2(cpu));
            let l2 = Cache::new(l2_cfg, dram.channel());
            let l2_node = nodes.len();
            nodes.push(Node::Cache(caches.len()));
            edges.push((l2_node, dram_node));
            channels.push(l2.channel());
            returns.push(l2.return_queue());
            let l2_channel = l2.channel();
            caches.push(l2);

            let l1d_cfg = cfg
                .l1d
                .clone()
                .map(|mut c| {
                    c.name = format!("cpu{cpu}_{}", c.name);
                    c
                })
                .unwrap_or_else(|| CacheConfig::l1d(cpu));
            let l1d = Cache::new(l1d_cfg, l2_channel.clone());
            let l1d_node = nodes.len();
            nodes.push(Node::Cache(caches.len()));
            edges.push((l1d_node, l2_node));
            channels.push(l1d.channel());
            returns.push(l1d.return_queue());
            let l1d_channel = l1d.channel();
            caches.push(l1d);

            let l1i_cfg = cfg
                .l1i
                .clone()
                .map(|mut c| {
                    c.name = format!("cpu{cpu}_{}", c.name);
                    c
                })
                .unwrap_or_else(|| CacheConfig::l1i(cpu));
            let l1i = Cache::new(l1i_cfg, l2_channel.clone());
            let l1i_node = nodes.len();
            nodes.push(Node::Cache(caches.len()));
            edges.push((l1i_node, l2_node));
            channels.push(l1i.channel());
            returns.push(l1i.return_queue());
            let l1i_channel = l1i.channel();
            let l1i_hints = l1i.branch_hint_queue();
            caches.push(l1i);

            let ptw_cfg = PtwConfig {
                name: format!("cpu{cpu}_PTW"),
                ..cfg.ptw.clone()
            };
            let ptw = PageTableWalker::new(ptw_cfg, l1d_channel.clone(), vmem.clone());
            let ptw_node = nodes.len();
            nodes.push(Node::Ptw(ptws.len()));
            edges.push((ptw_node, l1d_node));
            channels.push(ptw.channel());
            returns.push(ptw.return_queue());
            let ptw_channel = ptw.channel();
            ptws.push(ptw);

            let core = OooCpu::new(
                cpu,
                cfg.core.clone(),
                CorePorts {
                    l1i: l1i_channel,
                    l1d: l1d_channel,
                    ptw: ptw_channel,
                    l1i_hints,
                },
            );
            let cpu_node = nodes.len();
            nodes.push(Node::Cpu(cpus.len()));
            edges.push((cpu_node, l1i_node));
            edges.push((cpu_node, l1d_node));
            edges.push((cpu_node, ptw_node));
            returns.extend(core.return_queues());
            cpus.push(core);
        }

        let order = topo_order(&nodes, &edges);
        info!(
            "environment: {} operables, {} channels",
            order.len(),
            channels.len()
        );

        Self {
            cpus,
            caches,
            ptws,
            dram,
            vmem,
            channels,
            returns,
            order,
            cycle: 0,
        }
    }

    /// Advance the whole machine one global cycle.
    pub fn tick_one(&mut self) {
        for channel in &self.channels {
            channel.with(|ch| ch.tick());
        }
        for queue in &self.returns {
            queue.write().expect("return queue poisoned").tick();
        }
        for &node in &self.order {
            match node {
                Node::Dram => {
                    if self.cycle % self.dram.clock_scale() == 0 {
                        self.dram.operate_one();
                    }
                }
                Node::Cache(index) => self.caches[index].operate_one(),
                Node::Ptw(index) => self.ptws[index].operate_one(),
                Node::Cpu(index) => self.cpus[index].operate_one(),
            }
        }
        self.cycle += 1;
    }

    fn reset_stats(&mut self) {
        for cpu in &mut self.cpus {
            cpu.stats = Default::default();
        }
        for cache in &mut self.caches {
            cache.stats = Default::default();
        }
        self.dram.stats = Default::default();
    }

    /// Push the phase's warmup mode into every operable. During warmup the
    /// memory system services requests without timing fidelity and the
    /// front end skips mispredict stalls; predictors and arrays still
    /// train.
    fn begin_phase(&mut self, warmup: bool) {
        self.dram.base.warmup = warmup;
        for cache in &mut self.caches {
            cache.base.warmup = warmup;
        }
        for ptw in &mut self.ptws {
            ptw.base.warmup = warmup;
        }
        for cpu in &mut self.cpus {
            cpu.begin_phase(warmup);
        }
    }

    /// Run one phase, feeding each core from its trace source.
    pub fn run_phase(
        &mut self,
        phase: &PhaseInfo,
        traces: &mut [Box<dyn TraceSource>],
        hide_heartbeat: bool,
        heartbeat: u64,
    ) -> PhaseStats {
        assert_eq!(
            traces.len(),
            self.cpus.len(),
            "one trace per simulated core"
        );
        self.begin_phase(phase.is_warmup);
        self.reset_stats();
        let baseline: Vec<u64> = self.cpus.iter().map(|cpu| cpu.num_retired).collect();
        let mut lookahead: Vec<Option<TraceInstr>> =
            traces.iter_mut().map(|t| t.next_instr()).collect();
        let mut next_heartbeat: Vec<u64> = vec![heartbeat; self.cpus.len()];

        loop {
            // Feed the front ends; the trace reader runs after the cores in
            // the per-cycle order, so new records surface next cycle.
            for (index, cpu) in self.cpus.iter_mut().enumerate() {
                for _ in 0..cpu.input_room() {
                    let Some(instr) = lookahead[index].take() else {
                        cpu.mark_trace_drained();
                        break;
                    };
                    lookahead[index] = traces[index].next_instr();
                    let branch_target = lookahead[index]
                        .as_ref()
                        .map(|next| next.ip)
                        .unwrap_or_default();
                    cpu.push_instruction(&instr, branch_target);
                }
            }

            self.tick_one();

            let mut all_done = true;
            for (index, cpu) in self.cpus.iter().enumerate() {
                let retired = cpu.num_retired - baseline[index];
                if !hide_heartbeat && retired >= next_heartbeat[index] {
                    println!(
                        "Heartbeat CPU {index} instructions: {retired} cycles: {} ({})",
                        cpu.stats.cycles, phase.name
                    );
                    next_heartbeat[index] += heartbeat;
                }
                let done = retired >= phase.length || cpu.pipeline_empty();
                all_done &= done;
            }
            if all_done {
                break;
            }
        }

        PhaseStats {
            name: phase.name.clone(),
            cpus: self.cpus.iter().map(|cpu| cpu.stats).collect(),
            caches: self
                .caches
                .iter()
                .map(|cache| (cache.name().to_string(), cache.stats))
                .collect(),
            dram: self.dram.stats,
        }
    }

    pub fn final_stats(&mut self) {
        for cache in &mut self.caches {
            cache.final_stats();
        }
    }
}

/// Leaves-first order: every operable runs after all operables it issues
/// into. The channel graph is a DAG by construction.
fn topo_order(nodes: &[Node], edges: &[(usize, usize)]) -> Vec<Node> {
    let mut successors = vec![Vec::new(); nodes.len()];
    for &(producer, consumer) in edges {
        successors[producer].push(consumer);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    fn visit(
        node: usize,
        successors: &[Vec<usize>],
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) {
        match marks[node] {
            Mark::Done => return,
            Mark::Visiting => panic!("cycle in the operable graph"),
            Mark::Unvisited => {}
        }
        marks[node] = Mark::Visiting;
        for &next in &successors[node] {
            visit(next, successors, marks, order);
        }
        marks[node] = Mark::Done;
        order.push(node);
    }

    for node in 0..nodes.len() {
        visit(node, &successors, &mut marks, &mut order);
    }
    order.into_iter().map(|index| nodes[index]).collect()
}
