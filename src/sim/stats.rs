use serde::Serialize;

use crate::base::behavior::Cycle;
use crate::base::packet::NUM_ACCESS_TYPES;
use crate::core::instr::NUM_BRANCH_TYPES;

/// Per-core counters for one phase.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CpuStats {
    pub instructions: u64,
    pub cycles: Cycle,
    pub branches: u64,
    pub branch_misses: u64,
    pub branch_type_count: [u64; NUM_BRANCH_TYPES],
    pub branch_mispredict_per_type: [u64; NUM_BRANCH_TYPES],
}

impl CpuStats {
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        self.instructions as f64 / self.cycles as f64
    }

    pub fn mpki(&self) -> f64 {
        if self.instructions == 0 {
            return 0.0;
        }
        1000.0 * self.branch_misses as f64 / self.instructions as f64
    }
}

/// Per-cache counters, split by access type where it matters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: [u64; NUM_ACCESS_TYPES],
    pub misses: [u64; NUM_ACCESS_TYPES],
    pub prefetch_issued: u64,
    pub prefetch_useful: u64,
    pub prefetch_filled: u64,
    pub prefetch_dropped: u64,
    pub mshr_merged: u64,
    pub mshr_full_stalls: u64,
    pub writebacks: u64,
}

impl CacheStats {
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().sum()
    }

    pub fn total_misses(&self) -> u64 {
        self.misses.iter().sum()
    }

    pub fn accesses(&self) -> u64 {
        self.total_hits() + self.total_misses()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DramStats {
    pub reads: u64,
    pub writes: u64,
    pub row_hits: u64,
    pub row_misses: u64,
    pub write_drains: u64,
}

/// Everything one simulation phase produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseStats {
    pub name: String,
    pub cpus: Vec<CpuStats>,
    pub caches: Vec<(String, CacheStats)>,
    pub dram: DramStats,
}

pub fn print_plain(phases: &[PhaseStats]) {
    for phase in phases {
        println!();
        println!("=== {} ===", phase.name);
        for (cpu, stats) in phase.cpus.iter().enumerate() {
            println!(
                "CPU {cpu}: {} instructions, {} cycles, IPC {:.4}",
                stats.instructions,
                stats.cycles,
                stats.ipc()
            );
            println!(
                "  branches {}  mispredicts {}  MPKI {:.4}",
                stats.branches,
                stats.branch_misses,
                stats.mpki()
            );
        }
        for (name, stats) in &phase.caches {
            println!(
                "{name}: accesses {} hits {} misses {} writebacks {}",
                stats.accesses(),
                stats.total_hits(),
                stats.total_misses(),
                stats.writebacks
            );
            println!(
                "  prefetch issued {} filled {} useful {}  mshr merged {}",
                stats.prefetch_issued, stats.prefetch_filled, stats.prefetch_useful, stats.mshr_merged
            );
        }
        println!(
            "DRAM: reads {} writes {} row hits {} row misses {}",
            phase.dram.reads, phase.dram.writes, phase.dram.row_hits, phase.dram.row_misses
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_handles_zero_cycles() {
        let stats = CpuStats::default();
        assert_eq!(stats.ipc(), 0.0);
    }

    #[test]
    fn cache_totals_sum_across_types() {
        let mut stats = CacheStats::default();
        stats.hits[0] = 3;
        stats.hits[3] = 2;
        stats.misses[1] = 4;
        assert_eq!(stats.total_hits(), 5);
        assert_eq!(stats.accesses(), 9);
    }
}
