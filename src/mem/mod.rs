pub mod cache;
pub mod dram;
pub mod mshr;
pub mod ptw;
pub mod vmem;

#[cfg(test)]
mod unit_tests;

pub use cache::{Cache, CacheConfig, CacheShape};
pub use dram::{DramConfig, MemoryController};
pub use mshr::{MshrOutcome, MshrTable};
pub use ptw::{PageTableWalker, PtwConfig};
pub use vmem::{VirtualMemory, VmemConfig};
