pub mod config;
pub mod stats;
pub mod top;
pub mod trace;

pub use config::{Config, MachineConfig, SimConfig};
pub use stats::{CacheStats, CpuStats, DramStats, PhaseStats};
pub use top::{Environment, PhaseInfo};
pub use trace::{FileTraceReader, TraceFormat, TraceSource};
