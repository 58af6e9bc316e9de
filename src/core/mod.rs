pub mod cpu;
pub mod instr;
pub mod lsq;

#[cfg(test)]
mod unit_tests;

pub use cpu::{CoreConfig, OooCpu};
pub use instr::{BranchType, OooInstr, TraceInstr};
pub use lsq::LsqEntry;
