use num_derive::FromPrimitive;

use crate::arch::Address;
use crate::base::behavior::Cycle;

// Special registers that identify branch kinds in the trace
pub const REG_STACK_POINTER: u8 = 6;
pub const REG_FLAGS: u8 = 25;
pub const REG_INSTRUCTION_POINTER: u8 = 26;

pub const NUM_BRANCH_TYPES: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive)]
pub enum BranchType {
    #[default]
    NotBranch = 0,
    DirectJump = 1,
    Indirect = 2,
    Conditional = 3,
    DirectCall = 4,
    IndirectCall = 5,
    Return = 6,
    Other = 7,
}

impl BranchType {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One decoded trace record, as produced by a trace source. Register id 0
/// and memory address 0 mark unused slots and are already stripped.
#[derive(Debug, Clone, Default)]
pub struct TraceInstr {
    pub ip: u64,
    pub is_branch: bool,
    pub branch_taken: bool,
    pub destination_registers: Vec<u8>,
    pub source_registers: Vec<u8>,
    pub destination_memory: Vec<u64>,
    pub source_memory: Vec<u64>,
    pub asid: u16,
}

/// Progress of a pipeline phase for one ROB entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Progress {
    #[default]
    NotStarted,
    InFlight,
    Completed,
}

/// One in-window instruction. Cross-references are by id, never by
/// reference: the ROB, the LSQ, and in-flight packets all exchange indices.
#[derive(Debug, Clone, Default)]
pub struct OooInstr {
    pub instr_id: u64,
    pub ip: Address,
    pub event_cycle: Cycle,
    pub asid: u16,

    pub is_branch: bool,
    pub branch_taken: bool,
    pub branch_prediction: bool,
    pub branch_mispredicted: bool,
    pub branch_type: BranchType,
    pub branch_target: Address,

    pub fetched: Progress,
    pub decoded: bool,
    pub scheduled: bool,
    pub executed: Progress,

    pub num_pending_regs: usize,
    pub num_pending_mem: usize,

    pub destination_registers: Vec<u8>,
    pub source_registers: Vec<u8>,
    pub destination_memory: Vec<Address>,
    pub source_memory: Vec<Address>,

    /// ROB entries whose register sources wait on this one.
    pub reg_dependents: Vec<u64>,
    pub lq_indices: Vec<usize>,
    pub sq_indices: Vec<usize>,
}

impl OooInstr {
    pub fn from_trace(trace: &TraceInstr) -> Self {
        Self {
            ip: Address::new(trace.ip),
            asid: trace.asid,
            is_branch: trace.is_branch,
            branch_taken: trace.branch_taken,
            branch_type: infer_branch_type(trace),
            destination_registers: trace.destination_registers.clone(),
            source_registers: trace.source_registers.clone(),
            destination_memory: trace
                .destination_memory
                .iter()
                .map(|&addr| Address::new(addr))
                .collect(),
            source_memory: trace
                .source_memory
                .iter()
                .map(|&addr| Address::new(addr))
                .collect(),
            ..Self::default()
        }
    }

    pub fn num_mem_ops(&self) -> usize {
        self.source_memory.len() + self.destination_memory.len()
    }
}

/// Classify a branch from the special registers it touches when the trace
/// leaves the type implicit.
pub fn infer_branch_type(trace: &TraceInstr) -> BranchType {
    if !trace.is_branch {
        return BranchType::NotBranch;
    }

    let reads = |reg: u8| trace.source_registers.contains(&reg);
    let writes = |reg: u8| trace.destination_registers.contains(&reg);
    let reads_sp = reads(REG_STACK_POINTER);
    let reads_flags = reads(REG_FLAGS);
    let reads_ip = reads(REG_INSTRUCTION_POINTER);
    let writes_sp = writes(REG_STACK_POINTER);
    let writes_ip = writes(REG_INSTRUCTION_POINTER);
    let reads_other = trace
        .source_registers
        .iter()
        .any(|&reg| reg != REG_STACK_POINTER && reg != REG_FLAGS && reg != REG_INSTRUCTION_POINTER);

    if !reads_sp && !reads_flags && writes_ip && !reads_other {
        BranchType::DirectJump
    } else if !reads_sp && !reads_flags && writes_ip && reads_other {
        BranchType::Indirect
    } else if !reads_sp && reads_flags && writes_ip && !reads_other {
        BranchType::Conditional
    } else if reads_sp && reads_ip && writes_sp && writes_ip && !reads_flags && !reads_other {
        BranchType::DirectCall
    } else if reads_sp && reads_ip && writes_sp && writes_ip && !reads_flags && reads_other {
        BranchType::IndirectCall
    } else if reads_sp && !reads_ip && writes_sp && writes_ip {
        BranchType::Return
    } else if writes_ip {
        BranchType::Other
    } else {
        BranchType::NotBranch
    }
}
