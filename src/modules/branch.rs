use crate::arch::Address;
use crate::core::instr::BranchType;

/// Direction predictor seeing the full fetch context.
pub trait BranchWithContext: Send + Sync {
    fn predict_branch(
        &mut self,
        ip: Address,
        predicted_target: Address,
        always_taken: bool,
        branch_type: BranchType,
    ) -> bool;

    fn last_branch_result(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    );
}

/// Direction predictor keyed on the instruction pointer alone.
pub trait BranchIpOnly: Send + Sync {
    fn predict_branch(&mut self, ip: Address) -> bool;

    fn last_branch_result(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    );
}

pub enum BranchVariant {
    WithContext(Box<dyn BranchWithContext>),
    IpOnly(Box<dyn BranchIpOnly>),
}

pub struct BranchHost {
    variant: BranchVariant,
}

impl BranchHost {
    pub fn new(variant: BranchVariant) -> Self {
        Self { variant }
    }

    pub fn predict_branch(
        &mut self,
        ip: Address,
        predicted_target: Address,
        always_taken: bool,
        branch_type: BranchType,
    ) -> bool {
        match &mut self.variant {
            BranchVariant::WithContext(module) => {
                module.predict_branch(ip, predicted_target, always_taken, branch_type)
            }
            BranchVariant::IpOnly(module) => module.predict_branch(ip),
        }
    }

    pub fn last_branch_result(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    ) {
        match &mut self.variant {
            BranchVariant::WithContext(module) => {
                module.last_branch_result(ip, branch_target, taken, branch_type)
            }
            BranchVariant::IpOnly(module) => {
                module.last_branch_result(ip, branch_target, taken, branch_type)
            }
        }
    }
}

static BRANCH_FACTORIES: phf::Map<&'static str, fn() -> BranchVariant> = phf::phf_map! {
    "bimodal" => || BranchVariant::IpOnly(Box::new(Bimodal::new())),
    "always_taken" => || BranchVariant::IpOnly(Box::new(AlwaysTaken)),
};

pub fn branch_by_name(name: &str) -> BranchVariant {
    let factory = BRANCH_FACTORIES
        .get(name)
        .unwrap_or_else(|| panic!("unknown branch predictor {name:?}"));
    factory()
}

/// Target predictor. `predict` returns the target and whether the entry is
/// known always-taken.
pub trait BtbWithType: Send + Sync {
    fn btb_prediction(&mut self, ip: Address, branch_type: BranchType) -> (Address, bool);

    fn update_btb(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    );
}

pub trait BtbIpOnly: Send + Sync {
    fn btb_prediction(&mut self, ip: Address) -> (Address, bool);

    fn update_btb(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    );
}

pub enum BtbVariant {
    WithType(Box<dyn BtbWithType>),
    IpOnly(Box<dyn BtbIpOnly>),
}

pub struct BtbHost {
    variant: BtbVariant,
}

impl BtbHost {
    pub fn new(variant: BtbVariant) -> Self {
        Self { variant }
    }

    pub fn btb_prediction(&mut self, ip: Address, branch_type: BranchType) -> (Address, bool) {
        match &mut self.variant {
            BtbVariant::WithType(module) => module.btb_prediction(ip, branch_type),
            BtbVariant::IpOnly(module) => module.btb_prediction(ip),
        }
    }

    pub fn update_btb(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    ) {
        match &mut self.variant {
            BtbVariant::WithType(module) => module.update_btb(ip, branch_target, taken, branch_type),
            BtbVariant::IpOnly(module) => module.update_btb(ip, branch_target, taken, branch_type),
        }
    }
}

static BTB_FACTORIES: phf::Map<&'static str, fn() -> BtbVariant> = phf::phf_map! {
    "basic_btb" => || BtbVariant::WithType(Box::new(BasicBtb::new())),
};

pub fn btb_by_name(name: &str) -> BtbVariant {
    let factory = BTB_FACTORIES
        .get(name)
        .unwrap_or_else(|| panic!("unknown BTB {name:?}"));
    factory()
}

const BIMODAL_TABLE_SIZE: usize = 16384;
const BIMODAL_PRIME: u64 = 16381;
const COUNTER_MAX: u8 = 3;

/// Two-bit saturating counters indexed by ip modulo a prime.
pub struct Bimodal {
    table: Vec<u8>,
}

impl Bimodal {
    pub fn new() -> Self {
        Self {
            table: vec![0; BIMODAL_TABLE_SIZE],
        }
    }

    fn index(ip: Address) -> usize {
        (ip.raw() % BIMODAL_PRIME) as usize
    }
}

impl Default for Bimodal {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchIpOnly for Bimodal {
    fn predict_branch(&mut self, ip: Address) -> bool {
        self.table[Self::index(ip)] >= (COUNTER_MAX + 1) / 2
    }

    fn last_branch_result(
        &mut self,
        ip: Address,
        _branch_target: Address,
        taken: bool,
        _branch_type: BranchType,
    ) {
        let counter = &mut self.table[Self::index(ip)];
        if taken {
            *counter = (*counter + 1).min(COUNTER_MAX);
        } else {
            *counter = counter.saturating_sub(1);
        }
    }
}

pub struct AlwaysTaken;

impl BranchIpOnly for AlwaysTaken {
    fn predict_branch(&mut self, _ip: Address) -> bool {
        true
    }

    fn last_branch_result(
        &mut self,
        _ip: Address,
        _branch_target: Address,
        _taken: bool,
        _branch_type: BranchType,
    ) {
    }
}

const BTB_SETS: usize = 1024;
const BTB_WAYS: usize = 8;
const RAS_SIZE: usize = 64;

#[derive(Clone, Copy, Default)]
struct BtbEntry {
    ip: u64,
    target: u64,
    always_taken: bool,
    last_used: u64,
}

/// Set-associative target buffer with a return address stack.
pub struct BasicBtb {
    entries: Vec<BtbEntry>,
    ras: Vec<u64>,
    access: u64,
}

impl BasicBtb {
    pub fn new() -> Self {
        Self {
            entries: vec![BtbEntry::default(); BTB_SETS * BTB_WAYS],
            ras: Vec::new(),
            access: 0,
        }
    }

    fn set_of(ip: Address) -> usize {
        (ip.raw() >> 2) as usize % BTB_SETS
    }

    fn set_slice(&mut self, ip: Address) -> &mut [BtbEntry] {
        let begin = Self::set_of(ip) * BTB_WAYS;
        &mut self.entries[begin..begin + BTB_WAYS]
    }
}

impl Default for BasicBtb {
    fn default() -> Self {
        Self::new()
    }
}

impl BtbWithType for BasicBtb {
    fn btb_prediction(&mut self, ip: Address, branch_type: BranchType) -> (Address, bool) {
        if branch_type == BranchType::Return {
            let target = self.ras.last().copied().unwrap_or(0);
            return (Address::new(target), true);
        }
        self.access += 1;
        let access = self.access;
        let raw_ip = ip.raw();
        for entry in self.set_slice(ip) {
            if entry.ip == raw_ip {
                entry.last_used = access;
                return (Address::new(entry.target), entry.always_taken);
            }
        }
        (Address::default(), false)
    }

    fn update_btb(
        &mut self,
        ip: Address,
        branch_target: Address,
        taken: bool,
        branch_type: BranchType,
    ) {
        if branch_type == BranchType::DirectCall || branch_type == BranchType::IndirectCall {
            if self.ras.len() >= RAS_SIZE {
                self.ras.remove(0);
            }
            self.ras.push(ip.raw());
        }
        if branch_type == BranchType::Return {
            self.ras.pop();
            return;
        }
        if branch_target.raw() == 0 {
            return;
        }
        self.access += 1;
        let access = self.access;
        let raw_ip = ip.raw();
        let raw_target = branch_target.raw();
        let set = self.set_slice(ip);
        if let Some(entry) = set.iter_mut().find(|entry| entry.ip == raw_ip) {
            entry.target = raw_target;
            entry.always_taken &= taken;
            entry.last_used = access;
            return;
        }
        if !taken {
            return;
        }
        let victim = set
            .iter_mut()
            .min_by_key(|entry| entry.last_used)
            .expect("BTB sets are non-empty");
        *victim = BtbEntry {
            ip: raw_ip,
            target: raw_target,
            always_taken: true,
            last_used: access,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bimodal_learns_a_taken_branch() {
        let mut predictor = Bimodal::new();
        let ip = Address::new(0x4010);
        assert!(!predictor.predict_branch(ip));
        for _ in 0..2 {
            predictor.last_branch_result(ip, Address::new(0x5000), true, BranchType::Conditional);
        }
        assert!(predictor.predict_branch(ip));
    }

    #[test]
    fn bimodal_counters_saturate() {
        let mut predictor = Bimodal::new();
        let ip = Address::new(0x4010);
        for _ in 0..10 {
            predictor.last_branch_result(ip, Address::new(0x5000), true, BranchType::Conditional);
        }
        predictor.last_branch_result(ip, Address::new(0x5000), false, BranchType::Conditional);
        assert!(predictor.predict_branch(ip), "one not-taken should not flip");
    }

    #[test]
    fn btb_remembers_taken_targets() {
        let mut btb = BasicBtb::new();
        let ip = Address::new(0x4010);
        let target = Address::new(0x5000);
        assert_eq!(btb.btb_prediction(ip, BranchType::DirectJump).0.raw(), 0);
        btb.update_btb(ip, target, true, BranchType::DirectJump);
        let (predicted, always_taken) = btb.btb_prediction(ip, BranchType::DirectJump);
        assert_eq!(predicted, target);
        assert!(always_taken);
    }

    #[test]
    fn return_address_stack_pairs_calls_and_returns() {
        let mut btb = BasicBtb::new();
        let call_ip = Address::new(0x4010);
        btb.update_btb(call_ip, Address::new(0x8000), true, BranchType::DirectCall);
        let (target, _) = btb.btb_prediction(Address::new(0x8040), BranchType::Return);
        assert_eq!(target, call_ip);
        btb.update_btb(Address::new(0x8040), call_ip, true, BranchType::Return);
        let (empty, _) = btb.btb_prediction(Address::new(0x9000), BranchType::Return);
        assert_eq!(empty.raw(), 0);
    }
}
