use crate::arch::Address;
use crate::base::packet::AccessType;
use crate::mem::cache::{CacheBlock, CacheShape};

/// The original replacement signature generation: access type as a raw
/// integer.
pub trait ReplacementLegacy: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn find_victim(
        &mut self,
        cpu: usize,
        instr_id: u64,
        set: usize,
        set_blocks: &[CacheBlock],
        ip: Address,
        full_addr: Address,
        kind: u32,
    ) -> usize;

    #[allow(clippy::too_many_arguments)]
    fn update_replacement_state(
        &mut self,
        cpu: usize,
        set: usize,
        way: usize,
        full_addr: Address,
        ip: Address,
        victim_addr: Address,
        kind: u32,
        hit: bool,
    );

    fn final_stats(&mut self) {}
}

/// The current signature generation: access type as the typed enum.
pub trait ReplacementTyped: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn find_victim(
        &mut self,
        cpu: usize,
        instr_id: u64,
        set: usize,
        set_blocks: &[CacheBlock],
        ip: Address,
        full_addr: Address,
        kind: AccessType,
    ) -> usize;

    #[allow(clippy::too_many_arguments)]
    fn update_replacement_state(
        &mut self,
        cpu: usize,
        set: usize,
        way: usize,
        full_addr: Address,
        ip: Address,
        victim_addr: Address,
        kind: AccessType,
        hit: bool,
    );

    fn final_stats(&mut self) {}
}

/// One registered replacement hook. Exactly one signature version per
/// module.
pub enum ReplacementVariant {
    Legacy(Box<dyn ReplacementLegacy>),
    Typed(Box<dyn ReplacementTyped>),
}

/// Dispatches cache callbacks to whichever signature version the module
/// registered.
pub struct ReplacementHost {
    variant: ReplacementVariant,
}

impl ReplacementHost {
    pub fn new(variant: ReplacementVariant) -> Self {
        Self { variant }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn find_victim(
        &mut self,
        cpu: usize,
        instr_id: u64,
        set: usize,
        set_blocks: &[CacheBlock],
        ip: Address,
        full_addr: Address,
        kind: AccessType,
    ) -> usize {
        match &mut self.variant {
            ReplacementVariant::Legacy(module) => {
                module.find_victim(cpu, instr_id, set, set_blocks, ip, full_addr, kind as u32)
            }
            ReplacementVariant::Typed(module) => {
                module.find_victim(cpu, instr_id, set, set_blocks, ip, full_addr, kind)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_replacement_state(
        &mut self,
        cpu: usize,
        set: usize,
        way: usize,
        full_addr: Address,
        ip: Address,
        victim_addr: Address,
        kind: AccessType,
        hit: bool,
    ) {
        match &mut self.variant {
            ReplacementVariant::Legacy(module) => module.update_replacement_state(
                cpu,
                set,
                way,
                full_addr,
                ip,
                victim_addr,
                kind as u32,
                hit,
            ),
            ReplacementVariant::Typed(module) => {
                module.update_replacement_state(cpu, set, way, full_addr, ip, victim_addr, kind, hit)
            }
        }
    }

    pub fn final_stats(&mut self) {
        match &mut self.variant {
            ReplacementVariant::Legacy(module) => module.final_stats(),
            ReplacementVariant::Typed(module) => module.final_stats(),
        }
    }
}

static FACTORIES: phf::Map<&'static str, fn(&CacheShape) -> ReplacementVariant> = phf::phf_map! {
    "lru" => |shape| ReplacementVariant::Legacy(Box::new(Lru::new(shape))),
};

pub fn by_name(name: &str, shape: &CacheShape) -> ReplacementVariant {
    let factory = FACTORIES
        .get(name)
        .unwrap_or_else(|| panic!("unknown replacement policy {name:?}"));
    factory(shape)
}

/// Least-recently-used replacement, registered with the legacy signature.
pub struct Lru {
    ways: usize,
    cycle: u64,
    last_used_cycles: Vec<u64>,
}

impl Lru {
    pub fn new(shape: &CacheShape) -> Self {
        Self {
            ways: shape.ways,
            cycle: 0,
            last_used_cycles: vec![0; shape.sets * shape.ways],
        }
    }
}

impl ReplacementLegacy for Lru {
    fn find_victim(
        &mut self,
        _cpu: usize,
        _instr_id: u64,
        set: usize,
        _set_blocks: &[CacheBlock],
        _ip: Address,
        _full_addr: Address,
        _kind: u32,
    ) -> usize {
        let begin = set * self.ways;
        let slice = &self.last_used_cycles[begin..begin + self.ways];
        // The way with the most distant last use
        slice
            .iter()
            .enumerate()
            .min_by_key(|(_, &cycle)| cycle)
            .map(|(way, _)| way)
            .expect("cache sets have at least one way")
    }

    fn update_replacement_state(
        &mut self,
        _cpu: usize,
        set: usize,
        way: usize,
        _full_addr: Address,
        _ip: Address,
        _victim_addr: Address,
        kind: u32,
        hit: bool,
    ) {
        // Skip this for writeback hits
        if !hit || kind != AccessType::Write as u32 {
            self.last_used_cycles[set * self.ways + way] = self.cycle;
            self.cycle += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_victim(lru: &mut Lru, set: usize) -> usize {
        ReplacementLegacy::find_victim(
            lru,
            0,
            0,
            set,
            &[],
            Address::default(),
            Address::default(),
            AccessType::Load as u32,
        )
    }

    #[test]
    fn victim_is_the_least_recently_used_way() {
        let shape = CacheShape { sets: 1, ways: 4 };
        let mut lru = Lru::new(&shape);
        lru.last_used_cycles = vec![10, 2, 8, 4];
        assert_eq!(probe_victim(&mut lru, 0), 1);
    }

    #[test]
    fn demand_hit_refreshes_the_way() {
        let shape = CacheShape { sets: 1, ways: 2 };
        let mut lru = Lru::new(&shape);
        lru.last_used_cycles = vec![5, 6];
        lru.cycle = 7;
        lru.update_replacement_state(
            0,
            0,
            0,
            Address::default(),
            Address::default(),
            Address::default(),
            AccessType::Load as u32,
            true,
        );
        assert_eq!(probe_victim(&mut lru, 0), 1);
    }

    #[test]
    fn writeback_hit_does_not_refresh() {
        let shape = CacheShape { sets: 1, ways: 2 };
        let mut lru = Lru::new(&shape);
        lru.last_used_cycles = vec![5, 6];
        lru.cycle = 7;
        lru.update_replacement_state(
            0,
            0,
            0,
            Address::default(),
            Address::default(),
            Address::default(),
            AccessType::Write as u32,
            true,
        );
        assert_eq!(probe_victim(&mut lru, 0), 0);
    }

    #[test]
    fn host_dispatches_the_legacy_signature() {
        let shape = CacheShape { sets: 2, ways: 4 };
        let mut host = ReplacementHost::new(by_name("lru", &shape));
        let way = host.find_victim(
            0,
            0,
            1,
            &[],
            Address::default(),
            Address::default(),
            AccessType::Rfo,
        );
        assert!(way < 4);
    }

    #[test]
    #[should_panic(expected = "unknown replacement policy")]
    fn unknown_policy_is_a_configuration_error() {
        let shape = CacheShape { sets: 1, ways: 1 };
        let _ = by_name("optgen", &shape);
    }
}
