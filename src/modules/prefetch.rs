use std::sync::{Arc, RwLock};

use crate::arch::{Address, BLOCK_SIZE};
use crate::base::packet::AccessType;
use crate::core::instr::BranchType;

/// A branch the core observed at prediction time, forwarded to the
/// instruction cache's prefetcher.
#[derive(Debug, Clone, Copy)]
pub struct BranchHint {
    pub ip: Address,
    pub branch_type: BranchType,
    pub target: Address,
}

/// Single-producer buffer between a core and its L1I prefetcher; the cache
/// drains it once per cycle.
pub type BranchHintQueue = Arc<RwLock<Vec<BranchHint>>>;

pub fn branch_hint_queue() -> BranchHintQueue {
    Arc::new(RwLock::new(Vec::new()))
}

/// Services the host cache exposes to its prefetcher.
pub trait PrefetchApi {
    /// Queue a prefetch for the line containing `addr`. Returns false when
    /// the prefetch queue refuses it.
    fn prefetch_line(&mut self, addr: Address, fill_this_level: bool, metadata: u32) -> bool;

    fn mshr_occupancy_ratio(&self) -> f64;
}

/// First signature generation of the access hook.
pub trait PrefetcherV1: Send + Sync {
    fn cache_operate(
        &mut self,
        api: &mut dyn PrefetchApi,
        addr: Address,
        ip: Address,
        cache_hit: bool,
        kind: u32,
        metadata: u32,
    ) -> u32;
}

/// Second generation: adds the useful-prefetch flag.
pub trait PrefetcherV2: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn cache_operate(
        &mut self,
        api: &mut dyn PrefetchApi,
        addr: Address,
        ip: Address,
        cache_hit: bool,
        useful_prefetch: bool,
        kind: u32,
        metadata: u32,
    ) -> u32;
}

/// Current generation: typed access kind.
pub trait PrefetcherV3: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn cache_operate(
        &mut self,
        api: &mut dyn PrefetchApi,
        addr: Address,
        ip: Address,
        cache_hit: bool,
        useful_prefetch: bool,
        kind: AccessType,
        metadata: u32,
    ) -> u32;
}

/// Optional hooks shared by every generation; defaults are no-ops.
pub trait PrefetcherCommon: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn cache_fill(
        &mut self,
        _api: &mut dyn PrefetchApi,
        _addr: Address,
        _set: usize,
        _way: usize,
        _prefetch: bool,
        _evicted_addr: Address,
        metadata: u32,
    ) -> u32 {
        metadata
    }

    fn cycle_operate(&mut self, _api: &mut dyn PrefetchApi) {}

    fn branch_operate(&mut self, _ip: Address, _branch_type: BranchType, _target: Address) {}

    fn final_stats(&mut self) {}
}

pub enum PrefetcherVariant {
    V1(Box<dyn PrefetcherFullV1>),
    V2(Box<dyn PrefetcherFullV2>),
    V3(Box<dyn PrefetcherFullV3>),
}

pub trait PrefetcherFullV1: PrefetcherV1 + PrefetcherCommon {}
impl<T: PrefetcherV1 + PrefetcherCommon> PrefetcherFullV1 for T {}
pub trait PrefetcherFullV2: PrefetcherV2 + PrefetcherCommon {}
impl<T: PrefetcherV2 + PrefetcherCommon> PrefetcherFullV2 for T {}
pub trait PrefetcherFullV3: PrefetcherV3 + PrefetcherCommon {}
impl<T: PrefetcherV3 + PrefetcherCommon> PrefetcherFullV3 for T {}

pub struct PrefetcherHost {
    variant: PrefetcherVariant,
}

impl PrefetcherHost {
    pub fn new(variant: PrefetcherVariant) -> Self {
        Self { variant }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cache_operate(
        &mut self,
        api: &mut dyn PrefetchApi,
        addr: Address,
        ip: Address,
        cache_hit: bool,
        useful_prefetch: bool,
        kind: AccessType,
        metadata: u32,
    ) -> u32 {
        match &mut self.variant {
            PrefetcherVariant::V1(module) => {
                module.cache_operate(api, addr, ip, cache_hit, kind as u32, metadata)
            }
            PrefetcherVariant::V2(module) => module.cache_operate(
                api,
                addr,
                ip,
                cache_hit,
                useful_prefetch,
                kind as u32,
                metadata,
            ),
            PrefetcherVariant::V3(module) => {
                module.cache_operate(api, addr, ip, cache_hit, useful_prefetch, kind, metadata)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cache_fill(
        &mut self,
        api: &mut dyn PrefetchApi,
        addr: Address,
        set: usize,
        way: usize,
        prefetch: bool,
        evicted_addr: Address,
        metadata: u32,
    ) -> u32 {
        self.common()
            .cache_fill(api, addr, set, way, prefetch, evicted_addr, metadata)
    }

    pub fn cycle_operate(&mut self, api: &mut dyn PrefetchApi) {
        self.common().cycle_operate(api);
    }

    pub fn branch_operate(&mut self, ip: Address, branch_type: BranchType, target: Address) {
        self.common().branch_operate(ip, branch_type, target);
    }

    pub fn final_stats(&mut self) {
        self.common().final_stats();
    }

    fn common(&mut self) -> &mut dyn PrefetcherCommon {
        match &mut self.variant {
            PrefetcherVariant::V1(module) => module.as_mut(),
            PrefetcherVariant::V2(module) => module.as_mut(),
            PrefetcherVariant::V3(module) => module.as_mut(),
        }
    }
}

static FACTORIES: phf::Map<&'static str, fn() -> PrefetcherVariant> = phf::phf_map! {
    "no" => || PrefetcherVariant::V3(Box::new(NoPrefetcher)),
    "next_line" => || PrefetcherVariant::V3(Box::new(NextLine)),
};

pub fn by_name(name: &str) -> PrefetcherVariant {
    let factory = FACTORIES
        .get(name)
        .unwrap_or_else(|| panic!("unknown prefetcher {name:?}"));
    factory()
}

pub struct NoPrefetcher;

impl PrefetcherV3 for NoPrefetcher {
    fn cache_operate(
        &mut self,
        _api: &mut dyn PrefetchApi,
        _addr: Address,
        _ip: Address,
        _cache_hit: bool,
        _useful_prefetch: bool,
        _kind: AccessType,
        metadata: u32,
    ) -> u32 {
        metadata
    }
}

impl PrefetcherCommon for NoPrefetcher {}

/// Prefetch the next sequential line on every access.
pub struct NextLine;

impl PrefetcherV3 for NextLine {
    fn cache_operate(
        &mut self,
        api: &mut dyn PrefetchApi,
        addr: Address,
        _ip: Address,
        _cache_hit: bool,
        _useful_prefetch: bool,
        _kind: AccessType,
        metadata: u32,
    ) -> u32 {
        api.prefetch_line(addr + BLOCK_SIZE as i64, true, metadata);
        metadata
    }
}

impl PrefetcherCommon for NextLine {}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingApi {
        issued: Vec<(u64, bool)>,
    }

    impl PrefetchApi for RecordingApi {
        fn prefetch_line(&mut self, addr: Address, fill_this_level: bool, _metadata: u32) -> bool {
            self.issued.push((addr.raw(), fill_this_level));
            true
        }

        fn mshr_occupancy_ratio(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn next_line_requests_the_following_block() {
        let mut host = PrefetcherHost::new(by_name("next_line"));
        let mut api = RecordingApi { issued: Vec::new() };
        host.cache_operate(
            &mut api,
            Address::new(0x1000),
            Address::default(),
            true,
            false,
            AccessType::Load,
            0,
        );
        assert_eq!(api.issued, vec![(0x1000 + BLOCK_SIZE, true)]);
    }

    #[test]
    fn missing_optional_hooks_default_to_noops() {
        let mut host = PrefetcherHost::new(by_name("no"));
        let mut api = RecordingApi { issued: Vec::new() };
        host.cycle_operate(&mut api);
        host.branch_operate(Address::default(), BranchType::NotBranch, Address::default());
        host.final_stats();
        assert!(api.issued.is_empty());
    }
}
