//! Policy plug-in hosts.
//!
//! Policies register named hooks with an explicit signature version; the
//! hosts dispatch by version through static tables assembled before any
//! cycle runs. At most one variant per hook may be registered per module.

pub mod branch;
pub mod prefetch;
pub mod replacement;

pub use branch::{BranchHost, BranchVariant, BtbHost, BtbVariant};
pub use prefetch::{BranchHint, BranchHintQueue, PrefetchApi, PrefetcherHost, PrefetcherVariant};
pub use replacement::{ReplacementHost, ReplacementVariant};

use crate::mem::cache::CacheShape;

/// Replacement and prefetcher hooks attached to one cache instance.
pub struct CacheModules {
    pub replacement: ReplacementHost,
    pub prefetcher: PrefetcherHost,
}

#[derive(Default)]
pub struct CacheModuleBuilder {
    replacement: Option<ReplacementVariant>,
    prefetcher: Option<PrefetcherVariant>,
}

impl CacheModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replacement(mut self, variant: ReplacementVariant) -> Self {
        assert!(
            self.replacement.is_none(),
            "duplicate replacement hook registration"
        );
        self.replacement = Some(variant);
        self
    }

    pub fn prefetcher(mut self, variant: PrefetcherVariant) -> Self {
        assert!(
            self.prefetcher.is_none(),
            "duplicate prefetcher hook registration"
        );
        self.prefetcher = Some(variant);
        self
    }

    pub fn build(self, shape: &CacheShape) -> CacheModules {
        let replacement = self
            .replacement
            .unwrap_or_else(|| replacement::by_name("lru", shape));
        let prefetcher = self
            .prefetcher
            .unwrap_or_else(|| prefetch::by_name("no"));
        CacheModules {
            replacement: ReplacementHost::new(replacement),
            prefetcher: PrefetcherHost::new(prefetcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "duplicate replacement hook")]
    fn duplicate_replacement_registration_is_rejected() {
        let shape = CacheShape { sets: 1, ways: 4 };
        let _ = CacheModuleBuilder::new()
            .replacement(replacement::by_name("lru", &shape))
            .replacement(replacement::by_name("lru", &shape));
    }
}
