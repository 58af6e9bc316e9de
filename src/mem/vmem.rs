use std::collections::HashMap;

use log::debug;
use serde::Deserialize;

use crate::arch::{bitmask, lg2, splice, Address, PageNumber, PageOffset};
use crate::arch::{LOG2_PAGE_SIZE, PAGE_SIZE, PTE_BYTES};
use crate::base::behavior::Cycle;
use crate::sim::config::Config;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VmemConfig {
    /// log2 of the physical memory pool in bytes.
    pub vmem_size_bits: u32,
    /// Bytes per page-table page.
    pub pte_page_size: u64,
    pub levels: usize,
    pub minor_fault_penalty: Cycle,
}

impl Config for VmemConfig {}

impl Default for VmemConfig {
    fn default() -> Self {
        Self {
            vmem_size_bits: 33,
            pte_page_size: 4096,
            levels: 5,
            minor_fault_penalty: 200,
        }
    }
}

pub type VmemRef = std::sync::Arc<std::sync::RwLock<VirtualMemory>>;

/// Owns the `(asid, vpn) -> ppn` mapping and the physical frame free-list.
///
/// Frames are handed out on demand; once assigned, a mapping never changes.
/// Page-table pages are carved from the same pool, so distinct ASIDs never
/// share table entries.
pub struct VirtualMemory {
    pte_page_size: u64,
    levels: usize,
    minor_fault_penalty: Cycle,
    next_ppage: u64,
    last_ppage: u64,
    page_map: HashMap<(u16, u64), u64>,
    pte_pages: HashMap<(u16, usize, u64), u64>,
}

impl VirtualMemory {
    pub fn new(cfg: &VmemConfig) -> Self {
        assert!(cfg.levels > 0, "page tables need at least one level");
        assert!(
            cfg.pte_page_size.is_power_of_two() && cfg.pte_page_size >= 2 * PTE_BYTES,
            "PTE page size must be a power of two holding at least two entries"
        );
        assert!(
            cfg.vmem_size_bits > LOG2_PAGE_SIZE,
            "physical pool smaller than one page"
        );
        Self {
            pte_page_size: cfg.pte_page_size,
            levels: cfg.levels,
            minor_fault_penalty: cfg.minor_fault_penalty,
            // Frame zero stays reserved so a zero address keeps meaning
            // "not present".
            next_ppage: PAGE_SIZE,
            last_ppage: 1 << cfg.vmem_size_bits,
            page_map: HashMap::new(),
            pte_pages: HashMap::new(),
        }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn minor_fault_penalty(&self) -> Cycle {
        self.minor_fault_penalty
    }

    /// Bits of index per page-table level.
    fn offset_bits(&self) -> u32 {
        lg2(self.pte_page_size) - lg2(PTE_BYTES)
    }

    /// Shift amount locating the level's index field within an address.
    pub fn shamt(&self, level: usize) -> u32 {
        assert!((1..=self.levels).contains(&level), "level out of range");
        LOG2_PAGE_SIZE + self.offset_bits() * (level as u32 - 1)
    }

    /// The page-table index an address selects at the given level.
    pub fn get_offset(&self, addr: Address, level: usize) -> u64 {
        (addr.raw() >> self.shamt(level)) & bitmask(self.offset_bits(), 0)
    }

    fn pop_pages(&mut self, count: u64) -> u64 {
        let base = self.next_ppage;
        let end = base + count * PAGE_SIZE;
        assert!(
            end <= self.last_ppage,
            "physical frame pool exhausted at {:#x}",
            self.last_ppage
        );
        self.next_ppage = end;
        base
    }

    /// Translate a full virtual address, allocating on first touch.
    /// The second return is true on a minor fault.
    pub fn va_to_pa(&mut self, asid: u16, vaddr: Address) -> (Address, bool) {
        let vpn = PageNumber::from_slice(vaddr).raw();
        let mut fault = false;
        let ppage = match self.page_map.get(&(asid, vpn)) {
            Some(&ppage) => ppage,
            None => {
                let ppage = self.pop_pages(1);
                self.page_map.insert((asid, vpn), ppage);
                fault = true;
                debug!("vmem: asid {asid} vpn {vpn:#x} -> ppage {ppage:#x}");
                ppage
            }
        };
        let pa = splice(
            PageNumber::new(ppage >> LOG2_PAGE_SIZE),
            PageOffset::from_slice(vaddr),
        );
        (Address::from_slice(pa), fault)
    }

    /// Physical address of the PTE consulted at `level` for `vaddr`.
    pub fn get_pte_pa(&mut self, asid: u16, vaddr: Address, level: usize) -> (Address, bool) {
        let index = self.get_offset(vaddr, level);
        let prefix = vaddr.raw() >> self.shamt(level) >> self.offset_bits();
        let mut fault = false;
        let base = match self.pte_pages.get(&(asid, level, prefix)) {
            Some(&base) => base,
            None => {
                let frames = self.pte_page_size.div_ceil(PAGE_SIZE).max(1);
                let base = self.pop_pages(frames);
                self.pte_pages.insert((asid, level, prefix), base);
                fault = true;
                base
            }
        };
        (Address::new(base + index * PTE_BYTES), fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmem() -> VirtualMemory {
        VirtualMemory::new(&VmemConfig::default())
    }

    #[test]
    fn shamt_matches_the_level_math() {
        let uut = vmem();
        let log2_pte_page_size = lg2(4096);
        for level in 1..=5 {
            assert_eq!(
                uut.shamt(level),
                LOG2_PAGE_SIZE + (log2_pte_page_size - lg2(PTE_BYTES)) * (level as u32 - 1)
            );
        }
    }

    #[test]
    fn offsets_extract_the_level_index() {
        let uut = vmem();
        for level in 1..=5u64 {
            let addr = Address::new(
                (0xffff_ffff_ffe0_0000u64 | (level << LOG2_PAGE_SIZE)) << ((level - 1) * 9),
            );
            assert_eq!(uut.get_offset(addr, level as usize), level);
        }
    }

    #[test]
    fn mappings_are_stable_after_first_allocation() {
        let mut uut = vmem();
        let vaddr = Address::new(0xdead_beef_dead_beef);
        let (first, fault) = uut.va_to_pa(0, vaddr);
        assert!(fault);
        let (second, fault) = uut.va_to_pa(0, vaddr);
        assert!(!fault);
        assert_eq!(first, second);
    }

    #[test]
    fn asids_do_not_share_mappings() {
        let mut uut = vmem();
        let vaddr = Address::new(0xdead_beef_dead_beef);
        let (pa0, _) = uut.va_to_pa(0, vaddr);
        let (pa1, _) = uut.va_to_pa(1, vaddr);
        assert_ne!(
            PageNumber::from_slice(pa0),
            PageNumber::from_slice(pa1)
        );
    }

    #[test]
    fn page_offset_survives_translation() {
        let mut uut = vmem();
        let vaddr = Address::new(0x1234_5678);
        let (pa, _) = uut.va_to_pa(0, vaddr);
        assert_eq!(
            PageOffset::from_slice(pa),
            PageOffset::from_slice(vaddr)
        );
    }

    #[test]
    fn pte_addresses_differ_per_level() {
        let mut uut = vmem();
        let vaddr = Address::new(0xdead_beef_dead_beef);
        let (l5, fault5) = uut.get_pte_pa(0, vaddr, 5);
        let (l4, fault4) = uut.get_pte_pa(0, vaddr, 4);
        assert!(fault5 && fault4);
        assert_ne!(PageNumber::from_slice(l5), PageNumber::from_slice(l4));
        let (l5_again, fault) = uut.get_pte_pa(0, vaddr, 5);
        assert!(!fault);
        assert_eq!(l5, l5_again);
    }

    #[test]
    #[should_panic(expected = "physical frame pool exhausted")]
    fn pool_exhaustion_is_fatal() {
        let cfg = VmemConfig {
            vmem_size_bits: 13,
            ..VmemConfig::default()
        };
        let mut uut = VirtualMemory::new(&cfg);
        for page in 0.. {
            uut.va_to_pa(0, Address::new(page << LOG2_PAGE_SIZE));
        }
    }
}
