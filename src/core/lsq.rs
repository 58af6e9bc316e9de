use crate::arch::Address;
use crate::base::behavior::Cycle;

/// One load- or store-queue slot.
///
/// `translated` implies a valid physical address; `fetched` implies the
/// cache responded. `producer_id` on a load names the in-window store it
/// forwards from.
#[derive(Debug, Clone, Default)]
pub struct LsqEntry {
    pub instr_id: u64,
    pub producer_id: Option<u64>,
    pub virtual_address: Address,
    pub physical_address: Address,
    pub translated: bool,
    pub fetched: bool,
    pub translation_requested: bool,
    pub fetch_requested: bool,
    pub event_cycle: Cycle,
    pub asid: u16,
}

impl LsqEntry {
    pub fn new(instr_id: u64, virtual_address: Address, asid: u16) -> Self {
        Self {
            instr_id,
            virtual_address,
            asid,
            ..Self::default()
        }
    }
}

/// Fixed-capacity slot array addressed by stable indices, so packets can
/// carry `lq`/`sq` positions across components.
#[derive(Debug)]
pub struct LsqTable {
    slots: Vec<Option<LsqEntry>>,
}

impl LsqTable {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LSQ capacity must be nonzero");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn insert(&mut self, entry: LsqEntry) -> Option<usize> {
        let free = self.slots.iter().position(Option::is_none)?;
        self.slots[free] = Some(entry);
        Some(free)
    }

    pub fn get(&self, index: usize) -> Option<&LsqEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut LsqEntry> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, index: usize) -> Option<LsqEntry> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn occupancy(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn has_room(&self, count: usize) -> bool {
        self.slots.len() - self.occupancy() >= count
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &LsqEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (index, entry)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut LsqEntry)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|entry| (index, entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_stay_stable_across_removal() {
        let mut table = LsqTable::new(3);
        let a = table.insert(LsqEntry::new(1, Address::new(0x100), 0)).unwrap();
        let b = table.insert(LsqEntry::new(2, Address::new(0x200), 0)).unwrap();
        table.remove(a);
        assert_eq!(table.get(b).unwrap().instr_id, 2);
        let c = table.insert(LsqEntry::new(3, Address::new(0x300), 0)).unwrap();
        assert_eq!(c, a, "freed slot is reused");
    }

    #[test]
    fn full_table_refuses_inserts() {
        let mut table = LsqTable::new(1);
        assert!(table.insert(LsqEntry::new(1, Address::new(0x100), 0)).is_some());
        assert!(table.insert(LsqEntry::new(2, Address::new(0x200), 0)).is_none());
        assert!(!table.has_room(1));
    }
}
