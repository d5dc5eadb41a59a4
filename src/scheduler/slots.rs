//! Slot assignment for running requests.
//!
//! A request keeps the slot it was admitted into until it retires, so the
//! slot index doubles as the key of its beam tree and of its cache lines in
//! the compute engine.

use crate::batch::RequestGuid;

#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<RequestGuid>>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity] }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest free slot.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Assign `guid` to the lowest free slot.
    pub fn assign(&mut self, guid: RequestGuid) -> Option<usize> {
        let idx = self.free_slot()?;
        self.slots[idx] = Some(guid);
        Some(idx)
    }

    /// Place `guid` in `slot`. Out-of-range slots are ignored.
    pub fn occupy(&mut self, slot: usize, guid: RequestGuid) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = Some(guid);
        }
    }

    /// Free `slot`, returning its former occupant.
    pub fn release(&mut self, slot: usize) -> Option<RequestGuid> {
        self.slots.get_mut(slot)?.take()
    }

    pub fn occupant(&self, slot: usize) -> Option<RequestGuid> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn slot_of(&self, guid: RequestGuid) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(guid))
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_free(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Iterate over `(slot, guid)` for occupied slots, in slot order.
    pub fn active(&self) -> impl Iterator<Item = (usize, RequestGuid)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|guid| (i, guid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_lowest_free_slot() {
        let mut table = SlotTable::new(3);
        assert_eq!(table.assign(RequestGuid(1)), Some(0));
        assert_eq!(table.assign(RequestGuid(2)), Some(1));
        assert_eq!(table.release(0), Some(RequestGuid(1)));
        assert_eq!(table.assign(RequestGuid(3)), Some(0));
        assert_eq!(table.slot_of(RequestGuid(2)), Some(1));
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn full_table_rejects() {
        let mut table = SlotTable::new(1);
        table.assign(RequestGuid(1));
        assert!(!table.has_free());
        assert_eq!(table.assign(RequestGuid(2)), None);
    }

    #[test]
    fn release_out_of_range_is_none() {
        let mut table = SlotTable::new(1);
        assert_eq!(table.release(5), None);
        assert_eq!(table.occupant(5), None);
    }
}
