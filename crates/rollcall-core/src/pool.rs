//! The fixed arena of slots.
//!
//! Slots are created once, all empty, and reused forever. Lookups scan in
//! index order, so the lowest index wins every tie: a joining member gets the
//! lowest empty slot, and `active_members` lists owners in slot order.

use rollcall_replica::{MemberId, SlotIndex};

use crate::{Slot, SlotState};

/// Fixed-capacity pool of slots addressed by [`SlotIndex`].
#[derive(Debug, Clone)]
pub struct SlotPool {
    slots: Vec<Slot>,
}

impl SlotPool {
    /// Create `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|i| Slot::new(SlotIndex(i))).collect(),
        }
    }

    /// Number of slots. Never changes.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Get a slot.
    pub fn get(&self, index: SlotIndex) -> Option<&Slot> {
        self.slots.get(index.0)
    }

    /// Get a slot for mutation.
    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut Slot> {
        self.slots.get_mut(index.0)
    }

    /// All slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Lowest-index empty slot.
    pub fn first_empty(&self) -> Option<SlotIndex> {
        self.slots
            .iter()
            .find(|s| s.state().is_empty())
            .map(Slot::index)
    }

    /// Lowest-index slot owned by `id`.
    pub fn find_owner(&self, id: MemberId) -> Option<SlotIndex> {
        self.slots
            .iter()
            .find(|s| s.state().owner() == Some(id))
            .map(Slot::index)
    }

    /// State of the slot owned by `id`, if any.
    pub fn state_of(&self, id: MemberId) -> Option<SlotState> {
        self.find_owner(id)
            .and_then(|i| self.get(i))
            .map(Slot::state)
    }

    /// Owners of active slots, in index order.
    pub fn active_members(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.slots.iter().filter_map(|s| s.state().active_member())
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.state().is_empty()).count()
    }

    /// A member that owns more than one slot, if any.
    ///
    /// Should always be `None` once updates have settled.
    pub fn duplicate_owner(&self) -> Option<MemberId> {
        let mut seen = std::collections::BTreeSet::new();
        self.slots
            .iter()
            .filter_map(|s| s.state().owner())
            .find(|id| !seen.insert(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Payload, Role};
    use rollcall_replica::ReplicaLink;

    fn member(raw: u32) -> MemberId {
        MemberId::new(raw).unwrap()
    }

    fn coordinator() -> ReplicaLink<Payload> {
        ReplicaLink::new(member(1))
    }

    #[test]
    fn new_pool_is_all_empty() {
        let pool = SlotPool::new(16);
        assert_eq!(pool.capacity(), 16);
        assert_eq!(pool.occupied(), 0);
        assert_eq!(pool.first_empty(), Some(SlotIndex(0)));
        assert!(pool.get(SlotIndex(16)).is_none());
    }

    #[test]
    fn first_empty_is_lowest_index() {
        let mut link = coordinator();
        let mut pool = SlotPool::new(4);
        for (i, id) in [5, 6, 7].into_iter().enumerate() {
            pool.get_mut(SlotIndex(i)).unwrap().assign(member(id), Role::Coordinator, &mut link);
        }
        pool.get_mut(SlotIndex(1)).unwrap().release(Role::Coordinator, &mut link);

        assert_eq!(pool.first_empty(), Some(SlotIndex(1)));
        assert_eq!(pool.find_owner(member(7)), Some(SlotIndex(2)));
        assert_eq!(pool.find_owner(member(6)), None);
    }

    #[test]
    fn full_pool_has_no_empty_slot() {
        let mut link = coordinator();
        let mut pool = SlotPool::new(2);
        pool.get_mut(SlotIndex(0)).unwrap().assign(member(5), Role::Coordinator, &mut link);
        pool.get_mut(SlotIndex(1)).unwrap().assign(member(6), Role::Coordinator, &mut link);

        assert_eq!(pool.first_empty(), None);
        assert_eq!(pool.duplicate_owner(), None);
    }
}
