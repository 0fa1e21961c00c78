//! Slot pool plus roster, and the coordinator logic tying them together.

use std::fmt;

use rollcall_replica::{MemberId, RecordId, Replicator, SlotIndex, Versioned};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::roster::reconcile;
use crate::{Payload, Roster, Slot, SlotChange, SlotPool, SlotState};

/// What a peer is entitled to do with the shared pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Holds the roster. Seats arrivals, frees departures, reconciles.
    Coordinator,
    /// Mirrors state and toggles only its own slot.
    Member,
}

impl Role {
    /// Check if this is the coordinator role.
    pub fn is_coordinator(self) -> bool {
        self == Role::Coordinator
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Member => write!(f, "member"),
        }
    }
}

/// Result of a reconcile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not the coordinator; nothing was computed.
    Skipped,
    /// Recomputed; the table already matched the slots.
    Unchanged,
    /// Recomputed, written and propagated.
    Updated,
}

/// The slot pool and the roster derived from it.
#[derive(Debug, Clone)]
pub struct Aggregator {
    pool: SlotPool,
    roster: Versioned<Roster>,
    role: Role,
}

impl Aggregator {
    /// Create an empty pool and table of the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: SlotPool::new(capacity),
            roster: Versioned::new(Roster::new(capacity)),
            role: Role::Member,
        }
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Switch role. Returns true if it changed.
    pub fn set_role(&mut self, role: Role) -> bool {
        let changed = self.role != role;
        self.role = role;
        changed
    }

    /// The slot pool.
    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    /// A slot, for mutation by its owner.
    pub fn slot_mut(&mut self, index: SlotIndex) -> Option<&mut Slot> {
        self.pool.get_mut(index)
    }

    /// The roster.
    pub fn roster(&self) -> &Roster {
        self.roster.get()
    }

    /// The roster with its version.
    pub fn roster_versioned(&self) -> &Versioned<Roster> {
        &self.roster
    }

    /// Seat an arriving member in the lowest empty slot.
    ///
    /// Coordinator only. A member that already holds a slot, or a full pool,
    /// leaves everything as it is.
    pub fn on_member_joined<R: Replicator<Payload>>(&mut self, id: MemberId, link: &mut R) -> Vec<SlotChange> {
        if !self.role.is_coordinator() {
            return Vec::new();
        }
        if let Some(index) = self.pool.find_owner(id) {
            trace!(member = %id, slot = %index, "member already seated");
            return Vec::new();
        }
        let Some(index) = self.pool.first_empty() else {
            debug!(member = %id, capacity = self.pool.capacity(), "no empty slot, member unserved");
            return Vec::new();
        };
        let role = self.role;
        match self.pool.get_mut(index) {
            Some(slot) => slot.assign(id, role, link),
            None => Vec::new(),
        }
    }

    /// Free the slot held by a departing member.
    ///
    /// Coordinator only. Unknown members are ignored.
    pub fn on_member_left<R: Replicator<Payload>>(&mut self, id: MemberId, link: &mut R) -> Vec<SlotChange> {
        if !self.role.is_coordinator() {
            return Vec::new();
        }
        let Some(index) = self.pool.find_owner(id) else {
            trace!(member = %id, "departed member held no slot");
            return Vec::new();
        };
        let role = self.role;
        match self.pool.get_mut(index) {
            Some(slot) => slot.release(role, link),
            None => Vec::new(),
        }
    }

    /// Whether a slot change obliges this peer to reconcile.
    ///
    /// Informational everywhere except on the coordinator, where any change
    /// to the set of active owners requires a fresh table.
    pub fn on_slot_changed(&self, change: &SlotChange) -> bool {
        self.role.is_coordinator() && matches!(change, SlotChange::ActiveChanged { .. })
    }

    /// Recompute the roster from the pool and propagate it if it changed.
    pub fn reconcile<R: Replicator<Payload>>(&mut self, link: &mut R) -> ReconcileOutcome {
        if !self.role.is_coordinator() {
            return ReconcileOutcome::Skipped;
        }
        let next = reconcile(self.roster.get(), &self.pool);
        if &next == self.roster.get() {
            trace!(members = next.member_count(), "roster already current");
            return ReconcileOutcome::Unchanged;
        }
        if !link.is_authority_for(RecordId::Roster) {
            link.request_authority(RecordId::Roster);
        }
        debug!(
            members = next.member_count(),
            previous = self.roster.get().member_count(),
            "roster reconciled"
        );
        self.roster.write(link.local_peer(), next);
        link.propagate(RecordId::Roster, self.roster.clone().map(Payload::Roster));
        ReconcileOutcome::Updated
    }

    /// Merge a slot state from another peer.
    pub fn apply_remote_slot(&mut self, index: SlotIndex, incoming: Versioned<SlotState>) -> Vec<SlotChange> {
        match self.pool.get_mut(index) {
            Some(slot) => slot.apply_remote(incoming),
            None => {
                debug!(slot = %index, "update for slot outside the pool");
                Vec::new()
            }
        }
    }

    /// Merge a roster from another peer. Returns true if it replaced ours.
    pub fn apply_remote_roster(&mut self, incoming: Versioned<Roster>) -> bool {
        self.roster.merge(incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_replica::ReplicaLink;

    fn member(raw: u32) -> MemberId {
        MemberId::new(raw).unwrap()
    }

    fn coordinator(capacity: usize) -> (Aggregator, ReplicaLink<Payload>) {
        let mut aggregator = Aggregator::new(capacity);
        aggregator.set_role(Role::Coordinator);
        (aggregator, ReplicaLink::new(member(1)))
    }

    #[test]
    fn arrivals_fill_slots_first_fit() {
        let (mut agg, mut link) = coordinator(4);

        agg.on_member_joined(member(5), &mut link);
        agg.on_member_joined(member(6), &mut link);

        assert_eq!(agg.pool().find_owner(member(5)), Some(SlotIndex(0)));
        assert_eq!(agg.pool().find_owner(member(6)), Some(SlotIndex(1)));
    }

    #[test]
    fn repeated_arrival_keeps_one_slot() {
        let (mut agg, mut link) = coordinator(4);

        agg.on_member_joined(member(5), &mut link);
        assert!(agg.on_member_joined(member(5), &mut link).is_empty());
        assert_eq!(agg.pool().occupied(), 1);
    }

    #[test]
    fn members_do_not_seat_anyone() {
        let mut agg = Aggregator::new(4);
        let mut link: ReplicaLink<Payload> = ReplicaLink::new(member(2));

        assert!(agg.on_member_joined(member(5), &mut link).is_empty());
        assert_eq!(agg.pool().occupied(), 0);
        assert_eq!(agg.reconcile(&mut link), ReconcileOutcome::Skipped);
    }

    #[test]
    fn last_seat_goes_to_one_of_two_arrivals() {
        let (mut agg, mut link) = coordinator(1);

        let first = agg.on_member_joined(member(5), &mut link);
        let second = agg.on_member_joined(member(6), &mut link);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(agg.pool().find_owner(member(5)), Some(SlotIndex(0)));
        assert_eq!(agg.pool().find_owner(member(6)), None);
    }

    #[test]
    fn departure_frees_the_slot_for_reuse() {
        let (mut agg, mut link) = coordinator(2);
        agg.on_member_joined(member(5), &mut link);
        agg.on_member_joined(member(6), &mut link);

        agg.on_member_left(member(5), &mut link);
        agg.on_member_joined(member(7), &mut link);

        assert_eq!(agg.pool().find_owner(member(7)), Some(SlotIndex(0)));
        assert!(agg.on_member_left(member(99), &mut link).is_empty());
    }

    #[test]
    fn only_activation_changes_trigger_reconcile() {
        let (agg, _) = coordinator(2);
        let owner = SlotChange::OwnerChanged { slot: SlotIndex(0), owner: Some(member(5)) };
        let active = SlotChange::ActiveChanged { slot: SlotIndex(0), owner: Some(member(5)), active: true };

        assert!(!agg.on_slot_changed(&owner));
        assert!(agg.on_slot_changed(&active));

        let member_view = Aggregator::new(2);
        assert!(!member_view.on_slot_changed(&active));
    }

    #[test]
    fn reconcile_writes_only_on_change() {
        let (mut agg, mut link) = coordinator(4);
        agg.on_member_joined(member(5), &mut link);
        let mut owner: ReplicaLink<Payload> = ReplicaLink::new(member(5));
        agg.slot_mut(SlotIndex(0)).unwrap().set_active(true, &mut owner);
        link.drain();

        assert_eq!(agg.reconcile(&mut link), ReconcileOutcome::Updated);
        assert_eq!(agg.roster().members()[0], Some(member(5)));
        let version = agg.roster_versioned().version;
        // claim + roster state
        assert_eq!(link.drain().len(), 2);

        assert_eq!(agg.reconcile(&mut link), ReconcileOutcome::Unchanged);
        assert_eq!(agg.roster_versioned().version, version);
        assert_eq!(link.pending(), 0);
    }
}
