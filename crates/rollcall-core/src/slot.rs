//! A single claimable seat.
//!
//! # States
//!
//! ```text
//!            assign(id)                 set_active(true)
//!   Empty ─────────────► Occupied{id, inactive} ◄──────────► Occupied{id, active}
//!     ▲                          │           set_active(false)        │
//!     └──────── release() ───────┴────────────────────────────────────┘
//! ```
//!
//! Unclaimed slots cannot be active: there is no state to express it.

use rollcall_replica::{MemberId, RecordId, Replicator, SlotIndex, Versioned};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{Payload, Role};

/// Replicated state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum SlotState {
    /// Nobody holds this slot.
    #[default]
    Empty,
    /// Held by `owner`, who may have opted into the roster.
    Occupied { owner: MemberId, active: bool },
}

impl SlotState {
    /// Owner of the slot, if claimed.
    pub fn owner(self) -> Option<MemberId> {
        match self {
            SlotState::Empty => None,
            SlotState::Occupied { owner, .. } => Some(owner),
        }
    }

    /// Whether the owner has opted in. Always false when empty.
    pub fn is_active(self) -> bool {
        matches!(self, SlotState::Occupied { active: true, .. })
    }

    /// Check if nobody holds the slot.
    pub fn is_empty(self) -> bool {
        self == SlotState::Empty
    }

    /// The member this slot contributes to the roster, if any.
    pub fn active_member(self) -> Option<MemberId> {
        match self {
            SlotState::Occupied { owner, active: true } => Some(owner),
            _ => None,
        }
    }
}

/// A field change on a slot, fired on every peer that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change")]
pub enum SlotChange {
    /// The owner changed. `None` means the slot was released.
    OwnerChanged {
        slot: SlotIndex,
        owner: Option<MemberId>,
    },
    /// The member this slot puts on the roster changed.
    ActiveChanged {
        slot: SlotIndex,
        owner: Option<MemberId>,
        active: bool,
    },
}

impl SlotChange {
    /// The slot that changed.
    pub fn slot(&self) -> SlotIndex {
        match self {
            SlotChange::OwnerChanged { slot, .. } | SlotChange::ActiveChanged { slot, .. } => *slot,
        }
    }

    /// Changes between two states of the same slot, owner first.
    pub fn between(slot: SlotIndex, before: SlotState, after: SlotState) -> Vec<SlotChange> {
        let mut changes = Vec::new();
        if before.owner() != after.owner() {
            changes.push(SlotChange::OwnerChanged {
                slot,
                owner: after.owner(),
            });
        }
        if before.active_member() != after.active_member() {
            changes.push(SlotChange::ActiveChanged {
                slot,
                owner: after.owner(),
                active: after.is_active(),
            });
        }
        changes
    }
}

/// One seat in the pool together with its write history.
#[derive(Debug, Clone)]
pub struct Slot {
    index: SlotIndex,
    state: Versioned<SlotState>,
}

impl Slot {
    /// Create an empty slot.
    pub fn new(index: SlotIndex) -> Self {
        Self {
            index,
            state: Versioned::new(SlotState::Empty),
        }
    }

    /// Position of this slot in the pool.
    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// The replicated record this slot is.
    pub fn record(&self) -> RecordId {
        RecordId::Slot(self.index)
    }

    /// Current state.
    pub fn state(&self) -> SlotState {
        self.state.value
    }

    /// Current state with its version.
    pub fn versioned(&self) -> &Versioned<SlotState> {
        &self.state
    }

    /// Claim an empty slot for `id`.
    ///
    /// Allowed for the coordinator, or for `id` itself. A slot that is
    /// already held is left alone.
    pub fn assign<R: Replicator<Payload>>(
        &mut self,
        id: MemberId,
        role: Role,
        link: &mut R,
    ) -> Vec<SlotChange> {
        if !role.is_coordinator() && link.local_peer() != id {
            trace!(slot = %self.index, member = %id, "assign refused: not coordinator");
            return Vec::new();
        }
        if !self.state().is_empty() {
            trace!(slot = %self.index, member = %id, "assign refused: slot taken");
            return Vec::new();
        }
        debug!(slot = %self.index, member = %id, "slot assigned");
        self.commit(SlotState::Occupied { owner: id, active: false }, link)
    }

    /// Clear the owner and force the slot inactive.
    ///
    /// Allowed for the coordinator, or for the owner itself.
    pub fn release<R: Replicator<Payload>>(&mut self, role: Role, link: &mut R) -> Vec<SlotChange> {
        let Some(owner) = self.state().owner() else {
            trace!(slot = %self.index, "release ignored: already empty");
            return Vec::new();
        };
        if !role.is_coordinator() && link.local_peer() != owner {
            trace!(slot = %self.index, "release refused: not coordinator or owner");
            return Vec::new();
        }
        debug!(slot = %self.index, member = %owner, "slot released");
        self.commit(SlotState::Empty, link)
    }

    /// Opt the owner in or out of the roster. Only the owner may do this.
    pub fn set_active<R: Replicator<Payload>>(&mut self, active: bool, link: &mut R) -> Vec<SlotChange> {
        let caller = link.local_peer();
        match self.state() {
            SlotState::Occupied { owner, active: current } if owner == caller => {
                if current == active {
                    return Vec::new();
                }
                debug!(slot = %self.index, member = %owner, active, "activation changed");
                self.commit(SlotState::Occupied { owner, active }, link)
            }
            _ => {
                trace!(slot = %self.index, caller = %caller, "set_active refused: not owner");
                Vec::new()
            }
        }
    }

    /// Flip the owner's activation. Only the owner may do this.
    pub fn toggle_active<R: Replicator<Payload>>(&mut self, link: &mut R) -> Vec<SlotChange> {
        let active = self.state().is_active();
        self.set_active(!active, link)
    }

    /// Merge a state received from another peer.
    /// Returns the field changes it caused, empty if it was stale.
    pub fn apply_remote(&mut self, incoming: Versioned<SlotState>) -> Vec<SlotChange> {
        let before = self.state();
        if !self.state.merge(incoming) {
            return Vec::new();
        }
        SlotChange::between(self.index, before, self.state())
    }

    /// Acquire authority, write, then propagate the whole record.
    fn commit<R: Replicator<Payload>>(&mut self, next: SlotState, link: &mut R) -> Vec<SlotChange> {
        let record = self.record();
        if !link.is_authority_for(record) {
            link.request_authority(record);
        }
        let before = self.state();
        self.state.write(link.local_peer(), next);
        link.propagate(record, self.state.clone().map(Payload::Slot));
        SlotChange::between(self.index, before, next)
    }
}
