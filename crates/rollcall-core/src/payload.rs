//! What a rollcall record carries on the wire.

use rollcall_replica::Versioned;
use serde::{Deserialize, Serialize};

use crate::{Roster, SlotState};

/// Value of a replicated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// State of one slot
    Slot(SlotState),
    /// The aggregate member table
    Roster(Roster),
}

pub(crate) fn into_slot(value: Versioned<Payload>) -> Option<Versioned<SlotState>> {
    match value.value {
        Payload::Slot(state) => Some(Versioned {
            value: state,
            version: value.version,
        }),
        Payload::Roster(_) => None,
    }
}

pub(crate) fn into_roster(value: Versioned<Payload>) -> Option<Versioned<Roster>> {
    match value.value {
        Payload::Roster(roster) => Some(Versioned {
            value: roster,
            version: value.version,
        }),
        Payload::Slot(_) => None,
    }
}
