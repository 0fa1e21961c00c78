//! Identities used across the replication layer.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Identifier of a member, and of the peer that member runs.
///
/// Zero is not a valid identity. Absence of a member is spelled `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(NonZeroU32);

impl MemberId {
    /// Create from a raw id. Returns `None` for `0`.
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Get the raw id.
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl From<NonZeroU32> for MemberId {
    fn from(id: NonZeroU32) -> Self {
        Self(id)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle into the fixed slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    /// Get the raw index.
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot[{}]", self.0)
    }
}

/// A replicated record. Authority and versions are tracked per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index")]
pub enum RecordId {
    /// One seat in the slot arena
    Slot(SlotIndex),
    /// The aggregate member table
    Roster,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Slot(index) => write!(f, "{}", index),
            RecordId::Roster => write!(f, "roster"),
        }
    }
}
