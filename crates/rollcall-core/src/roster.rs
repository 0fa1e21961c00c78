//! The aggregate member table and its reconciliation.

use std::collections::BTreeSet;

use rollcall_replica::MemberId;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::SlotPool;

/// Compact table of members who have opted in.
///
/// Positions carry no meaning; `None` marks a free one. The table is derived
/// from the slot pool by [`reconcile`] and is never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    members: Vec<Option<MemberId>>,
    member_count: usize,
}

impl Roster {
    /// Create an empty table with `capacity` positions.
    pub fn new(capacity: usize) -> Self {
        Self {
            members: vec![None; capacity],
            member_count: 0,
        }
    }

    /// Number of positions.
    pub fn capacity(&self) -> usize {
        self.members.len()
    }

    /// Every position, free ones included.
    pub fn members(&self) -> &[Option<MemberId>] {
        &self.members
    }

    /// Number of occupied positions.
    pub fn member_count(&self) -> usize {
        self.member_count
    }

    /// Occupied positions in table order.
    pub fn iter_members(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.iter().flatten().copied()
    }

    /// Position holding `id`.
    pub fn position_of(&self, id: MemberId) -> Option<usize> {
        self.members.iter().position(|m| *m == Some(id))
    }

    /// Check if `id` is on the table.
    pub fn contains(&self, id: MemberId) -> bool {
        self.position_of(id).is_some()
    }

    /// Check that `member_count` matches the occupied positions.
    pub fn count_is_consistent(&self) -> bool {
        self.member_count == self.members.iter().flatten().count()
    }

    /// Check that the table holds exactly the active owners of `pool`,
    /// each once.
    pub fn agrees_with(&self, pool: &SlotPool) -> bool {
        let expected: BTreeSet<MemberId> = pool.active_members().collect();
        let listed: Vec<MemberId> = self.iter_members().collect();
        let unique: BTreeSet<MemberId> = listed.iter().copied().collect();
        unique.len() == listed.len() && unique == expected
    }
}

/// Recompute the roster from the slot pool.
///
/// 1. Keep each previous entry only if its member still owns an active slot
///    and has not already appeared earlier in the table.
/// 2. Walk the slots in index order; every active owner not yet listed takes
///    the first free position. Owners beyond capacity are left out.
/// 3. Recount.
///
/// Members who stay active keep their positions across passes, and running
/// it again on its own output returns the same table.
pub fn reconcile(previous: &Roster, pool: &SlotPool) -> Roster {
    let mut members = previous.members.clone();
    let mut kept = BTreeSet::new();

    for entry in members.iter_mut() {
        let Some(id) = *entry else { continue };
        let active = pool.state_of(id).is_some_and(|s| s.is_active());
        if !active {
            trace!(member = %id, "dropping inactive member from roster");
            *entry = None;
        } else if !kept.insert(id) {
            trace!(member = %id, "dropping duplicate roster entry");
            *entry = None;
        }
    }

    for id in pool.active_members() {
        if kept.contains(&id) {
            continue;
        }
        match members.iter_mut().find(|m| m.is_none()) {
            Some(free) => {
                *free = Some(id);
                kept.insert(id);
            }
            None => debug!(member = %id, "roster full, member left out"),
        }
    }

    let member_count = members.iter().flatten().count();
    Roster {
        members,
        member_count,
    }
}
