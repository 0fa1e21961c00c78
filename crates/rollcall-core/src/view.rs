//! Read-only snapshots for rendering and debugging.

use std::fmt;

use rollcall_replica::{AuthorityTable, MemberId, SlotIndex};
use serde::{Deserialize, Serialize};

use crate::{Role, Roster, SlotPool};

/// One row of the slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRow {
    pub index: SlotIndex,
    pub owner: Option<MemberId>,
    pub active: bool,
    /// Peer believed to hold write authority over the slot.
    pub authority: Option<MemberId>,
}

/// Everything a peer can show about the shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    pub peer: MemberId,
    pub role: Role,
    pub members: Vec<Option<MemberId>>,
    pub member_count: usize,
    pub slots: Vec<SlotRow>,
}

impl PeerView {
    /// Capture the current state of a peer.
    pub fn capture(
        peer: MemberId,
        role: Role,
        pool: &SlotPool,
        roster: &Roster,
        authority: &AuthorityTable,
    ) -> Self {
        let slots = pool
            .iter()
            .map(|s| SlotRow {
                index: s.index(),
                owner: s.state().owner(),
                active: s.state().is_active(),
                authority: authority.holder(s.record()),
            })
            .collect();
        Self {
            peer,
            role,
            members: roster.members().to_vec(),
            member_count: roster.member_count(),
            slots,
        }
    }

    /// Check if two peers see the same shared state, ignoring who is looking.
    pub fn same_state(&self, other: &PeerView) -> bool {
        self.members == other.members
            && self.member_count == other.member_count
            && self.slots == other.slots
    }
}

fn id_or_dash(id: Option<MemberId>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

impl fmt::Display for PeerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "peer {} ({})", self.peer, self.role)?;

        write!(f, "joined ({}):", self.member_count)?;
        for id in self.members.iter().flatten() {
            write!(f, " {}", id)?;
        }
        writeln!(f)?;

        write!(f, "table:")?;
        for entry in &self.members {
            write!(f, " {}", id_or_dash(*entry))?;
        }
        writeln!(f)?;

        writeln!(f, "{:<6}{:<8}{:<8}{}", "slot", "owner", "active", "authority")?;
        for row in &self.slots {
            writeln!(
                f,
                "{:<6}{:<8}{:<8}{}",
                row.index.get(),
                id_or_dash(row.owner),
                if row.active { "yes" } else { "no" },
                id_or_dash(row.authority),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Peer, RosterConfig};

    #[test]
    fn renders_members_and_slots() {
        let me = MemberId::new(3).unwrap();
        let mut peer = Peer::new(me, &RosterConfig::with_capacity(2));
        peer.assume_coordinator();
        peer.member_arrived(me);
        peer.set_active(true);

        let text = peer.view().to_string();
        assert!(text.starts_with("peer #3 (coordinator)"));
        assert!(text.contains("joined (1): #3"));
        assert!(text.contains("table: #3 -"));
        assert!(text.contains("0     #3      yes     #3"));
        assert!(text.contains("1     -       no      -"));
    }

    #[test]
    fn same_state_ignores_viewer() {
        let config = RosterConfig::with_capacity(2);
        let a = Peer::new(MemberId::new(1).unwrap(), &config).view();
        let b = Peer::new(MemberId::new(2).unwrap(), &config).view();
        assert!(a.same_state(&b));
        assert_ne!(a, b);
    }
}
