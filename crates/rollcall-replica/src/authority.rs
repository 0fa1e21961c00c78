//! Per-record write authority.
//!
//! Exactly one peer is entitled to mutate a record at a time. Authority moves
//! by claim: the requesting peer issues a claim one epoch above the highest it
//! has seen and starts writing immediately. Claims merge like versions, so two
//! peers claiming at once both end up agreeing on the higher `(epoch, holder)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{MemberId, RecordId};

/// A peer's claim to write a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Claim epoch, strictly increasing per record.
    pub epoch: u64,
    /// The claiming peer.
    pub holder: MemberId,
}

/// This peer's belief about who holds authority for each record.
#[derive(Debug, Clone, Default)]
pub struct AuthorityTable {
    claims: BTreeMap<RecordId, Claim>,
}

impl AuthorityTable {
    /// Create an empty table. Nobody holds anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current claim for a record.
    pub fn claim_for(&self, record: RecordId) -> Option<Claim> {
        self.claims.get(&record).copied()
    }

    /// Current holder of a record.
    pub fn holder(&self, record: RecordId) -> Option<MemberId> {
        self.claim_for(record).map(|c| c.holder)
    }

    /// Check if `peer` currently holds `record`.
    pub fn is_held_by(&self, record: RecordId, peer: MemberId) -> bool {
        self.holder(record) == Some(peer)
    }

    /// Issue a new claim for `peer`, superseding every claim seen so far.
    pub fn claim(&mut self, record: RecordId, peer: MemberId) -> Claim {
        let epoch = self.claim_for(record).map_or(1, |c| c.epoch + 1);
        let claim = Claim { epoch, holder: peer };
        self.claims.insert(record, claim);
        claim
    }

    /// Merge a claim learned from another peer.
    /// Returns true if it replaced the current one.
    pub fn merge(&mut self, record: RecordId, claim: Claim) -> bool {
        match self.claims.get_mut(&record) {
            Some(existing) if *existing >= claim => false,
            Some(existing) => {
                *existing = claim;
                true
            }
            None => {
                self.claims.insert(record, claim);
                true
            }
        }
    }

    /// Iterate over every known claim.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, Claim)> + '_ {
        self.claims.iter().map(|(r, c)| (*r, *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SlotIndex;

    fn member(raw: u32) -> MemberId {
        MemberId::new(raw).unwrap()
    }

    #[test]
    fn claim_supersedes_previous() {
        let mut table = AuthorityTable::new();
        let record = RecordId::Slot(SlotIndex(0));

        let first = table.claim(record, member(1));
        let second = table.claim(record, member(2));

        assert_eq!(first.epoch, 1);
        assert_eq!(second.epoch, 2);
        assert!(table.is_held_by(record, member(2)));
        assert!(!table.is_held_by(record, member(1)));
    }

    #[test]
    fn merge_ignores_stale_claims() {
        let mut table = AuthorityTable::new();
        let record = RecordId::Roster;

        table.claim(record, member(1));
        table.claim(record, member(1));

        assert!(!table.merge(record, Claim { epoch: 1, holder: member(5) }));
        assert!(table.is_held_by(record, member(1)));

        assert!(table.merge(record, Claim { epoch: 3, holder: member(5) }));
        assert!(table.is_held_by(record, member(5)));
    }

    #[test]
    fn simultaneous_claims_agree() {
        let record = RecordId::Slot(SlotIndex(3));
        let mut a = AuthorityTable::new();
        let mut b = AuthorityTable::new();

        let claim_a = a.claim(record, member(2));
        let claim_b = b.claim(record, member(8));
        a.merge(record, claim_b);
        b.merge(record, claim_a);

        assert_eq!(a.holder(record), b.holder(record));
        assert_eq!(a.holder(record), Some(member(8)));
    }
}
