//! The seam between replicated records and the transport underneath them.

use tracing::trace;

use crate::{AuthorityTable, Claim, Envelope, MemberId, Message, RecordId, Versioned};

/// What a peer needs from the replication layer.
///
/// Delivery is eventual and fire-and-forget. Nothing here blocks or reports
/// failure; a lost authority race shows up later as a merged-over value.
pub trait Replicator<P> {
    /// Identity of the local peer.
    fn local_peer(&self) -> MemberId;

    /// Check if the local peer currently believes it may write `record`.
    fn is_authority_for(&self, record: RecordId) -> bool;

    /// Ask for write authority over `record`. Best-effort: the caller
    /// proceeds as if the request succeeded.
    fn request_authority(&mut self, record: RecordId);

    /// Send the current value of `record` to every other peer.
    fn propagate(&mut self, record: RecordId, value: Versioned<P>);
}

/// In-process [`Replicator`]: authority beliefs plus an outbox the transport drains.
#[derive(Debug)]
pub struct ReplicaLink<P> {
    local: MemberId,
    authority: AuthorityTable,
    outbox: Vec<Envelope<P>>,
}

impl<P> ReplicaLink<P> {
    /// Create a link for the local peer.
    pub fn new(local: MemberId) -> Self {
        Self {
            local,
            authority: AuthorityTable::new(),
            outbox: Vec::new(),
        }
    }

    /// Authority beliefs of this peer.
    pub fn authority(&self) -> &AuthorityTable {
        &self.authority
    }

    /// Merge a claim received from another peer.
    /// Returns true if the holder belief changed.
    pub fn accept_claim(&mut self, record: RecordId, claim: Claim) -> bool {
        self.authority.merge(record, claim)
    }

    /// Take every queued envelope, oldest first.
    pub fn drain(&mut self) -> Vec<Envelope<P>> {
        std::mem::take(&mut self.outbox)
    }

    /// Number of envelopes waiting to be sent.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    fn send(&mut self, message: Message<P>) {
        self.outbox.push(Envelope {
            from: self.local,
            message,
        });
    }
}

impl<P> Replicator<P> for ReplicaLink<P> {
    fn local_peer(&self) -> MemberId {
        self.local
    }

    fn is_authority_for(&self, record: RecordId) -> bool {
        self.authority.is_held_by(record, self.local)
    }

    fn request_authority(&mut self, record: RecordId) {
        let claim = self.authority.claim(record, self.local);
        trace!(peer = %self.local, %record, epoch = claim.epoch, "requesting authority");
        self.send(Message::Authority { record, claim });
    }

    fn propagate(&mut self, record: RecordId, value: Versioned<P>) {
        trace!(peer = %self.local, %record, counter = value.version.counter, "propagating");
        self.send(Message::State { record, value });
    }
}
