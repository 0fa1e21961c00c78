//! One participant's replica of the shared pool.
//!
//! A [`Peer`] is driven from three directions, one event at a time:
//!
//! - the session layer announces arrivals and departures,
//! - the local user toggles their own slot,
//! - the transport delivers envelopes from other peers.
//!
//! Every mutation leaves through the outbox; every observed change lands in
//! the notification queue for whatever renders or logs the peer.

use std::collections::BTreeSet;

use rollcall_replica::{
    Envelope, MemberId, Message, RecordId, ReplicaLink, Replicator, SlotIndex, Version,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::aggregator::{Aggregator, ReconcileOutcome, Role};
use crate::error::Result;
use crate::payload::{self, Payload};
use crate::{PeerView, Roster, RosterConfig, Slot, SlotChange, SlotPool};

/// A change observed by this peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// A slot field changed, locally or by merge.
    Slot { change: SlotChange },
    /// This peer, as coordinator, ran a reconcile pass.
    Reconciled { roster: Roster, changed: bool },
    /// A newer roster arrived from another peer.
    RosterReplaced { roster: Roster },
    /// This peer became, or stopped being, the coordinator.
    RoleChanged { role: Role },
}

/// A single peer: its replica link, its view of the pool and roster, and
/// the notifications it has not yet handed out.
#[derive(Debug)]
pub struct Peer {
    link: ReplicaLink<Payload>,
    aggregator: Aggregator,
    /// Departed members whose slot this peer still sees occupied.
    departed: BTreeSet<MemberId>,
    notifications: Vec<Notification>,
}

impl Peer {
    /// Create a peer with an empty pool. It starts as a member.
    pub fn new(id: MemberId, config: &RosterConfig) -> Self {
        Self {
            link: ReplicaLink::new(id),
            aggregator: Aggregator::new(config.capacity),
            departed: BTreeSet::new(),
            notifications: Vec::new(),
        }
    }

    /// This peer's identity.
    pub fn id(&self) -> MemberId {
        self.link.local_peer()
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.aggregator.role()
    }

    /// The roster as this peer sees it.
    pub fn roster(&self) -> &Roster {
        self.aggregator.roster()
    }

    /// The slot pool as this peer sees it.
    pub fn slots(&self) -> &SlotPool {
        self.aggregator.pool()
    }

    /// One slot.
    pub fn slot(&self, index: SlotIndex) -> Option<&Slot> {
        self.aggregator.pool().get(index)
    }

    /// The slot owned by this peer's member.
    pub fn my_slot(&self) -> Option<SlotIndex> {
        self.aggregator.pool().find_owner(self.id())
    }

    /// Position of this peer's member on the roster.
    pub fn my_roster_index(&self) -> Option<usize> {
        self.roster().position_of(self.id())
    }

    /// Who this peer believes may write `record`.
    pub fn authority_holder(&self, record: RecordId) -> Option<MemberId> {
        self.link.authority().holder(record)
    }

    /// Read-only snapshot for rendering.
    pub fn view(&self) -> PeerView {
        PeerView::capture(self.id(), self.role(), self.aggregator.pool(), self.roster(), self.link.authority())
    }

    /// Take over the roster and become coordinator.
    pub fn assume_coordinator(&mut self) {
        if !self.link.is_authority_for(RecordId::Roster) {
            info!(peer = %self.id(), "assuming coordinator role");
            self.link.request_authority(RecordId::Roster);
        }
        self.refresh_role();
    }

    /// Session layer: a member entered the group.
    pub fn member_arrived(&mut self, id: MemberId) {
        self.departed.remove(&id);
        let changes = self.aggregator.on_member_joined(id, &mut self.link);
        self.dispatch(changes);
    }

    /// Session layer: a member left the group.
    pub fn member_departed(&mut self, id: MemberId) {
        self.departed.insert(id);
        let changes = self.aggregator.on_member_left(id, &mut self.link);
        self.dispatch(changes);
    }

    /// Opt this peer's member in or out of the roster.
    pub fn set_active(&mut self, active: bool) {
        let Some(index) = self.my_slot() else {
            trace!(peer = %self.id(), "set_active without a slot");
            return;
        };
        let changes = match self.aggregator.slot_mut(index) {
            Some(slot) => slot.set_active(active, &mut self.link),
            None => Vec::new(),
        };
        self.dispatch(changes);
    }

    /// Flip this peer's member's activation.
    pub fn toggle_active(&mut self) {
        let Some(index) = self.my_slot() else {
            trace!(peer = %self.id(), "toggle without a slot");
            return;
        };
        let changes = match self.aggregator.slot_mut(index) {
            Some(slot) => slot.toggle_active(&mut self.link),
            None => Vec::new(),
        };
        self.dispatch(changes);
    }

    /// Apply an envelope from another peer.
    pub fn receive(&mut self, envelope: Envelope<Payload>) {
        let Envelope { from, message } = envelope;
        if from == self.id() {
            return;
        }
        match message {
            Message::Authority { record, claim } => {
                if self.link.accept_claim(record, claim) {
                    trace!(peer = %self.id(), %record, holder = %claim.holder, epoch = claim.epoch, "authority moved");
                    if record == RecordId::Roster {
                        self.refresh_role();
                    }
                }
            }
            Message::State { record: RecordId::Slot(index), value } => match payload::into_slot(value) {
                Some(state) => {
                    let changes = self.aggregator.apply_remote_slot(index, state);
                    self.dispatch(changes);
                }
                None => warn!(peer = %self.id(), %from, slot = %index, "slot update carried a roster"),
            },
            Message::State { record: RecordId::Roster, value } => match payload::into_roster(value) {
                Some(roster) => {
                    if self.aggregator.apply_remote_roster(roster) {
                        debug!(peer = %self.id(), %from, members = self.roster().member_count(), "roster replaced");
                        self.notifications.push(Notification::RosterReplaced {
                            roster: self.roster().clone(),
                        });
                        if self.role().is_coordinator() {
                            self.reconcile();
                        }
                    }
                }
                None => warn!(peer = %self.id(), %from, "roster update carried a slot"),
            },
        }
    }

    /// Decode and apply a JSON envelope.
    pub fn receive_json(&mut self, raw: &str) -> Result<()> {
        let envelope = Envelope::from_json(raw)?;
        self.receive(envelope);
        Ok(())
    }

    /// Everything a late-joining peer needs: every known claim and every
    /// record that has been written.
    pub fn snapshot(&self) -> Vec<Envelope<Payload>> {
        let from = self.id();
        let mut out: Vec<_> = self
            .link
            .authority()
            .iter()
            .map(|(record, claim)| Envelope {
                from,
                message: Message::Authority { record, claim },
            })
            .collect();

        for slot in self.slots().iter() {
            if slot.versioned().version != Version::ZERO {
                out.push(Envelope {
                    from,
                    message: Message::State {
                        record: slot.record(),
                        value: slot.versioned().clone().map(Payload::Slot),
                    },
                });
            }
        }

        let roster = self.aggregator.roster_versioned();
        if roster.version != Version::ZERO {
            out.push(Envelope {
                from,
                message: Message::State {
                    record: RecordId::Roster,
                    value: roster.clone().map(Payload::Roster),
                },
            });
        }
        out
    }

    /// Take every envelope waiting to be sent.
    pub fn drain_outbox(&mut self) -> Vec<Envelope<Payload>> {
        self.link.drain()
    }

    /// Number of envelopes waiting to be sent.
    pub fn pending_outbox(&self) -> usize {
        self.link.pending()
    }

    /// Take every notification raised since the last call.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Recompute the roster now. Only the coordinator does any work.
    pub fn reconcile(&mut self) -> ReconcileOutcome {
        let outcome = self.aggregator.reconcile(&mut self.link);
        if outcome != ReconcileOutcome::Skipped {
            self.notifications.push(Notification::Reconciled {
                roster: self.roster().clone(),
                changed: outcome == ReconcileOutcome::Updated,
            });
        }
        outcome
    }

    fn refresh_role(&mut self) {
        let role = if self.link.is_authority_for(RecordId::Roster) {
            Role::Coordinator
        } else {
            Role::Member
        };
        if !self.aggregator.set_role(role) {
            return;
        }
        info!(peer = %self.id(), %role, "role changed");
        self.notifications.push(Notification::RoleChanged { role });
        if role.is_coordinator() {
            let changes = self.evict_departed();
            self.dispatch(changes);
            self.reconcile();
        }
    }

    /// Notify, hand assigned slots to their owner, and reconcile once at the end.
    fn dispatch(&mut self, changes: Vec<SlotChange>) {
        let mut pending = changes;
        let mut needs_reconcile = false;

        while !pending.is_empty() {
            let mut owners_moved = false;
            for change in std::mem::take(&mut pending) {
                if let SlotChange::OwnerChanged { slot, owner: Some(owner) } = change {
                    owners_moved = true;
                    let record = RecordId::Slot(slot);
                    if owner == self.id() && !self.link.is_authority_for(record) {
                        debug!(peer = %self.id(), %slot, "taking authority over assigned slot");
                        self.link.request_authority(record);
                    }
                }
                needs_reconcile |= self.aggregator.on_slot_changed(&change);
                self.notifications.push(Notification::Slot { change });
            }
            if owners_moved {
                pending = self.evict_departed();
            }
        }

        if needs_reconcile {
            self.reconcile();
        }
        self.prune_departed();
    }

    /// Forget departed members whose slot this peer has seen released.
    ///
    /// A leaver's own updates reach every peer before its departure does, so
    /// once its slot reads empty here nothing can hand it back.
    fn prune_departed(&mut self) {
        let pool = self.aggregator.pool();
        self.departed.retain(|id| pool.find_owner(*id).is_some());
    }

    /// Release slots that a merge handed back to members known to have left.
    fn evict_departed(&mut self) -> Vec<SlotChange> {
        if !self.role().is_coordinator() || self.departed.is_empty() {
            return Vec::new();
        }
        let stale: Vec<SlotIndex> = self
            .aggregator
            .pool()
            .iter()
            .filter(|s| s.state().owner().is_some_and(|o| self.departed.contains(&o)))
            .map(Slot::index)
            .collect();

        let me = self.id();
        let mut changes = Vec::new();
        for index in stale {
            if let Some(slot) = self.aggregator.slot_mut(index) {
                debug!(peer = %me, slot = %index, "releasing slot of departed member");
                changes.extend(slot.release(Role::Coordinator, &mut self.link));
            }
        }
        changes
    }
}
