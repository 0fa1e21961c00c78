//! Deterministic in-memory mesh.
//!
//! Every peer lives in one process. Sending enqueues one delivery per other
//! peer; [`Mesh::step`] hands exactly one of them over. With reordering on,
//! the next delivery is drawn from a seeded rng, so updates to different
//! records (and to the same record) arrive in any order while the run stays
//! reproducible.
//!
//! The session layer is simulated alongside: joins and departures reach
//! every peer at the same instant, the way a relay announces them.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_core::{Envelope, MemberId, Payload, Peer, RosterConfig};
use tracing::{debug, info, trace};

use crate::config::SimConfig;
use crate::error::{InvariantViolation, Result, SimError};
use crate::workload::Action;

/// Deliveries allowed per `settle` before the mesh is declared live-locked.
const SETTLE_BUDGET: usize = 1_000_000;

/// One envelope on its way to one peer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub to: MemberId,
    pub envelope: Envelope<Payload>,
}

/// A group of peers joined by a lossless, unordered broadcast.
pub struct Mesh {
    config: RosterConfig,
    peers: BTreeMap<MemberId, Peer>,
    in_flight: VecDeque<Delivery>,
    rng: StdRng,
    reorder: bool,
    next_id: u32,
    delivered: usize,
}

impl Mesh {
    /// Create an empty mesh.
    pub fn new(config: RosterConfig, seed: u64, reorder: bool) -> Self {
        Self {
            config,
            peers: BTreeMap::new(),
            in_flight: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
            reorder,
            next_id: 1,
            delivered: 0,
        }
    }

    /// Create an empty mesh from a validated simulation config.
    pub fn from_config(config: &SimConfig) -> Result<Self> {
        let roster = config.roster();
        roster.validate()?;
        Ok(Self::new(roster, config.seed, config.reorder))
    }

    /// Look up a peer.
    pub fn peer(&self, id: MemberId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Look up a peer mutably. Anything it sends is picked up on the next
    /// mesh operation.
    pub fn peer_mut(&mut self, id: MemberId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// All peers in id order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Ids of every peer in the group.
    pub fn ids(&self) -> Vec<MemberId> {
        self.peers.keys().copied().collect()
    }

    /// Number of peers in the group.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if the group is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Deliveries still queued.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Deliveries handed over so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// The peers that currently believe they coordinate.
    pub fn coordinators(&self) -> Vec<MemberId> {
        self.peers
            .values()
            .filter(|p| p.role().is_coordinator())
            .map(Peer::id)
            .collect()
    }

    /// The coordinator, if exactly one peer claims the role.
    pub fn coordinator(&self) -> Option<MemberId> {
        match self.coordinators().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Add a peer with a fresh id.
    pub fn join(&mut self) -> MemberId {
        let id = self.allocate_id();
        self.join_as(id);
        id
    }

    /// Add a peer with a chosen id. Rejoining under a present id does nothing.
    pub fn join_as(&mut self, id: MemberId) {
        if self.peers.contains_key(&id) {
            return;
        }
        self.next_id = self.next_id.max(id.get().saturating_add(1));

        let mut newcomer = Peer::new(id, &self.config);

        // The snapshot of any present peer plus whatever is still on its way
        // to that peer covers every write made so far.
        if let Some(source) = self.peers.keys().next().copied() {
            if let Some(peer) = self.peers.get(&source) {
                for envelope in peer.snapshot() {
                    newcomer.receive(envelope);
                }
            }
            let pending: Vec<Delivery> = self
                .in_flight
                .iter()
                .filter(|d| d.to == source)
                .map(|d| Delivery {
                    to: id,
                    envelope: d.envelope.clone(),
                })
                .collect();
            self.in_flight.extend(pending);
        }
        self.peers.insert(id, newcomer);
        info!(peer = %id, group = self.peers.len(), "peer joined");

        if self.coordinators().is_empty() {
            self.promote();
        }
        for peer in self.peers.values_mut() {
            peer.member_arrived(id);
        }
        self.collect_all();
    }

    /// Remove a peer. Its last updates reach everyone before the departure
    /// is announced; updates addressed to it are dropped.
    pub fn leave(&mut self, id: MemberId) -> Result<()> {
        if !self.peers.contains_key(&id) {
            return Err(SimError::UnknownPeer(id));
        }
        self.collect(id);

        let queued = std::mem::take(&mut self.in_flight);
        let (last_words, rest): (Vec<_>, Vec<_>) =
            queued.into_iter().partition(|d| d.envelope.from == id);
        self.in_flight = rest.into_iter().filter(|d| d.to != id).collect();
        for delivery in last_words.into_iter().filter(|d| d.to != id) {
            self.deliver(delivery);
        }

        self.peers.remove(&id);
        info!(peer = %id, group = self.peers.len(), "peer left");

        for peer in self.peers.values_mut() {
            peer.member_departed(id);
        }
        if !self.peers.is_empty() && self.coordinators().is_empty() {
            self.promote();
        }
        self.collect_all();
        Ok(())
    }

    /// Flip a peer's activation.
    pub fn toggle(&mut self, id: MemberId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.toggle_active();
            self.collect(id);
        }
    }

    /// Set a peer's activation.
    pub fn set_active(&mut self, id: MemberId, active: bool) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.set_active(active);
            self.collect(id);
        }
    }

    /// Hand over one queued delivery. Returns false when nothing is queued.
    pub fn step(&mut self) -> bool {
        self.collect_all();
        let next = if self.reorder && self.in_flight.len() > 1 {
            let index = self.rng.gen_range(0..self.in_flight.len());
            self.in_flight.remove(index)
        } else {
            self.in_flight.pop_front()
        };
        match next {
            Some(delivery) => {
                self.deliver(delivery);
                true
            }
            None => false,
        }
    }

    /// Deliver until nothing is queued. Returns the number of deliveries.
    pub fn settle(&mut self) -> Result<usize> {
        let start = self.delivered;
        while self.step() {
            if self.delivered - start > SETTLE_BUDGET {
                return Err(SimError::NoQuiescence {
                    steps: SETTLE_BUDGET,
                });
            }
        }
        debug!(deliveries = self.delivered - start, "mesh settled");
        Ok(self.delivered - start)
    }

    /// Apply one workload action.
    pub fn apply(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Join => {
                self.join();
            }
            Action::Leave(id) => self.leave(id)?,
            Action::Toggle(id) => self.toggle(id),
            Action::Deliver(n) => {
                for _ in 0..n {
                    if !self.step() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Check if every peer sees the same slots and roster.
    pub fn converged(&self) -> bool {
        let mut views = self.peers.values().map(Peer::view);
        match views.next() {
            Some(first) => views.all(|v| v.same_state(&first)),
            None => true,
        }
    }

    /// Check the membership invariants. Meaningful once settled.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        for peer in self.peers.values() {
            if let Some(member) = peer.slots().duplicate_owner() {
                return Err(InvariantViolation::DuplicateOwner {
                    peer: peer.id(),
                    member,
                });
            }
            if !peer.roster().count_is_consistent() {
                return Err(InvariantViolation::CountMismatch { peer: peer.id() });
            }
            if !peer.roster().agrees_with(peer.slots()) {
                return Err(InvariantViolation::RosterMismatch { peer: peer.id() });
            }
        }

        let mut peers = self.peers.values();
        if let Some(first) = peers.next() {
            let reference = first.view();
            for other in peers {
                if !other.view().same_state(&reference) {
                    return Err(InvariantViolation::Diverged {
                        a: first.id(),
                        b: other.id(),
                    });
                }
            }
            let coordinators = self.coordinators().len();
            if coordinators != 1 {
                return Err(InvariantViolation::CoordinatorCount(coordinators));
            }
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> MemberId {
        loop {
            let candidate = MemberId::new(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if let Some(id) = candidate {
                if !self.peers.contains_key(&id) {
                    return id;
                }
            }
        }
    }

    /// The lowest id takes over, as a relay would pick a new master.
    fn promote(&mut self) {
        if let Some(peer) = self.peers.values_mut().next() {
            debug!(peer = %peer.id(), "promoting coordinator");
            peer.assume_coordinator();
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        let Delivery { to, envelope } = delivery;
        let Some(peer) = self.peers.get_mut(&to) else {
            trace!(peer = %to, "dropping delivery to absent peer");
            return;
        };
        peer.receive(envelope);
        self.delivered += 1;
        self.collect(to);
    }

    fn collect_all(&mut self) {
        for id in self.ids() {
            self.collect(id);
        }
    }

    /// Queue everything `id` has sent for every other peer.
    fn collect(&mut self, id: MemberId) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        for notification in peer.drain_notifications() {
            trace!(peer = %id, ?notification, "notification");
        }
        let outgoing = peer.drain_outbox();
        if outgoing.is_empty() {
            return;
        }
        let recipients: Vec<MemberId> = self.peers.keys().copied().filter(|to| *to != id).collect();
        for envelope in outgoing {
            for to in &recipients {
                self.in_flight.push_back(Delivery {
                    to: *to,
                    envelope: envelope.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Role, SlotIndex, SlotState};

    fn member(raw: u32) -> MemberId {
        MemberId::new(raw).unwrap()
    }

    #[test]
    fn first_peer_coordinates_and_takes_slot_zero() {
        let mut mesh = Mesh::new(RosterConfig::with_capacity(4), 1, false);
        let first = mesh.join();
        mesh.settle().unwrap();

        let peer = mesh.peer(first).unwrap();
        assert_eq!(peer.role(), Role::Coordinator);
        assert_eq!(peer.my_slot(), Some(SlotIndex(0)));
        assert_eq!(mesh.coordinator(), Some(first));
    }

    #[test]
    fn leaving_unknown_peer_fails() {
        let mut mesh = Mesh::new(RosterConfig::default(), 1, false);
        mesh.join();
        assert!(matches!(mesh.leave(member(99)), Err(SimError::UnknownPeer(_))));
    }

    #[test]
    fn late_joiner_sees_updates_still_in_flight() {
        let mut mesh = Mesh::new(RosterConfig::with_capacity(4), 3, true);
        let a = mesh.join();
        let b = mesh.join();
        mesh.settle().unwrap();

        mesh.toggle(b);
        assert!(mesh.in_flight() > 0);
        let c = mesh.join();
        mesh.settle().unwrap();

        let view = mesh.peer(c).unwrap();
        assert!(view.roster().contains(b));
        assert!(!view.roster().contains(a));
        mesh.check_invariants().unwrap();
    }

    #[test]
    fn departing_coordinator_hands_over_to_lowest_id() {
        let mut mesh = Mesh::new(RosterConfig::with_capacity(4), 11, true);
        let a = mesh.join();
        let b = mesh.join();
        let c = mesh.join();
        mesh.settle().unwrap();
        mesh.toggle(b);
        mesh.toggle(c);
        mesh.settle().unwrap();

        mesh.leave(a).unwrap();
        mesh.settle().unwrap();

        assert_eq!(mesh.coordinator(), Some(b));
        let peer = mesh.peer(c).unwrap();
        assert_eq!(peer.slot(SlotIndex(0)).unwrap().state(), SlotState::Empty);
        assert_eq!(peer.roster().member_count(), 2);
        mesh.check_invariants().unwrap();
    }

    #[test]
    fn last_words_arrive_before_departure() {
        let mut mesh = Mesh::new(RosterConfig::with_capacity(4), 5, true);
        mesh.join();
        let b = mesh.join();
        mesh.settle().unwrap();

        // Activation still queued when b leaves
        mesh.toggle(b);
        mesh.leave(b).unwrap();
        mesh.settle().unwrap();

        for peer in mesh.peers() {
            assert_eq!(peer.slots().find_owner(b), None);
            assert!(!peer.roster().contains(b));
        }
        mesh.check_invariants().unwrap();
    }

    #[test]
    fn group_can_empty_and_restart() {
        let mut mesh = Mesh::new(RosterConfig::with_capacity(2), 8, true);
        let a = mesh.join();
        mesh.settle().unwrap();
        mesh.leave(a).unwrap();
        assert!(mesh.is_empty());

        let b = mesh.join();
        mesh.toggle(b);
        mesh.settle().unwrap();
        assert_eq!(mesh.coordinator(), Some(b));
        assert_eq!(mesh.peer(b).unwrap().my_roster_index(), Some(0));
    }
}
