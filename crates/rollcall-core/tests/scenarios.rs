//! End-to-end membership scenarios over an in-order, lossless broadcast.

use rollcall_core::{MemberId, Peer, Role, RosterConfig, SlotIndex, SlotState};

fn member(raw: u32) -> MemberId {
    MemberId::new(raw).unwrap()
}

/// Peers joined by a perfect broadcast: every envelope reaches every peer.
struct Group {
    peers: Vec<Peer>,
    config: RosterConfig,
}

impl Group {
    /// Peer 1 hosts and coordinates.
    fn hosted(capacity: usize) -> Self {
        let config = RosterConfig::with_capacity(capacity);
        let mut host = Peer::new(member(1), &config);
        host.assume_coordinator();
        let mut group = Self { peers: vec![host], config };
        group.settle();
        group
    }

    fn peer(&mut self, raw: u32) -> &mut Peer {
        self.peers.iter_mut().find(|p| p.id().get() == raw).unwrap()
    }

    fn host(&self) -> &Peer {
        &self.peers[0]
    }

    fn arrive(&mut self, raw: u32) {
        let mut newcomer = Peer::new(member(raw), &self.config);
        for envelope in self.peers[0].snapshot() {
            newcomer.receive(envelope);
        }
        self.peers.push(newcomer);
        for p in &mut self.peers {
            p.member_arrived(member(raw));
        }
        self.settle();
    }

    fn depart(&mut self, raw: u32) {
        self.peers.retain(|p| p.id().get() != raw);
        for p in &mut self.peers {
            p.member_departed(member(raw));
        }
        self.settle();
    }

    fn toggle(&mut self, raw: u32) {
        self.peer(raw).toggle_active();
        self.settle();
    }

    fn settle(&mut self) {
        loop {
            let batch: Vec<_> = self.peers.iter_mut().flat_map(|p| p.drain_outbox()).collect();
            if batch.is_empty() {
                break;
            }
            for envelope in batch {
                for p in &mut self.peers {
                    p.receive(envelope.clone());
                }
            }
        }
    }

    fn assert_converged(&self) {
        let reference = self.host().view();
        for p in &self.peers {
            assert!(p.view().same_state(&reference), "peer {} diverged:\n{}\nvs\n{}", p.id(), p.view(), reference);
        }
        assert!(self.host().roster().agrees_with(self.host().slots()));
        assert!(self.host().roster().count_is_consistent());
        assert_eq!(self.host().slots().duplicate_owner(), None);
    }
}

#[test]
fn first_arrival_takes_slot_zero_and_activates() {
    let mut group = Group::hosted(16);

    group.arrive(5);
    assert_eq!(
        group.host().slot(SlotIndex(0)).unwrap().state(),
        SlotState::Occupied { owner: member(5), active: false }
    );

    group.toggle(5);
    let roster = group.host().roster();
    assert_eq!(roster.members()[0], Some(member(5)));
    assert!(roster.members()[1..].iter().all(Option::is_none));
    assert_eq!(roster.member_count(), 1);
    group.assert_converged();
}

#[test]
fn deactivation_clears_roster_but_keeps_slot() {
    let mut group = Group::hosted(16);
    group.arrive(5);
    group.toggle(5);

    group.toggle(5);

    assert!(group.host().roster().members().iter().all(Option::is_none));
    assert_eq!(group.host().roster().member_count(), 0);
    assert_eq!(
        group.host().slot(SlotIndex(0)).unwrap().state(),
        SlotState::Occupied { owner: member(5), active: false }
    );
    group.assert_converged();
}

#[test]
fn departure_frees_slot_for_next_arrival() {
    let mut group = Group::hosted(16);
    group.arrive(5);
    group.toggle(5);

    group.depart(5);
    assert_eq!(group.host().slot(SlotIndex(0)).unwrap().state(), SlotState::Empty);
    assert_eq!(group.host().roster().member_count(), 0);

    group.arrive(7);
    assert_eq!(group.host().slots().find_owner(member(7)), Some(SlotIndex(0)));
    group.assert_converged();
}

#[test]
fn simultaneous_arrivals_for_last_slot() {
    let mut group = Group::hosted(2);
    group.arrive(5);

    // Both announced before any update moves
    for raw in [6, 7] {
        let mut newcomer = Peer::new(member(raw), &group.config);
        for envelope in group.host().snapshot() {
            newcomer.receive(envelope);
        }
        group.peers.push(newcomer);
    }
    for p in &mut group.peers {
        p.member_arrived(member(6));
        p.member_arrived(member(7));
    }
    group.settle();

    let slots = group.host().slots();
    assert_eq!(slots.find_owner(member(6)), Some(SlotIndex(1)));
    assert_eq!(slots.find_owner(member(7)), None);
    assert_eq!(slots.occupied(), 2);
    group.assert_converged();
}

#[test]
fn overflow_member_is_absent_without_error() {
    let capacity = 4;
    let mut group = Group::hosted(capacity);
    for raw in 10..10 + capacity as u32 + 1 {
        group.arrive(raw);
        group.toggle(raw);
    }

    let roster = group.host().roster();
    assert_eq!(roster.member_count(), capacity);
    for raw in 10..10 + capacity as u32 {
        assert!(roster.contains(member(raw)));
    }
    assert!(!roster.contains(member(10 + capacity as u32)));
    group.assert_converged();
}

#[test]
fn coordinator_handoff_keeps_roster_consistent() {
    let mut group = Group::hosted(4);
    group.arrive(5);
    group.arrive(6);
    group.toggle(5);
    group.toggle(6);

    // Host departs; the lowest remaining peer takes over
    group.peers.remove(0);
    group.peer(5).assume_coordinator();
    for p in &mut group.peers {
        p.member_departed(member(1));
    }
    group.settle();

    assert_eq!(group.peer(5).role(), Role::Coordinator);
    assert_eq!(group.peer(6).role(), Role::Member);
    let roster = group.peer(6).roster().clone();
    assert_eq!(roster.member_count(), 2);
    assert!(roster.contains(member(5)) && roster.contains(member(6)));
}
