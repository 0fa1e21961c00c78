//! Seeded random workloads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_core::MemberId;
use serde::{Deserialize, Serialize};

use crate::mesh::Mesh;

/// One thing that can happen to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "peer")]
pub enum Action {
    /// A new peer arrives.
    Join,
    /// A peer leaves.
    Leave(MemberId),
    /// A peer flips its activation.
    Toggle(MemberId),
    /// Up to this many queued deliveries are handed over.
    Deliver(usize),
}

/// Draws actions against the current shape of a mesh.
#[derive(Debug)]
pub struct Workload {
    rng: StdRng,
    max_peers: usize,
}

impl Workload {
    /// Create a workload that never grows the group past `max_peers`.
    pub fn new(seed: u64, max_peers: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_peers: max_peers.max(1),
        }
    }

    /// Pick the next action.
    pub fn next_action(&mut self, mesh: &Mesh) -> Action {
        let ids = mesh.ids();
        if ids.is_empty() {
            return Action::Join;
        }
        let roll: u32 = self.rng.gen_range(0..100);
        let pick = ids[self.rng.gen_range(0..ids.len())];
        match roll {
            0..=19 if ids.len() < self.max_peers => Action::Join,
            20..=29 => Action::Leave(pick),
            30..=69 => Action::Toggle(pick),
            _ => Action::Deliver(self.rng.gen_range(1..=8)),
        }
    }
}
