//! Error types for rollcall-sim.

use std::time::Duration;

use rollcall_core::MemberId;
use thiserror::Error;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors raised by the harness, never by the protocol.
#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] rollcall_core::Error),

    /// Messages kept flowing past the step budget.
    #[error("no quiescence after {steps} deliveries")]
    NoQuiescence { steps: usize },

    /// A settled state broke a membership invariant.
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The addressed peer is not part of the group.
    #[error("unknown peer {0}")]
    UnknownPeer(MemberId),

    /// A peer task stopped answering.
    #[error("peer {0} task is gone")]
    PeerGone(MemberId),

    /// The router task stopped.
    #[error("router is gone")]
    RouterGone,

    /// Every peer id has been handed out.
    #[error("peer ids exhausted")]
    IdsExhausted,

    /// The cluster did not settle in time.
    #[error("cluster did not settle within {0:?}")]
    Timeout(Duration),
}

/// A membership invariant that did not hold once all updates had landed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Two slots held by the same member.
    #[error("peer {peer} sees {member} in more than one slot")]
    DuplicateOwner { peer: MemberId, member: MemberId },

    /// The roster lists someone inactive, misses someone active, or repeats.
    #[error("peer {peer} has a roster that disagrees with its slots")]
    RosterMismatch { peer: MemberId },

    /// `member_count` does not match the occupied positions.
    #[error("peer {peer} has an inconsistent member count")]
    CountMismatch { peer: MemberId },

    /// Two peers settled on different states.
    #[error("peers {a} and {b} disagree")]
    Diverged { a: MemberId, b: MemberId },

    /// Not exactly one coordinator.
    #[error("{0} coordinators")]
    CoordinatorCount(usize),
}
