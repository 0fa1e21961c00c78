//! Rollcall Core
//!
//! A fixed pool of seats shared by a group of peers, and the compact table of
//! members who have opted in.
//!
//! # Slots
//!
//! Each [`Slot`] is a replicated record, either empty or owned by one member
//! who may flag itself active. Only the peer holding write authority for a
//! slot mutates it: every write first acquires authority, then changes the
//! value, then propagates the whole record as one versioned update.
//!
//! # The Roster
//!
//! The [`Roster`] is a materialized view: the ids of every active slot owner,
//! first-fit into a fixed number of positions. It is never patched. The
//! coordinator recomputes it from the slot pool with [`reconcile`] whenever a
//! slot's activation changes, so any drift between the slots and the table
//! heals on the next pass.
//!
//! # Roles
//!
//! Exactly one peer, the one holding authority over the roster record, acts as
//! [`Role::Coordinator`]: it assigns and releases slots for arriving and
//! departing members and owns reconciliation. Every other peer is a
//! [`Role::Member`] that only toggles its own slot and mirrors the rest.
//!
//! # Failure Model
//!
//! Operations never fail. A caller without authority, a full pool, a stale
//! update: each becomes a no-op, and the next reconcile converges the view.

mod aggregator;
mod config;
mod error;
mod payload;
mod peer;
mod pool;
mod roster;
mod slot;
mod view;

pub use aggregator::{Aggregator, ReconcileOutcome, Role};
pub use config::RosterConfig;
pub use error::{Error, Result};
pub use payload::Payload;
pub use peer::{Notification, Peer};
pub use pool::SlotPool;
pub use roster::{reconcile, Roster};
pub use slot::{Slot, SlotChange, SlotState};
pub use view::{PeerView, SlotRow};

pub use rollcall_replica::{Envelope, MemberId, Message, RecordId, SlotIndex};

/// Slot and roster capacity used when nothing else is configured.
pub const DEFAULT_CAPACITY: usize = 16;
