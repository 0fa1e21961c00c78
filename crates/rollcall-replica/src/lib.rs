//! Rollcall Replication Primitives
//!
//! The vocabulary every rollcall peer speaks when it shares state with the
//! others. Nothing here knows what a slot or a roster is; records carry an
//! opaque payload `P` chosen by the layer above.
//!
//! # Model
//!
//! - Every replicated record is identified by a [`RecordId`].
//! - Its value travels as a [`Versioned`] pair. Merging keeps the greater
//!   [`Version`], so concurrent writes settle on the same winner everywhere
//!   (last-writer-wins per record, no ordering across records).
//! - Only one peer may write a record at a time. That right is an
//!   [`AuthorityTable`] claim, requested optimistically and never awaited.
//! - Mutations leave a peer as [`Envelope`]s through a [`Replicator`].
//!
//! # Example
//!
//! ```
//! use rollcall_replica::{MemberId, RecordId, ReplicaLink, Replicator, Versioned};
//!
//! let me = MemberId::new(7).unwrap();
//! let mut link: ReplicaLink<u32> = ReplicaLink::new(me);
//!
//! let mut value = Versioned::new(0u32);
//! if !link.is_authority_for(RecordId::Roster) {
//!     link.request_authority(RecordId::Roster);
//! }
//! value.write(me, 42);
//! link.propagate(RecordId::Roster, value.clone());
//!
//! assert_eq!(link.drain().len(), 2); // claim + state
//! ```

mod authority;
mod id;
mod link;
mod message;
mod version;

pub use authority::{AuthorityTable, Claim};
pub use id::{MemberId, RecordId, SlotIndex};
pub use link::{ReplicaLink, Replicator};
pub use message::{Envelope, Message, WireError};
pub use version::{Version, Versioned};
