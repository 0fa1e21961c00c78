//! Versioned values with last-writer-wins merge.

use serde::{Deserialize, Serialize};

use crate::MemberId;

/// Position of a write in a record's history.
///
/// Ordered by `counter`, then by `writer`. Two peers that write the same
/// record concurrently both produce `counter + 1`; the higher writer id wins
/// on every peer, so the race settles identically everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version {
    /// Monotonic write counter for the record.
    pub counter: u64,
    /// Peer that produced the write. `None` only for the initial version.
    pub writer: Option<MemberId>,
}

impl Version {
    /// The version of a record nobody has written yet.
    pub const ZERO: Version = Version { counter: 0, writer: None };

    /// The version that follows this one when `writer` writes next.
    pub const fn next(self, writer: MemberId) -> Self {
        Self {
            counter: self.counter + 1,
            writer: Some(writer),
        }
    }
}

/// A value together with the version of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The value.
    pub value: T,
    /// Version of the write that produced `value`.
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Wrap an initial value at [`Version::ZERO`].
    pub fn new(value: T) -> Self {
        Self {
            value,
            version: Version::ZERO,
        }
    }

    /// Borrow the value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replace the value as a local write by `writer`.
    /// Returns the new version.
    pub fn write(&mut self, writer: MemberId, value: T) -> Version {
        self.version = self.version.next(writer);
        self.value = value;
        self.version
    }

    /// Transform the value, keeping the version.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }

    /// Check if this value was written after `other`.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.version > other.version
    }

    /// Merge an incoming copy, keeping whichever was written last.
    /// Returns true if self was replaced.
    pub fn merge(&mut self, incoming: Self) -> bool {
        if incoming.is_newer_than(self) {
            *self = incoming;
            true
        } else {
            false
        }
    }
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn member(raw: u32) -> MemberId {
        MemberId::new(raw).unwrap()
    }

    #[test]
    fn write_bumps_counter_and_stamps_writer() {
        let mut v = Versioned::new("empty");
        let version = v.write(member(3), "taken");

        assert_eq!(version, Version { counter: 1, writer: Some(member(3)) });
        assert_eq!(*v.get(), "taken");
    }

    #[test]
    fn merge_keeps_newer() {
        let mut local = Versioned::new(0);
        local.write(member(1), 10);

        let mut remote = local.clone();
        remote.write(member(2), 20);

        assert!(local.merge(remote.clone()));
        assert_eq!(local.value, 20);

        // Replaying the same or an older copy changes nothing
        assert!(!local.merge(remote));
        assert!(!local.merge(Versioned::new(0)));
        assert_eq!(local.value, 20);
    }

    #[test]
    fn concurrent_writes_resolve_by_writer() {
        let base = Versioned::new(0);

        let mut from_low = base.clone();
        from_low.write(member(4), 4);
        let mut from_high = base;
        from_high.write(member(9), 9);

        // Both peers apply the other's write; both settle on writer #9
        let mut a = from_low.clone();
        a.merge(from_high.clone());
        let mut b = from_high;
        b.merge(from_low);

        assert_eq!(a, b);
        assert_eq!(a.value, 9);
    }

    proptest! {
        #[test]
        fn merge_order_does_not_matter(
            writes in proptest::collection::vec((1u64..6, 1u32..5, any::<u8>()), 1..12),
        ) {
            let copies: Vec<Versioned<u8>> = writes
                .iter()
                .map(|&(counter, writer, value)| Versioned {
                    value,
                    version: Version { counter, writer: Some(member(writer)) },
                })
                .collect();

            let mut forward = Versioned::new(0u8);
            for c in copies.iter().cloned() {
                forward.merge(c);
            }
            let mut backward = Versioned::new(0u8);
            for c in copies.iter().rev().cloned() {
                backward.merge(c);
            }

            prop_assert_eq!(forward.version, backward.version);
        }
    }
}
