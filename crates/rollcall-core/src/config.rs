//! Roster configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::DEFAULT_CAPACITY;

/// Configuration shared by every peer of one group.
///
/// All peers must agree on `capacity`; it sizes both the slot pool and the
/// roster table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Number of slots, and of roster positions.
    pub capacity: usize,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RosterConfig {
    /// Create a config with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Read `ROLLCALL_CAPACITY`, falling back to the default.
    pub fn from_env() -> Result<Self> {
        let config = match std::env::var("ROLLCALL_CAPACITY") {
            Ok(raw) => Self {
                capacity: raw.trim().parse().map_err(|_| {
                    Error::InvalidConfig(format!("ROLLCALL_CAPACITY is not a number: {raw:?}"))
                })?,
            },
            Err(_) => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no group could run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be at least 1".into()));
        }
        Ok(())
    }
}
