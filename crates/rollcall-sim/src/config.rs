//! Simulation configuration.

use rollcall_core::{Error, RosterConfig};
use serde::{Deserialize, Serialize};

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Most peers online at once
    pub peers: usize,
    /// Slot and roster capacity
    pub capacity: usize,
    /// Seed for delivery order and workload
    pub seed: u64,
    /// Shuffle delivery order across records
    pub reorder: bool,
    /// Workload actions to run
    pub steps: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 20,
            capacity: rollcall_core::DEFAULT_CAPACITY,
            seed: 42,
            reorder: true,
            steps: 500,
        }
    }
}

impl SimConfig {
    /// Read `ROLLCALL_PEERS`, `ROLLCALL_CAPACITY`, `ROLLCALL_SEED`,
    /// `ROLLCALL_REORDER` and `ROLLCALL_STEPS`, defaulting whatever is unset.
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();
        let config = Self {
            peers: env_or("ROLLCALL_PEERS", defaults.peers)?,
            capacity: env_or("ROLLCALL_CAPACITY", defaults.capacity)?,
            seed: env_or("ROLLCALL_SEED", defaults.seed)?,
            reorder: env_or("ROLLCALL_REORDER", defaults.reorder)?,
            steps: env_or("ROLLCALL_STEPS", defaults.steps)?,
        };
        config.roster().validate()?;
        Ok(config)
    }

    /// The roster configuration every simulated peer shares.
    pub fn roster(&self) -> RosterConfig {
        RosterConfig::with_capacity(self.capacity)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Error> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{key} could not be parsed: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
