//! Session configuration: holdout split, seed, search grid and manual k

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::selection::SearchConfig;

/// Validation fraction used when none is configured
pub const DEFAULT_TEST_SIZE: f64 = 0.2;

/// Seed used when none is configured
pub const DEFAULT_SEED: u64 = 42;

/// Settings shared by every step of a [`crate::session::CampaignSession`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fraction of each class held out for validation
    pub test_size: f64,
    /// Seed for the holdout split and fold assignment
    pub seed: u64,
    pub search: SearchConfig,
    /// Neighbor count to train with when no search is run
    pub neighbors: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            test_size: DEFAULT_TEST_SIZE,
            seed: DEFAULT_SEED,
            search: SearchConfig::default(),
            neighbors: None,
        }
    }
}

impl SessionConfig {
    /// Load a JSON config file; omitted fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(ForgeError::invalid(
                "test_size",
                format!("must be in (0, 1), got {}", self.test_size),
            ));
        }
        if self.neighbors == Some(0) {
            return Err(ForgeError::invalid("neighbors", "must be at least 1"));
        }
        self.search.validate()
    }
}
