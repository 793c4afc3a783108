//! Avalanche subsystem configuration.
//!
//! Field names map one-to-one onto the node's command line options:
//!
//! | Field | Option |
//! |-------|--------|
//! | `conflicting_proof_cooldown` | `-avalancheconflictingproofcooldown` |
//! | `enable_proof_replacement` | `-enableavalancheproofreplacement` |
//!
//! The pool bounds have no upstream option; they cap the memory retained
//! for proofs that are not currently peers.
//!
//! # Example
//!
//! ```toml
//! [avalanche]
//! conflicting_proof_cooldown = 60
//! enable_proof_replacement = false
//! orphan_pool_size = 1024
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML input could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field value is outside its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_cooldown() -> u32 {
    60
}

fn default_conflicting_pool_size() -> usize {
    64
}

fn default_orphan_pool_size() -> usize {
    1024
}

/// Configuration for the avalanche peer manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvalancheConfig {
    /// Minimum seconds between successive conflicting-proof challenges
    /// against the same peer. Zero disables the cooldown.
    #[serde(default = "default_cooldown")]
    pub conflicting_proof_cooldown: u32,

    /// Allow a registration to displace live peers when the incoming proof
    /// wins the conflicting-proof comparison against all of them. When
    /// disabled, conflicting registrations only ever land in the
    /// conflicting pool.
    #[serde(default)]
    pub enable_proof_replacement: bool,

    /// Maximum number of proofs retained in the conflicting pool.
    #[serde(default = "default_conflicting_pool_size")]
    pub conflicting_pool_size: usize,

    /// Maximum number of proofs retained in the orphan pool.
    #[serde(default = "default_orphan_pool_size")]
    pub orphan_pool_size: usize,
}

impl Default for AvalancheConfig {
    fn default() -> Self {
        Self {
            conflicting_proof_cooldown: default_cooldown(),
            enable_proof_replacement: false,
            conflicting_pool_size: default_conflicting_pool_size(),
            orphan_pool_size: default_orphan_pool_size(),
        }
    }
}

impl AvalancheConfig {
    /// Parse from a TOML document; missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: AvalancheConfig = toml::from_str(input)?;
        config.validate()?;
        debug!(
            cooldown = config.conflicting_proof_cooldown,
            replacement = config.enable_proof_replacement,
            "loaded avalanche config"
        );
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conflicting_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "conflicting_pool_size must be positive".into(),
            ));
        }
        if self.orphan_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "orphan_pool_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
