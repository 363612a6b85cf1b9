//! P-system configuration and construction-time validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration problems detected before a system or port is built.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required identifier was empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    /// A numeric field was zero or out of range.
    #[error("{field} out of range: {detail}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Human-readable constraint.
        detail: String,
    },
    /// Two rules in one list share an id.
    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),
}

/// How rule-driven creations choose a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionStrategy {
    /// Shallowest parent first, then fewest children.
    BreadthFirst,
    /// Deepest parent first, newest on ties.
    DepthFirst,
    /// Fewest children first, then shallowest.
    #[default]
    Balanced,
    /// Least loaded first, then fewest children.
    LoadAware,
}

/// When rule-driven membrane creations take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CreationPolicy {
    /// Immediately, inside the action.
    #[default]
    Eager,
    /// Queued; materialised at the start of the next evolution cycle.
    Lazy,
    /// Queued until the caller asks for materialisation.
    OnDemand,
}

/// P-system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PSystemConfig {
    /// System id, also the prefix of generated membrane ids.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Exclusive depth bound: a membrane may exist at depth `d` only if `d < max_depth`.
    pub max_depth: usize,
    /// Upper bound on live membranes.
    pub max_membranes: usize,
    /// Parent selection strategy for rule-driven creation.
    pub distribution_strategy: DistributionStrategy,
    /// Replicas produced per replication action.
    pub replication_factor: usize,
    /// Allow `failover` actions.
    pub enable_failover: bool,
    /// Allow `balance_load` actions.
    pub enable_load_balancing: bool,
    /// Timing of rule-driven creation.
    pub membrane_creation_policy: CreationPolicy,
    /// Buffer capacity of default ports.
    pub default_buffer_size: usize,
    /// Connection capacity of default ports.
    pub default_max_connections: usize,
    /// `content_size` multiplier applied by the default compression transform.
    pub compression_ratio: f64,
    /// ed25519 public keys accepted on control ports; empty accepts any valid signature.
    pub control_authorities: Vec<[u8; 32]>,
}

impl Default for PSystemConfig {
    fn default() -> Self {
        Self {
            id: "psystem".into(),
            name: "P-System".into(),
            max_depth: 10,
            max_membranes: 1000,
            distribution_strategy: DistributionStrategy::default(),
            replication_factor: 1,
            enable_failover: true,
            enable_load_balancing: true,
            membrane_creation_policy: CreationPolicy::default(),
            default_buffer_size: 100,
            default_max_connections: 16,
            compression_ratio: 0.5,
            control_authorities: Vec::new(),
        }
    }
}

impl PSystemConfig {
    /// Reject malformed configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyField("id"));
        }
        positive("max_depth", self.max_depth)?;
        positive("max_membranes", self.max_membranes)?;
        positive("replication_factor", self.replication_factor)?;
        positive("default_buffer_size", self.default_buffer_size)?;
        positive("default_max_connections", self.default_max_connections)?;
        if !(self.compression_ratio > 0.0 && self.compression_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "compression_ratio",
                detail: format!("{} not in (0, 1]", self.compression_ratio),
            });
        }
        Ok(())
    }
}

pub(crate) fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange {
            field,
            detail: "must be greater than zero".into(),
        });
    }
    Ok(())
}
