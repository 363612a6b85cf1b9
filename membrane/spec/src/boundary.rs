//! Membrane boundary: permeability policy gating cross-membrane connections.

use serde::{Deserialize, Serialize};

/// Outbound permeability a `selective` boundary needs before it lets a connection out.
pub const SELECTIVE_OUTBOUND_THRESHOLD: f64 = 0.5;
/// Bidirectional permeability a `semi-permeable` boundary needs before it lets a connection out.
pub const SEMI_PERMEABLE_THRESHOLD: f64 = 0.3;

/// Boundary policy of a membrane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryPolicy {
    /// Everything crosses.
    #[default]
    Open,
    /// Nothing crosses.
    Closed,
    /// Crossing gated on outbound permeability.
    Selective,
    /// Crossing gated on bidirectional permeability.
    SemiPermeable,
}

/// Numeric permeability per direction, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Permeability {
    /// Inbound permeability.
    pub inbound: f64,
    /// Outbound permeability.
    pub outbound: f64,
    /// Permeability applied to traffic in both directions.
    pub bidirectional: f64,
}

impl Default for Permeability {
    fn default() -> Self {
        Self {
            inbound: 1.0,
            outbound: 1.0,
            bidirectional: 1.0,
        }
    }
}

/// Boundary of a membrane: policy plus permeability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Boundary {
    /// Crossing policy.
    pub policy: BoundaryPolicy,
    /// Permeability values consulted by the gated policies.
    #[serde(default)]
    pub permeability: Permeability,
}

impl Boundary {
    /// Boundary with the given policy and full permeability.
    pub fn new(policy: BoundaryPolicy) -> Self {
        Self {
            policy,
            permeability: Permeability::default(),
        }
    }

    /// Override permeability values.
    pub fn with_permeability(mut self, inbound: f64, outbound: f64, bidirectional: f64) -> Self {
        self.permeability = Permeability {
            inbound,
            outbound,
            bidirectional,
        };
        self
    }

    /// Whether a port owned by a membrane with this boundary may open a connection.
    pub fn allows_connection(&self) -> bool {
        match self.policy {
            BoundaryPolicy::Open => true,
            BoundaryPolicy::Closed => false,
            BoundaryPolicy::Selective => self.permeability.outbound > SELECTIVE_OUTBOUND_THRESHOLD,
            BoundaryPolicy::SemiPermeable => {
                self.permeability.bidirectional > SEMI_PERMEABLE_THRESHOLD
            }
        }
    }
}
