//! Membrane P-system data model: identifiers, boundary policies, opaque membrane
//! state, port configuration, message records, rule definitions and the
//! statistics/audit records polled by external monitoring.
#![deny(missing_docs)]

pub mod boundary;
pub mod config;
pub mod ids;
pub mod message;
pub mod port;
pub mod rules;
pub mod state;
pub mod stats;

pub use boundary::{Boundary, BoundaryPolicy, Permeability};
pub use config::{ConfigError, CreationPolicy, DistributionStrategy, PSystemConfig};
pub use ids::{ConnectionId, MembraneId, MessageId, PortId, RuleId};
pub use message::{
    encode_f32, message_digest, Authorization, MessagePayload, Outbound, PortMessage,
    TransformationRecord,
};
pub use port::{
    ConnectionType, PortChannelConfig, PortDirection, PortStatus, TransformationKind,
    TransformationRuleSpec, ValidationKind, ValidationRuleSpec, CONTROL, CONTROL_DATA_TYPE,
    TENSOR_DATA_TYPE, TENSOR_INPUT, TENSOR_OUTPUT,
};
pub use rules::{
    Comparison, MembraneSelector, PSystemRule, ResourceKind, RuleAction, RuleCondition, RuleKind,
};
pub use state::{MembraneState, StateKey, StateValue};
pub use stats::{
    ComputationalComplexity, EvolutionEvent, EvolutionEventKind, SystemStatistics,
    HISTORY_CAPACITY,
};

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
