//! Error surface of the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use membrane_spec::{ConfigError, ConnectionId, MembraneId, PortDirection, PortId};

/// Outcome of one validation rule on one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCheck {
    /// Rule id.
    pub rule_id: String,
    /// Rule kind label.
    pub kind: String,
    /// Whether the rule accepted the message.
    pub passed: bool,
    /// Rejection reason.
    pub reason: Option<String>,
}

/// Local child-list misuse on a single membrane record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MembraneError {
    /// The child is already listed.
    #[error("membrane {0} is already a child")]
    DuplicateChild(MembraneId),
    /// A membrane cannot contain itself.
    #[error("membrane {0} cannot be its own child")]
    SelfChild(MembraneId),
}

/// Port and message pipeline failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PortError {
    /// Invalid port configuration.
    #[error("invalid port configuration: {0}")]
    Config(#[from] ConfigError),
    /// At least one validation rule rejected the message.
    #[error("validation failed: {}", summarize(.failures))]
    ValidationFailed {
        /// Failed checks only.
        failures: Vec<RuleCheck>,
    },
    /// A transformation step errored; nothing was delivered.
    #[error("transformation {rule_id} failed: {reason}")]
    TransformationFailed {
        /// Failing rule.
        rule_id: String,
        /// Cause.
        reason: String,
    },
    /// Input buffer at capacity.
    #[error("buffer of {port} is full ({capacity} messages)")]
    BufferFull {
        /// Port id.
        port: PortId,
        /// Buffer capacity.
        capacity: usize,
    },
    /// Connection capacity reached on one side.
    #[error("port {port} reached its connection limit of {limit}")]
    ConnectionLimit {
        /// Port id.
        port: PortId,
        /// Connection capacity.
        limit: usize,
    },
    /// Input-to-input or output-to-output.
    #[error("cannot connect {from:?} port to {target:?} port")]
    DirectionIncompatible {
        /// Source direction.
        from: PortDirection,
        /// Target direction.
        target: PortDirection,
    },
    /// The same source/target pair is already connected.
    #[error("connection {0} already exists")]
    DuplicateConnection(ConnectionId),
    /// The owning membrane's boundary refuses the connection.
    #[error("boundary of membrane {0} denies the connection")]
    BoundaryDenied(MembraneId),
    /// Source and target are the same port.
    #[error("port {0} cannot connect to itself")]
    SelfConnection(PortId),
    /// Port already bound to its membrane.
    #[error("port {0} is already attached")]
    AlreadyAttached(PortId),
    /// Port configured for a different membrane.
    #[error("port {port} belongs to membrane {expected}, not {actual}")]
    MembraneMismatch {
        /// Port id.
        port: PortId,
        /// Configured membrane.
        expected: MembraneId,
        /// Offered membrane.
        actual: MembraneId,
    },
    /// Operation not allowed for the port's direction.
    #[error("port {port} is {direction:?} and cannot {operation}")]
    WrongDirection {
        /// Port id.
        port: PortId,
        /// Port direction.
        direction: PortDirection,
        /// Attempted operation.
        operation: &'static str,
    },
    /// Port is not active.
    #[error("port {0} is not active")]
    PortInactive(PortId),
    /// Owning membrane is inactive.
    #[error("membrane {0} is inactive")]
    MembraneInactive(MembraneId),
    /// Connection id unknown to the port.
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),
    /// Connection exists but is disabled.
    #[error("connection {0} is inactive")]
    ConnectionInactive(ConnectionId),
    /// Some routed connections failed; delivered ones are not rolled back.
    #[error("delivery failed on {failed} of {} connections", .delivered + .failed)]
    DeliveryFailed {
        /// Connections that received the message.
        delivered: usize,
        /// Connections that did not.
        failed: usize,
    },
}

fn summarize(failures: &[RuleCheck]) -> String {
    failures
        .iter()
        .map(|c| match &c.reason {
            Some(reason) => format!("{} ({reason})", c.rule_id),
            None => c.rule_id.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Which limit refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// `max_depth`
    Depth,
    /// `max_membranes`
    Membranes,
}

/// P-system operation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SystemError {
    /// Invalid system configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Unresolved reference.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Referenced entity kind.
        kind: &'static str,
        /// Referenced id.
        id: String,
    },
    /// Id already registered.
    #[error("{kind} {id} already exists")]
    DuplicateId {
        /// Entity kind.
        kind: &'static str,
        /// Duplicate id.
        id: String,
    },
    /// `add_root_membrane` got a membrane with a parent or children.
    #[error("membrane {0} is not a detached root")]
    NotRoot(MembraneId),
    /// Depth or membrane-count limit reached.
    #[error("{limit:?} limit of {max} reached")]
    CapacityExceeded {
        /// Which limit.
        limit: Limit,
        /// Its configured value.
        max: usize,
    },
    /// Dissolution without a child disposition.
    #[error("membrane {0} has children; redistribute or dissolve recursively")]
    HasChildren(MembraneId),
    /// Some members of a replicated subtree got no replica.
    #[error("replication of {membrane} refused {refused} member(s)")]
    PartialReplication {
        /// Replicated membrane.
        membrane: MembraneId,
        /// Members refused or skipped.
        refused: usize,
    },
    /// Another evolution cycle is in flight.
    #[error("an evolution cycle is already running")]
    EvolutionInProgress,
    /// Action needs a feature the configuration disables.
    #[error("{0} is disabled by configuration")]
    FeatureDisabled(&'static str),
    /// A selector matched nothing.
    #[error("no membrane matches {0}")]
    NoCandidate(String),
    /// Port or pipeline failure.
    #[error(transparent)]
    Port(#[from] PortError),
    /// Child list misuse.
    #[error(transparent)]
    Membrane(#[from] MembraneError),
}

/// Broken structural invariant. Always a bug in the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(pub String);

impl SystemError {
    pub(crate) fn membrane_not_found(id: &MembraneId) -> Self {
        SystemError::NotFound {
            kind: "membrane",
            id: id.to_string(),
        }
    }

    pub(crate) fn port_not_found(id: &PortId) -> Self {
        SystemError::NotFound {
            kind: "port",
            id: id.to_string(),
        }
    }
}
