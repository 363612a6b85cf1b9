//! Membrane P-system engine: hierarchical membranes with typed ports,
//! validated and transformed message passing, rule-driven evolution and
//! topology analysis over a single-writer arena.
#![deny(missing_docs)]

mod error;
mod events;
mod evolution;
mod membrane;
pub mod pipeline;
mod port;
mod system;
mod topology;

pub use error::{InvariantViolation, Limit, MembraneError, PortError, RuleCheck, SystemError};
pub use events::{EventSink, MemorySink, SharedSink, SystemEvent, TracingSink};
pub use evolution::{ConditionSubject, CycleReport};
pub use membrane::{Membrane, PerformanceMetrics};
pub use pipeline::decrypt_content;
pub use port::{Delivery, Dispatch, PortChannel, PortConnection, PortCounters, Route};
pub use system::{PSystem, ReplicationReport, SendReport};
pub use topology::TopologyReport;
