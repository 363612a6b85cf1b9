//! Structured narration of engine activity through an injected sink.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use membrane_spec::{ConnectionId, MembraneId, MessageId, PortId, PortStatus, RuleId};

/// Something the engine did or refused to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    /// Evolution enabled.
    Started,
    /// Evolution disabled.
    Stopped,
    /// A membrane was admitted.
    MembraneCreated {
        /// New membrane.
        id: MembraneId,
        /// Its parent, none for roots.
        parent: Option<MembraneId>,
        /// Its depth.
        depth: usize,
    },
    /// A membrane moved under a new parent or became a root.
    MembraneReparented {
        /// Moved membrane.
        id: MembraneId,
        /// New parent.
        parent: Option<MembraneId>,
    },
    /// A membrane was released.
    MembraneDissolved {
        /// Released membrane.
        id: MembraneId,
        /// Ports detached with it.
        ports: usize,
    },
    /// A port was registered and attached.
    PortAttached {
        /// Port.
        port: PortId,
        /// Owner.
        membrane: MembraneId,
    },
    /// A port changed status.
    PortStatusChanged {
        /// Port.
        port: PortId,
        /// New status.
        status: PortStatus,
    },
    /// Two ports were connected.
    PortsConnected {
        /// Connection.
        connection: ConnectionId,
        /// Whether traffic may flow back from the target.
        mirrored: bool,
    },
    /// A connection was removed.
    PortsDisconnected {
        /// Connection.
        connection: ConnectionId,
    },
    /// A message passed the sending pipeline.
    MessageSent {
        /// Sending port.
        port: PortId,
        /// Message.
        message: MessageId,
        /// Connections it was routed to.
        routes: usize,
    },
    /// A message was buffered at an input.
    MessageBuffered {
        /// Receiving port.
        port: PortId,
        /// Message.
        message: MessageId,
        /// Buffer length after enqueue.
        buffered: usize,
    },
    /// A pipeline refused a message.
    MessageRejected {
        /// Port that refused it.
        port: PortId,
        /// Cause.
        reason: String,
    },
    /// Every action of a rule succeeded.
    RuleExecuted {
        /// Rule.
        rule: RuleId,
        /// Actions run.
        actions: usize,
    },
    /// At least one action of a rule failed.
    RuleFailed {
        /// Rule.
        rule: RuleId,
        /// One entry per failed action.
        failures: Vec<String>,
    },
    /// Load balancing moved buffered messages.
    LoadBalanced {
        /// Drained membrane.
        from: MembraneId,
        /// Filled membrane.
        to: MembraneId,
        /// Messages moved.
        moved: usize,
    },
    /// Failover replaced a faulted membrane.
    FailedOver {
        /// Faulted membrane.
        failed: MembraneId,
        /// Its replacement.
        replica: MembraneId,
    },
    /// An evolution cycle finished.
    CycleCompleted {
        /// Cycle number.
        cycle: u64,
        /// Rules that fired.
        fired: usize,
        /// Rules that failed.
        failed: usize,
    },
}

/// Receiver of engine events.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &SystemEvent);
}

/// Sink that narrates through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &SystemEvent) {
        match event {
            SystemEvent::Started => info!("p-system started"),
            SystemEvent::Stopped => info!("p-system stopped"),
            SystemEvent::MembraneCreated { id, parent, depth } => {
                info!(membrane = %id, parent = ?parent, depth, "membrane created")
            }
            SystemEvent::MembraneReparented { id, parent } => {
                info!(membrane = %id, parent = ?parent, "membrane reparented")
            }
            SystemEvent::MembraneDissolved { id, ports } => {
                info!(membrane = %id, ports, "membrane dissolved")
            }
            SystemEvent::PortAttached { port, membrane } => {
                debug!(port = %port, membrane = %membrane, "port attached")
            }
            SystemEvent::PortStatusChanged { port, status } => {
                info!(port = %port, status = ?status, "port status changed")
            }
            SystemEvent::PortsConnected {
                connection,
                mirrored,
            } => info!(connection = %connection, mirrored, "ports connected"),
            SystemEvent::PortsDisconnected { connection } => {
                info!(connection = %connection, "ports disconnected")
            }
            SystemEvent::MessageSent {
                port,
                message,
                routes,
            } => debug!(port = %port, message = %message, routes, "message sent"),
            SystemEvent::MessageBuffered {
                port,
                message,
                buffered,
            } => debug!(port = %port, message = %message, buffered, "message buffered"),
            SystemEvent::MessageRejected { port, reason } => {
                warn!(port = %port, reason = %reason, "message rejected")
            }
            SystemEvent::RuleExecuted { rule, actions } => {
                info!(rule = %rule, actions, "rule executed")
            }
            SystemEvent::RuleFailed { rule, failures } => {
                warn!(rule = %rule, failures = ?failures, "rule failed")
            }
            SystemEvent::LoadBalanced { from, to, moved } => {
                info!(from = %from, to = %to, moved, "load balanced")
            }
            SystemEvent::FailedOver { failed, replica } => {
                warn!(failed = %failed, replica = %replica, "membrane failed over")
            }
            SystemEvent::CycleCompleted {
                cycle,
                fired,
                failed,
            } => debug!(cycle, fired, failed, "evolution cycle completed"),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SystemEvent>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<SystemEvent> {
        self.events.lock().clone()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<SystemEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &SystemEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Cloneable handle to a sink, shared by a system and its ports.
#[derive(Clone)]
pub struct SharedSink(Arc<dyn EventSink>);

impl SharedSink {
    /// Wrap a sink.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self(sink)
    }

    /// Forward an event.
    pub fn emit(&self, event: SystemEvent) {
        self.0.record(&event);
    }
}

impl Default for SharedSink {
    fn default() -> Self {
        Self(Arc::new(TracingSink))
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSink")
    }
}

impl<S: EventSink + 'static> From<Arc<S>> for SharedSink {
    fn from(sink: Arc<S>) -> Self {
        Self(sink)
    }
}
