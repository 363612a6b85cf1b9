//! Port channels: typed, directional endpoints bound to one membrane, with a
//! bounded FIFO buffer and a set of connections to other ports.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use membrane_spec::{
    Boundary, ConnectionId, ConnectionType, MembraneId, MessageId, Outbound, PortChannelConfig,
    PortDirection, PortId, PortMessage, PortStatus,
};

use crate::error::PortError;
use crate::events::{SharedSink, SystemEvent};
use crate::membrane::Membrane;
use crate::pipeline;

/// Directed edge between two ports. Both endpoints keep a copy; traffic
/// counters are maintained on the copy held by the sending port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConnection {
    /// `"{source}->{target}"`.
    pub id: ConnectionId,
    /// Port that opened the connection.
    pub source_port: PortId,
    /// Port that accepted it.
    pub target_port: PortId,
    /// Advisory label.
    pub connection_type: ConnectionType,
    /// The source may send to the target.
    pub forward: bool,
    /// The target may send back to the source.
    pub mirrored: bool,
    /// Messages delivered.
    pub message_count: u64,
    /// Accounted bytes delivered.
    pub total_bytes: u64,
    /// Failed deliveries.
    pub error_count: u64,
    /// Disabled connections are skipped when routing.
    pub is_active: bool,
    /// Creation time.
    pub created_at_ms: u64,
    /// Last delivery attempt.
    pub last_activity_ms: Option<u64>,
}

impl PortConnection {
    /// The far end as seen from `port`, if `port` may send over this connection.
    pub fn route_from(&self, port: &PortId) -> Option<&PortId> {
        if &self.source_port == port {
            self.forward.then_some(&self.target_port)
        } else if self.mirrored && &self.target_port == port {
            Some(&self.source_port)
        } else {
            None
        }
    }

    /// The endpoint that is not `port`.
    pub fn peer_of(&self, port: &PortId) -> &PortId {
        if &self.source_port == port {
            &self.target_port
        } else {
            &self.source_port
        }
    }
}

/// Per-port traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCounters {
    /// Successful deliveries out of this port.
    pub sent: u64,
    /// Messages buffered.
    pub received: u64,
    /// Messages refused by validation.
    pub validation_failures: u64,
    /// Messages refused by a transformation.
    pub transformation_failures: u64,
    /// Messages refused because the buffer was full.
    pub buffer_overflows: u64,
}

/// One leg of a prepared send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Connection carrying the message.
    pub connection: ConnectionId,
    /// Receiving port.
    pub target_port: PortId,
}

/// A message that passed the sending pipeline, with the connections it goes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    /// Sending port.
    pub source_port: PortId,
    /// Transformed message.
    pub message: PortMessage,
    /// Targets, in connection id order.
    pub routes: Vec<Route>,
}

impl Dispatch {
    /// Split into one delivery per route.
    pub fn into_deliveries(self) -> Vec<Delivery> {
        let Dispatch {
            source_port,
            message,
            routes,
        } = self;
        routes
            .into_iter()
            .map(|route| Delivery {
                source_port: source_port.clone(),
                connection: route.connection,
                target_port: route.target_port,
                message: message.clone(),
            })
            .collect()
    }
}

/// A message on its way over a single connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Sending port.
    pub source_port: PortId,
    /// Connection used.
    pub connection: ConnectionId,
    /// Receiving port.
    pub target_port: PortId,
    /// Message as it left the sender.
    pub message: PortMessage,
}

/// Typed endpoint of a membrane.
#[derive(Debug, Clone)]
pub struct PortChannel {
    config: PortChannelConfig,
    attached: bool,
    status: PortStatus,
    buffer: VecDeque<PortMessage>,
    connections: BTreeMap<ConnectionId, PortConnection>,
    counters: PortCounters,
    next_message: u64,
    sink: SharedSink,
}

impl PortChannel {
    /// Validate `config` and build a detached port. Transformation rules are
    /// stably sorted by ascending priority.
    pub fn new(mut config: PortChannelConfig, sink: SharedSink) -> Result<Self, PortError> {
        config.validate()?;
        config.transformation_rules.sort_by_key(|r| r.priority);
        Ok(Self {
            config,
            attached: false,
            status: PortStatus::Inactive,
            buffer: VecDeque::new(),
            connections: BTreeMap::new(),
            counters: PortCounters::default(),
            next_message: 0,
            sink,
        })
    }

    /// Bind to the configured membrane. Succeeds once.
    pub fn attach_to_membrane(&mut self, membrane: &Membrane) -> Result<(), PortError> {
        if self.attached {
            return Err(PortError::AlreadyAttached(self.config.id.clone()));
        }
        if membrane.id() != &self.config.membrane_id {
            return Err(PortError::MembraneMismatch {
                port: self.config.id.clone(),
                expected: self.config.membrane_id.clone(),
                actual: membrane.id().clone(),
            });
        }
        self.attached = true;
        self.status = PortStatus::Active;
        self.sink.emit(SystemEvent::PortAttached {
            port: self.config.id.clone(),
            membrane: membrane.id().clone(),
        });
        Ok(())
    }

    /// Open a connection from this port to `target`. `boundary` is the owning
    /// membrane's boundary. Both ports record the connection. Traffic flows in
    /// every direction where one end can send and the other can receive.
    pub fn connect_to_port(
        &mut self,
        target: &mut PortChannel,
        boundary: &Boundary,
        connection_type: ConnectionType,
    ) -> Result<ConnectionId, PortError> {
        if self.config.id == target.config.id {
            return Err(PortError::SelfConnection(self.config.id.clone()));
        }
        let (source_dir, target_dir) = (self.config.direction, target.config.direction);
        if !source_dir.compatible_with(target_dir) {
            return Err(PortError::DirectionIncompatible {
                from: source_dir,
                target: target_dir,
            });
        }
        let id = ConnectionId::between(&self.config.id, &target.config.id);
        let reverse = ConnectionId::between(&target.config.id, &self.config.id);
        if self.connections.contains_key(&id) || self.connections.contains_key(&reverse) {
            return Err(PortError::DuplicateConnection(id));
        }
        if !boundary.allows_connection() {
            return Err(PortError::BoundaryDenied(self.config.membrane_id.clone()));
        }
        for port in [&*self, &*target] {
            if port.connections.len() >= port.config.max_connections {
                return Err(PortError::ConnectionLimit {
                    port: port.config.id.clone(),
                    limit: port.config.max_connections,
                });
            }
        }

        let forward = source_dir.can_send() && target_dir.can_receive();
        let mirrored = target_dir.can_send() && source_dir.can_receive();
        let connection = PortConnection {
            id: id.clone(),
            source_port: self.config.id.clone(),
            target_port: target.config.id.clone(),
            connection_type,
            forward,
            mirrored,
            message_count: 0,
            total_bytes: 0,
            error_count: 0,
            is_active: true,
            created_at_ms: membrane_spec::now_ms(),
            last_activity_ms: None,
        };
        target.connections.insert(id.clone(), connection.clone());
        self.connections.insert(id.clone(), connection);
        self.sink.emit(SystemEvent::PortsConnected {
            connection: id.clone(),
            mirrored,
        });
        Ok(id)
    }

    /// Drop this port's copy of a connection.
    pub fn disconnect(&mut self, id: &ConnectionId) -> Result<PortConnection, PortError> {
        self.connections
            .remove(id)
            .ok_or_else(|| PortError::ConnectionNotFound(id.clone()))
    }

    /// Enable or disable a connection for routing.
    pub fn set_connection_active(&mut self, id: &ConnectionId, active: bool) -> Result<(), PortError> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or_else(|| PortError::ConnectionNotFound(id.clone()))?;
        conn.is_active = active;
        Ok(())
    }

    /// Build, validate and transform a message and resolve its routes: the
    /// named connection, or every active connection this port may send over.
    /// Nothing is delivered here.
    pub fn prepare_send(
        &mut self,
        outbound: Outbound,
        target: Option<&ConnectionId>,
    ) -> Result<Dispatch, PortError> {
        if !self.config.direction.can_send() {
            return Err(PortError::WrongDirection {
                port: self.config.id.clone(),
                direction: self.config.direction,
                operation: "send",
            });
        }
        self.ensure_active()?;

        let routes = match target {
            Some(id) => {
                let conn = self
                    .connections
                    .get(id)
                    .ok_or_else(|| PortError::ConnectionNotFound(id.clone()))?;
                if !conn.is_active {
                    return Err(PortError::ConnectionInactive(id.clone()));
                }
                let peer = conn
                    .route_from(&self.config.id)
                    .ok_or_else(|| PortError::ConnectionNotFound(id.clone()))?;
                vec![Route {
                    connection: id.clone(),
                    target_port: peer.clone(),
                }]
            }
            None => self
                .connections
                .values()
                .filter(|c| c.is_active)
                .filter_map(|c| {
                    c.route_from(&self.config.id).map(|peer| Route {
                        connection: c.id.clone(),
                        target_port: peer.clone(),
                    })
                })
                .collect(),
        };

        self.next_message += 1;
        let message_id = MessageId::new(format!("{}#{}", self.config.id, self.next_message));
        let now = membrane_spec::now_ms();
        let message = PortMessage::build(message_id, self.config.id.clone(), outbound, now);
        let message = self.run_pipeline(message, now)?;

        self.sink.emit(SystemEvent::MessageSent {
            port: self.config.id.clone(),
            message: message.id.clone(),
            routes: routes.len(),
        });
        Ok(Dispatch {
            source_port: self.config.id.clone(),
            message,
            routes,
        })
    }

    /// Validate, transform and buffer an incoming message. A full buffer is
    /// refused before anything else runs.
    pub fn receive_message(&mut self, message: PortMessage) -> Result<MessageId, PortError> {
        if !self.config.direction.can_receive() {
            return Err(PortError::WrongDirection {
                port: self.config.id.clone(),
                direction: self.config.direction,
                operation: "receive",
            });
        }
        self.ensure_active()?;
        if self.buffer.len() >= self.config.buffer_size {
            self.counters.buffer_overflows += 1;
            let err = PortError::BufferFull {
                port: self.config.id.clone(),
                capacity: self.config.buffer_size,
            };
            self.reject(&err);
            return Err(err);
        }

        let mut message = self.run_pipeline(message, membrane_spec::now_ms())?;
        message.hop_count += 1;
        message.target_port = Some(self.config.id.clone());
        let id = message.id.clone();
        self.buffer.push_back(message);
        self.counters.received += 1;
        self.sink.emit(SystemEvent::MessageBuffered {
            port: self.config.id.clone(),
            message: id.clone(),
            buffered: self.buffer.len(),
        });
        Ok(id)
    }

    fn run_pipeline(&mut self, message: PortMessage, now: u64) -> Result<PortMessage, PortError> {
        let keys = pipeline::sealing_keys(&self.config);
        let failures: Vec<_> = pipeline::validate(&self.config.validation_rules, &keys, &message)
            .into_iter()
            .filter(|c| !c.passed)
            .collect();
        if !failures.is_empty() {
            self.counters.validation_failures += 1;
            let err = PortError::ValidationFailed { failures };
            self.reject(&err);
            return Err(err);
        }
        match pipeline::transform(&self.config, message, now) {
            Ok(message) => Ok(message),
            Err(err) => {
                self.counters.transformation_failures += 1;
                self.reject(&err);
                Err(err)
            }
        }
    }

    fn reject(&self, err: &PortError) {
        self.sink.emit(SystemEvent::MessageRejected {
            port: self.config.id.clone(),
            reason: err.to_string(),
        });
    }

    fn ensure_active(&self) -> Result<(), PortError> {
        if self.status != PortStatus::Active {
            return Err(PortError::PortInactive(self.config.id.clone()));
        }
        Ok(())
    }

    /// Account one delivery attempt on the sender's copy of a connection.
    pub(crate) fn record_delivery(&mut self, id: &ConnectionId, bytes: usize, delivered: bool) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.last_activity_ms = Some(membrane_spec::now_ms());
            if delivered {
                conn.message_count += 1;
                conn.total_bytes += bytes as u64;
            } else {
                conn.error_count += 1;
            }
        }
        if delivered {
            self.counters.sent += 1;
        }
    }

    /// Pop the oldest buffered message.
    pub fn take_message(&mut self) -> Option<PortMessage> {
        self.buffer.pop_front()
    }

    /// Remove the newest `count` buffered messages, oldest of them first.
    pub(crate) fn split_tail(&mut self, count: usize) -> Vec<PortMessage> {
        let keep = self.buffer.len().saturating_sub(count);
        self.buffer.split_off(keep).into()
    }

    /// Append already-validated messages, bounded by free capacity. Returns
    /// the messages that did not fit.
    pub(crate) fn absorb(&mut self, messages: Vec<PortMessage>) -> Vec<PortMessage> {
        let mut rest = Vec::new();
        for mut message in messages {
            if self.buffer.len() < self.config.buffer_size {
                message.target_port = Some(self.config.id.clone());
                self.buffer.push_back(message);
            } else {
                rest.push(message);
            }
        }
        rest
    }

    /// Re-declare the accepted tensor shape.
    pub(crate) fn declare_shape(&mut self, shape: &[usize]) {
        self.config.declare_shape(shape);
    }

    /// Set status.
    pub fn set_status(&mut self, status: PortStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.sink.emit(SystemEvent::PortStatusChanged {
            port: self.config.id.clone(),
            status,
        });
    }

    /// Id.
    pub fn id(&self) -> &PortId {
        &self.config.id
    }

    /// Owning membrane.
    pub fn membrane_id(&self) -> &MembraneId {
        &self.config.membrane_id
    }

    /// Direction.
    pub fn direction(&self) -> PortDirection {
        self.config.direction
    }

    /// Effective configuration, transformation rules sorted.
    pub fn config(&self) -> &PortChannelConfig {
        &self.config
    }

    /// Status.
    pub fn status(&self) -> PortStatus {
        self.status
    }

    /// Bound to its membrane.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Connections by id.
    pub fn get_connections(&self) -> &BTreeMap<ConnectionId, PortConnection> {
        &self.connections
    }

    /// One connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<&PortConnection> {
        self.connections.get(id)
    }

    /// Buffered messages, oldest first.
    pub fn buffer(&self) -> &VecDeque<PortMessage> {
        &self.buffer
    }

    /// Buffer length.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer capacity.
    pub fn capacity(&self) -> usize {
        self.config.buffer_size
    }

    /// Buffer utilisation in `[0, 1]`.
    pub fn load(&self) -> f64 {
        self.buffer.len() as f64 / self.config.buffer_size as f64
    }

    /// Counters.
    pub fn counters(&self) -> &PortCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membrane_spec::{
        BoundaryPolicy, MembraneState, MessagePayload, TransformationKind,
        TransformationRuleSpec,
    };

    fn membrane(id: &str) -> Membrane {
        Membrane::new(id, id, MembraneState::default(), Boundary::default())
    }

    fn attached(cfg: PortChannelConfig) -> PortChannel {
        let owner = membrane(cfg.membrane_id.as_str());
        let mut port = PortChannel::new(cfg, SharedSink::default()).unwrap();
        port.attach_to_membrane(&owner).unwrap();
        port
    }

    fn output(m: &str) -> PortChannel {
        attached(PortChannelConfig::tensor_output(&m.into(), 0.5))
    }

    fn input(m: &str, buffer: usize) -> PortChannel {
        attached(PortChannelConfig::tensor_input(&m.into(), &[2]).with_capacity(buffer, 4))
    }

    #[test]
    fn attaches_once_to_its_own_membrane() {
        let cfg = PortChannelConfig::tensor_input(&"a".into(), &[]);
        let mut port = PortChannel::new(cfg, SharedSink::default()).unwrap();
        assert_eq!(port.status(), PortStatus::Inactive);
        assert!(matches!(
            port.attach_to_membrane(&membrane("b")),
            Err(PortError::MembraneMismatch { .. })
        ));
        port.attach_to_membrane(&membrane("a")).unwrap();
        assert_eq!(port.status(), PortStatus::Active);
        assert!(matches!(
            port.attach_to_membrane(&membrane("a")),
            Err(PortError::AlreadyAttached(_))
        ));
    }

    #[test]
    fn transformations_sorted_by_priority() {
        let cfg = PortChannelConfig::new("p", PortDirection::Output, "tensor", "m".into())
            .with_transformation(TransformationRuleSpec::new("late", TransformationKind::Normalization, 5))
            .with_transformation(TransformationRuleSpec::new("first", TransformationKind::Normalization, -1))
            .with_transformation(TransformationRuleSpec::new("tie", TransformationKind::Normalization, 5));
        let port = PortChannel::new(cfg, SharedSink::default()).unwrap();
        let order: Vec<_> = port.config().transformation_rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, ["first", "late", "tie"]);
    }

    #[test]
    fn connection_is_visible_on_both_ends() {
        let mut out = output("a");
        let mut inp = input("b", 4);
        let id = out
            .connect_to_port(&mut inp, &Boundary::default(), ConnectionType::Direct)
            .unwrap();
        assert!(out.get_connections().contains_key(&id));
        assert!(inp.get_connections().contains_key(&id));
        let conn = out.connection(&id).unwrap();
        assert!(conn.forward && !conn.mirrored);
        assert!(matches!(
            out.connect_to_port(&mut inp, &Boundary::default(), ConnectionType::Direct),
            Err(PortError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn incompatible_directions_rejected() {
        let mut a = input("a", 4);
        let mut b = input("b", 4);
        let err = a
            .connect_to_port(&mut b, &Boundary::default(), ConnectionType::Direct)
            .unwrap_err();
        assert_eq!(
            err,
            PortError::DirectionIncompatible {
                from: PortDirection::Input,
                target: PortDirection::Input,
            }
        );
        assert_eq!(err.to_string(), "cannot connect Input port to Input port");
        let mut c = output("c");
        let mut d = output("d");
        assert!(matches!(
            c.connect_to_port(&mut d, &Boundary::default(), ConnectionType::Direct),
            Err(PortError::DirectionIncompatible { .. })
        ));
    }

    #[test]
    fn closed_boundary_denies() {
        let mut out = output("a");
        let mut inp = input("b", 4);
        let closed = Boundary::new(BoundaryPolicy::Closed);
        assert_eq!(
            out.connect_to_port(&mut inp, &closed, ConnectionType::Direct),
            Err(PortError::BoundaryDenied("a".into()))
        );
        assert!(inp.get_connections().is_empty());
    }

    #[test]
    fn connection_limit_enforced() {
        let mut out = attached(
            PortChannelConfig::tensor_output(&"a".into(), 0.5).with_capacity(4, 1),
        );
        let mut first = input("b", 4);
        let mut second = input("c", 4);
        out.connect_to_port(&mut first, &Boundary::default(), ConnectionType::Direct)
            .unwrap();
        assert!(matches!(
            out.connect_to_port(&mut second, &Boundary::default(), ConnectionType::Direct),
            Err(PortError::ConnectionLimit { limit: 1, .. })
        ));
    }

    #[test]
    fn bidirectional_connections_are_mirrored() {
        let mut a = attached(PortChannelConfig::control(&"a".into(), vec![], [1; 32]));
        let mut b = attached(PortChannelConfig::control(&"b".into(), vec![], [1; 32]));
        let id = a
            .connect_to_port(&mut b, &Boundary::default(), ConnectionType::Direct)
            .unwrap();
        let conn = b.connection(&id).unwrap();
        assert!(conn.forward && conn.mirrored);
        assert_eq!(conn.route_from(b.id()), Some(a.id()));
        assert!(matches!(
            b.connect_to_port(&mut a, &Boundary::default(), ConnectionType::Direct),
            Err(PortError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn flow_follows_sender_and_receiver_roles() {
        let mut ctl = attached(PortChannelConfig::control(&"c".into(), vec![], [1; 32]));
        let mut out = output("a");
        let mut inp = input("b", 4);
        let pushed = out
            .connect_to_port(&mut ctl, &Boundary::default(), ConnectionType::Direct)
            .unwrap();
        let pulled = inp
            .connect_to_port(&mut ctl, &Boundary::default(), ConnectionType::Direct)
            .unwrap();
        let pushed = ctl.connection(&pushed).unwrap();
        assert_eq!(pushed.route_from(out.id()), Some(ctl.id()));
        assert_eq!(pushed.route_from(ctl.id()), None);
        let pulled = ctl.connection(&pulled).unwrap();
        assert_eq!(pulled.route_from(inp.id()), None);
        assert_eq!(pulled.route_from(ctl.id()), Some(inp.id()));

        let mut other = output("d");
        let reversed = inp
            .connect_to_port(&mut other, &Boundary::default(), ConnectionType::Direct)
            .unwrap();
        assert_eq!(
            other.connection(&reversed).unwrap().route_from(other.id()),
            Some(inp.id())
        );
    }

    #[test]
    fn send_routes_to_active_connections_only() {
        let mut out = output("a");
        let mut b = input("b", 4);
        let mut c = input("c", 4);
        let to_b = out
            .connect_to_port(&mut b, &Boundary::default(), ConnectionType::Multicast)
            .unwrap();
        let to_c = out
            .connect_to_port(&mut c, &Boundary::default(), ConnectionType::Multicast)
            .unwrap();
        out.set_connection_active(&to_c, false).unwrap();
        let dispatch = out
            .prepare_send(MessagePayload::tensor(&[1.0, 2.0], vec![2]).into(), None)
            .unwrap();
        assert_eq!(dispatch.routes.len(), 1);
        assert_eq!(dispatch.routes[0].connection, to_b);
        assert_eq!(dispatch.message.content_size, 4);
        assert_eq!(
            out.prepare_send(MessagePayload::tensor(&[1.0], vec![1]).into(), Some(&to_c)),
            Err(PortError::ConnectionInactive(to_c))
        );
    }

    #[test]
    fn failed_validation_has_no_side_effects() {
        let mut out = output("a");
        let err = out
            .prepare_send(MessagePayload::raw("text", vec![1u8]).into(), None)
            .unwrap_err();
        assert!(matches!(err, PortError::ValidationFailed { ref failures } if failures.len() == 1));
        assert_eq!(out.counters().validation_failures, 1);
        assert_eq!(out.counters().sent, 0);
    }

    #[test]
    fn inputs_cannot_send_and_inactive_ports_refuse() {
        let mut inp = input("a", 4);
        assert!(matches!(
            inp.prepare_send(MessagePayload::tensor(&[1.0, 2.0], vec![2]).into(), None),
            Err(PortError::WrongDirection { operation: "send", .. })
        ));
        inp.set_status(PortStatus::Blocked);
        let msg = PortMessage::build(
            "x#1".into(),
            "x".into(),
            MessagePayload::tensor(&[1.0, 2.0], vec![2]).into(),
            0,
        );
        assert_eq!(inp.receive_message(msg), Err(PortError::PortInactive("a/tensor-input".into())));
    }

    #[test]
    fn full_buffer_rejects_without_mutation() {
        let mut inp = input("a", 1);
        let msg = |n: u32| {
            PortMessage::build(
                format!("x#{n}").into(),
                "x".into(),
                MessagePayload::tensor(&[n as f32, 0.0], vec![2]).into(),
                0,
            )
        };
        inp.receive_message(msg(1)).unwrap();
        assert!(matches!(inp.receive_message(msg(2)), Err(PortError::BufferFull { capacity: 1, .. })));
        assert_eq!(inp.buffered(), 1);
        assert_eq!(inp.counters().buffer_overflows, 1);
        let head = inp.take_message().unwrap();
        assert_eq!(head.hop_count, 1);
        assert_eq!(head.target_port, Some("a/tensor-input".into()));
        assert_eq!(inp.buffered(), 0);
    }

    #[test]
    fn tail_moves_keep_order() {
        let mut from = input("a", 8);
        let mut to = input("b", 2);
        for n in 0..5u32 {
            from.receive_message(PortMessage::build(
                format!("x#{n}").into(),
                "x".into(),
                MessagePayload::tensor(&[n as f32, 0.0], vec![2]).into(),
                0,
            ))
            .unwrap();
        }
        let moved = from.split_tail(3);
        let ids: Vec<_> = moved.iter().map(|m| m.id.to_string()).collect();
        assert_eq!(ids, ["x#2", "x#3", "x#4"]);
        let rest = to.absorb(moved);
        assert_eq!(rest.len(), 1);
        assert_eq!(to.buffer()[0].id.as_str(), "x#2");
    }
}
