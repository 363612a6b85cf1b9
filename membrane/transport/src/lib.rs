//! Transport adapters for port-to-port delivery: an immediate in-process
//! transport, a latency-injecting test transport, and a courier that fans a
//! prepared send out per connection.
#![deny(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use membrane_core::{Delivery, PSystem};
use membrane_spec::{ConnectionId, MessageId, Outbound, PortId};

/// Transport error.
pub type TransportResult<T> = Result<T, anyhow::Error>;

/// Carries one delivery leg from the sending side to the receiving side.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Carry a delivery. The returned delivery is handed to the receiving port.
    async fn carry(&self, delivery: Delivery) -> TransportResult<Delivery>;
}

/// Delivers immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessTransport;

#[async_trait]
impl Transport for InProcessTransport {
    async fn carry(&self, delivery: Delivery) -> TransportResult<Delivery> {
        Ok(delivery)
    }
}

/// Test transport that delays every delivery and can drop selected
/// connections.
#[derive(Debug, Clone, Default)]
pub struct LatencyTransport {
    latency: Duration,
    dropped: BTreeSet<ConnectionId>,
}

impl LatencyTransport {
    /// Delay every delivery by `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            dropped: BTreeSet::new(),
        }
    }

    /// Fail every delivery over `connection` after the delay.
    pub fn dropping(mut self, connection: ConnectionId) -> Self {
        self.dropped.insert(connection);
        self
    }
}

#[async_trait]
impl Transport for LatencyTransport {
    async fn carry(&self, delivery: Delivery) -> TransportResult<Delivery> {
        tokio::time::sleep(self.latency).await;
        if self.dropped.contains(&delivery.connection) {
            return Err(anyhow!("connection {} dropped the message", delivery.connection));
        }
        Ok(delivery)
    }
}

/// Per-connection outcome of an async send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CourierReport {
    /// Message id.
    pub message: MessageId,
    /// Connections whose receiving port buffered the message.
    pub delivered: Vec<ConnectionId>,
    /// Connections that failed in transit or at the receiver, with the cause.
    pub failed: Vec<(ConnectionId, String)>,
    /// Connections abandoned after the timeout.
    pub timed_out: Vec<ConnectionId>,
}

impl CourierReport {
    /// Every routed connection received the message.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

enum Leg {
    Delivered(ConnectionId),
    Failed(ConnectionId, String),
    TimedOut(ConnectionId),
}

/// Runs the sending pipeline on a system and carries each leg over a
/// transport, all legs concurrently. Nothing is rolled back when some legs
/// fail.
#[derive(Clone)]
pub struct Courier {
    system: Arc<PSystem>,
    transport: Arc<dyn Transport>,
}

impl Courier {
    /// Create a courier for `system` over `transport`.
    pub fn new(system: Arc<PSystem>, transport: Arc<dyn Transport>) -> Self {
        Self { system, transport }
    }

    /// Courier over the in-process transport.
    pub fn in_process(system: Arc<PSystem>) -> Self {
        Self::new(system, Arc::new(InProcessTransport))
    }

    /// The system this courier sends for.
    pub fn system(&self) -> &Arc<PSystem> {
        &self.system
    }

    /// Send without a deadline.
    pub async fn send(
        &self,
        port: &PortId,
        outbound: Outbound,
        connection: Option<&ConnectionId>,
    ) -> TransportResult<CourierReport> {
        self.dispatch(port, outbound, connection, None).await
    }

    /// Send, abandoning any leg still in transit after `timeout`. An abandoned
    /// leg is never delivered.
    pub async fn send_with_timeout(
        &self,
        port: &PortId,
        outbound: Outbound,
        connection: Option<&ConnectionId>,
        timeout: Duration,
    ) -> TransportResult<CourierReport> {
        self.dispatch(port, outbound, connection, Some(timeout)).await
    }

    async fn dispatch(
        &self,
        port: &PortId,
        outbound: Outbound,
        connection: Option<&ConnectionId>,
        timeout: Option<Duration>,
    ) -> TransportResult<CourierReport> {
        let dispatch = self.system.prepare_send(port, outbound, connection)?;
        let mut report = CourierReport {
            message: dispatch.message.id.clone(),
            ..CourierReport::default()
        };
        let legs = dispatch
            .into_deliveries()
            .into_iter()
            .map(|delivery| self.leg(delivery, timeout));
        for leg in join_all(legs).await {
            match leg {
                Leg::Delivered(id) => report.delivered.push(id),
                Leg::Failed(id, reason) => report.failed.push((id, reason)),
                Leg::TimedOut(id) => report.timed_out.push(id),
            }
        }
        debug!(
            message = %report.message,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "courier dispatch finished"
        );
        Ok(report)
    }

    async fn leg(&self, delivery: Delivery, timeout: Option<Duration>) -> Leg {
        let connection = delivery.connection.clone();
        let carried = self.transport.carry(delivery.clone());
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, carried).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(connection = %connection, "delivery timed out");
                    self.system.record_transport_failure(&delivery);
                    return Leg::TimedOut(connection);
                }
            },
            None => carried.await,
        };
        let arrived = match outcome {
            Ok(arrived) => arrived,
            Err(err) => {
                warn!(connection = %connection, error = %err, "transport failed");
                self.system.record_transport_failure(&delivery);
                return Leg::Failed(connection, err.to_string());
            }
        };
        match self.system.deliver(&arrived) {
            Ok(_) => Leg::Delivered(connection),
            Err(err) => Leg::Failed(connection, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membrane_core::Membrane;
    use membrane_spec::{
        Boundary, ConnectionType, MembraneId, MembraneState, MessagePayload, PSystemConfig,
        TENSOR_INPUT, TENSOR_OUTPUT,
    };

    struct Fixture {
        system: Arc<PSystem>,
        out: PortId,
        targets: Vec<(MembraneId, ConnectionId)>,
    }

    fn fixture(fan_out: usize) -> Fixture {
        let system = Arc::new(PSystem::new(PSystemConfig::default()).unwrap());
        let root = system
            .add_root_membrane(Membrane::new("r", "r", MembraneState::default(), Boundary::default()))
            .unwrap();
        let out = PortId::for_membrane(&root, TENSOR_OUTPUT);
        let targets = (0..fan_out)
            .map(|_| {
                let child = system
                    .create_child_membrane(&root, MembraneState::default(), None, None)
                    .unwrap();
                let conn = system
                    .connect_ports(
                        &out,
                        &PortId::for_membrane(&child, TENSOR_INPUT),
                        ConnectionType::Direct,
                    )
                    .unwrap();
                (child, conn)
            })
            .collect();
        Fixture {
            system,
            out,
            targets,
        }
    }

    fn tensor(v: f32) -> Outbound {
        MessagePayload::tensor(&[v], vec![1]).into()
    }

    fn buffered(system: &PSystem, membrane: &MembraneId) -> usize {
        system
            .port(&PortId::for_membrane(membrane, TENSOR_INPUT))
            .unwrap()
            .buffered()
    }

    #[tokio::test]
    async fn in_process_delivers_to_every_connection() {
        let f = fixture(3);
        let courier = Courier::in_process(f.system.clone());
        let report = courier.send(&f.out, tensor(1.0), None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.delivered.len(), 3);
        for (child, _) in &f.targets {
            assert_eq!(buffered(&f.system, child), 1);
        }
    }

    #[tokio::test]
    async fn named_connection_only() {
        let f = fixture(2);
        let courier = Courier::in_process(f.system.clone());
        let (first, conn) = &f.targets[0];
        let report = courier.send(&f.out, tensor(1.0), Some(conn)).await.unwrap();
        assert_eq!(report.delivered, vec![conn.clone()]);
        assert_eq!(buffered(&f.system, first), 1);
        assert_eq!(buffered(&f.system, &f.targets[1].0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_slow_legs() {
        let f = fixture(1);
        let courier = Courier::new(
            f.system.clone(),
            Arc::new(LatencyTransport::new(Duration::from_millis(200))),
        );
        let report = courier
            .send_with_timeout(&f.out, tensor(1.0), None, Duration::from_millis(50))
            .await
            .unwrap();
        let (child, conn) = &f.targets[0];
        assert_eq!(report.timed_out, vec![conn.clone()]);
        assert_eq!(buffered(&f.system, child), 0);
        let port = f.system.port(&f.out).unwrap();
        assert_eq!(port.connection(conn).unwrap().error_count, 1);

        let report = courier
            .send_with_timeout(&f.out, tensor(2.0), None, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(buffered(&f.system, child), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connection_is_partial_failure() {
        let f = fixture(2);
        let (_, lost) = &f.targets[1];
        let transport = LatencyTransport::new(Duration::from_millis(10)).dropping(lost.clone());
        let courier = Courier::new(f.system.clone(), Arc::new(transport));
        let report = courier.send(&f.out, tensor(1.0), None).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.delivered, vec![f.targets[0].1.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(buffered(&f.system, &f.targets[0].0), 1, "delivered leg stays");
        let port = f.system.port(&f.out).unwrap();
        assert_eq!(port.connection(lost).unwrap().error_count, 1);
        assert_eq!(port.counters().sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_sends_arrive_in_order() {
        let f = fixture(1);
        let courier = Courier::new(
            f.system.clone(),
            Arc::new(LatencyTransport::new(Duration::from_millis(5))),
        );
        for v in 0..4 {
            courier.send(&f.out, tensor(v as f32), None).await.unwrap();
        }
        let input = PortId::for_membrane(&f.targets[0].0, TENSOR_INPUT);
        let mut seen = Vec::new();
        while let Some(message) = f.system.take_message(&input).unwrap() {
            seen.push(message.payload.as_f32().unwrap()[0]);
        }
        assert_eq!(seen, [0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn pipeline_rejection_sends_nothing() {
        let f = fixture(1);
        let courier = Courier::in_process(f.system.clone());
        let err = courier
            .send(&f.out, MessagePayload::raw("text", vec![1u8]).into(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("validation failed"));
        assert_eq!(buffered(&f.system, &f.targets[0].0), 0);
    }
}
