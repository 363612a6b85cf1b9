//! The P-system aggregate: membrane arena, port registry, rule table and audit
//! history behind one lock, so structural mutations never interleave.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;

use membrane_spec::{
    Boundary, ComputationalComplexity, ConnectionId, ConnectionType, EvolutionEvent,
    EvolutionEventKind, MembraneId, MembraneState, MessageId, Outbound, PSystemConfig,
    PSystemRule, PortChannelConfig, PortId, PortMessage, PortStatus, RuleCondition, RuleId,
    SystemStatistics, HISTORY_CAPACITY, TENSOR_INPUT,
};

use crate::error::{InvariantViolation, Limit, PortError, SystemError};
use crate::evolution::{ConditionSubject, CycleReport, PendingCreation};
use crate::events::{SharedSink, SystemEvent};
use crate::membrane::Membrane;
use crate::port::{Delivery, Dispatch, PortChannel};
use crate::topology::{self, TopologyReport};

/// Outcome of a synchronous send where every routed connection succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReport {
    /// Message id.
    pub message: MessageId,
    /// Connections that received it.
    pub delivered: Vec<ConnectionId>,
}

/// Outcome of a replication. Sub-replicas that failed admission do not undo
/// the ones already created.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationReport {
    /// Replicated membrane.
    pub source: MembraneId,
    /// Replica of `source`.
    pub root: MembraneId,
    /// `(original, replica)` pairs in creation order, `root` first.
    pub replicas: Vec<(MembraneId, MembraneId)>,
    /// Originals whose replica was refused.
    pub failed: Vec<(MembraneId, SystemError)>,
    /// Originals skipped because an ancestor's replica was refused.
    pub skipped: Vec<MembraneId>,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub(crate) max_depth_reached: usize,
    pub(crate) rules_executed: u64,
    pub(crate) evolution_cycles: u64,
    pub(crate) creations: u64,
    pub(crate) dissolutions: u64,
    pub(crate) load_balances: u64,
    pub(crate) failovers: u64,
    pub(crate) complexity: ComputationalComplexity,
}

/// Everything guarded by the system lock.
#[derive(Debug)]
pub(crate) struct SystemState {
    pub(crate) config: PSystemConfig,
    pub(crate) membranes: BTreeMap<MembraneId, Membrane>,
    pub(crate) ports: BTreeMap<PortId, PortChannel>,
    /// Undirected membrane-level adjacency: parent/child links plus port links.
    pub(crate) links: BTreeMap<MembraneId, BTreeSet<MembraneId>>,
    pub(crate) rules: BTreeMap<RuleId, PSystemRule>,
    pub(crate) history: VecDeque<EvolutionEvent>,
    pub(crate) counters: Counters,
    pub(crate) pending: VecDeque<PendingCreation>,
    pub(crate) running: bool,
    next_id: u64,
    admitted: u64,
    started: Instant,
    control_key: [u8; 32],
    pub(crate) sink: SharedSink,
}

/// Membrane-computing system.
#[derive(Debug)]
pub struct PSystem {
    state: RwLock<SystemState>,
    cycle_guard: Mutex<()>,
}

impl PSystem {
    /// Build a stopped, empty system narrating through `tracing`.
    pub fn new(config: PSystemConfig) -> Result<Self, SystemError> {
        Self::with_sink(config, SharedSink::default())
    }

    /// Build a stopped, empty system narrating into `sink`.
    pub fn with_sink(config: PSystemConfig, sink: SharedSink) -> Result<Self, SystemError> {
        config.validate()?;
        let control_key = blake3::derive_key("membrane-core control port keystream", config.id.as_bytes());
        Ok(Self {
            state: RwLock::new(SystemState {
                config,
                membranes: BTreeMap::new(),
                ports: BTreeMap::new(),
                links: BTreeMap::new(),
                rules: BTreeMap::new(),
                history: VecDeque::new(),
                counters: Counters::default(),
                pending: VecDeque::new(),
                running: false,
                next_id: 0,
                admitted: 0,
                started: Instant::now(),
                control_key,
                sink,
            }),
            cycle_guard: Mutex::new(()),
        })
    }

    /// Configuration in force.
    pub fn config(&self) -> PSystemConfig {
        self.state.read().config.clone()
    }

    /// Key of the default encryption transform on control ports.
    pub fn control_key(&self) -> [u8; 32] {
        self.state.read().control_key
    }

    /// Enable evolution.
    pub fn start(&self) {
        let mut state = self.state.write();
        if !state.running {
            state.running = true;
            state.sink.emit(SystemEvent::Started);
        }
    }

    /// Disable evolution. Direct operations keep working.
    pub fn stop(&self) {
        let mut state = self.state.write();
        if state.running {
            state.running = false;
            state.sink.emit(SystemEvent::Stopped);
        }
    }

    /// Whether evolution cycles run.
    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    /// Admit a detached root membrane and provision its default ports.
    pub fn add_root_membrane(&self, membrane: Membrane) -> Result<MembraneId, SystemError> {
        self.state.write().add_root(membrane)
    }

    /// Create a child of `parent`. Refused with no mutation when the parent is
    /// unknown, the child would reach `max_depth`, or the system is full.
    pub fn create_child_membrane(
        &self,
        parent: &MembraneId,
        state: MembraneState,
        name: Option<&str>,
        boundary: Option<Boundary>,
    ) -> Result<MembraneId, SystemError> {
        self.state
            .write()
            .create_child(parent, state, name.map(str::to_string), boundary)
    }

    /// Dissolve a membrane. With children it requires `redistribute_children`,
    /// which moves them under the dissolved membrane's parent, or promotes them
    /// to roots when it had none.
    pub fn dissolve_membrane(
        &self,
        id: &MembraneId,
        redistribute_children: bool,
    ) -> Result<(), SystemError> {
        self.state.write().dissolve(id, redistribute_children)
    }

    /// Dissolve a membrane and its whole subtree, deepest first. Returns the
    /// number of membranes released.
    pub fn dissolve_membrane_recursive(&self, id: &MembraneId) -> Result<usize, SystemError> {
        self.state.write().dissolve_recursive(id)
    }

    /// Clone `source` (and optionally its subtree) under `target_parent`, or
    /// as a new root when `None`.
    pub fn replicate_membrane(
        &self,
        source: &MembraneId,
        target_parent: Option<&MembraneId>,
        replicate_children: bool,
    ) -> Result<ReplicationReport, SystemError> {
        self.state
            .write()
            .replicate(source, target_parent, replicate_children)
    }

    /// Mutate a membrane's state in place.
    pub fn update_membrane_state<F>(&self, id: &MembraneId, update: F) -> Result<(), SystemError>
    where
        F: FnOnce(&mut MembraneState),
    {
        let mut state = self.state.write();
        let membrane = state
            .membranes
            .get_mut(id)
            .ok_or_else(|| SystemError::membrane_not_found(id))?;
        let mut next = membrane.state.clone();
        update(&mut next);
        let reshaped = next.shape != membrane.state.shape;
        let shape = next.shape.clone();
        membrane.replace_state(next);
        if reshaped {
            if let Some(input) = state.ports.get_mut(&PortId::for_membrane(id, TENSOR_INPUT)) {
                input.declare_shape(&shape);
            }
        }
        Ok(())
    }

    /// Snapshot of one membrane.
    pub fn membrane(&self, id: &MembraneId) -> Option<Membrane> {
        self.state.read().membranes.get(id).cloned()
    }

    /// Snapshot of every membrane in admission order.
    pub fn membranes(&self) -> Vec<Membrane> {
        let state = self.state.read();
        let mut all: Vec<_> = state.membranes.values().cloned().collect();
        all.sort_by_key(|m| m.created_seq);
        all
    }

    /// Live membranes.
    pub fn membrane_count(&self) -> usize {
        self.state.read().membranes.len()
    }

    /// Register and attach a custom port.
    pub fn add_port(&self, config: PortChannelConfig) -> Result<PortId, SystemError> {
        self.state.write().add_port(config)
    }

    /// Snapshot of one port.
    pub fn port(&self, id: &PortId) -> Option<PortChannel> {
        self.state.read().ports.get(id).cloned()
    }

    /// Ports owned by a membrane.
    pub fn ports_of(&self, membrane: &MembraneId) -> Vec<PortId> {
        self.state.read().ports_of(membrane)
    }

    /// Connect two registered ports under the source membrane's boundary.
    pub fn connect_ports(
        &self,
        source: &PortId,
        target: &PortId,
        connection_type: ConnectionType,
    ) -> Result<ConnectionId, SystemError> {
        self.state.write().connect(source, target, connection_type)
    }

    /// Remove a connection from both of its ports.
    pub fn disconnect_port(&self, port: &PortId, connection: &ConnectionId) -> Result<(), SystemError> {
        self.state.write().disconnect(port, connection)
    }

    /// Change a port's status.
    pub fn set_port_status(&self, port: &PortId, status: PortStatus) -> Result<(), SystemError> {
        let mut state = self.state.write();
        state
            .ports
            .get_mut(port)
            .ok_or_else(|| SystemError::port_not_found(port))?
            .set_status(status);
        Ok(())
    }

    /// Run the sending pipeline without delivering.
    pub fn prepare_send(
        &self,
        port: &PortId,
        outbound: Outbound,
        connection: Option<&ConnectionId>,
    ) -> Result<Dispatch, SystemError> {
        self.state.write().prepare_send(port, outbound, connection)
    }

    /// Hand one leg of a dispatch to its receiving port.
    pub fn deliver(&self, delivery: &Delivery) -> Result<MessageId, SystemError> {
        self.state.write().deliver(delivery)
    }

    /// Count a delivery that never reached its receiving port.
    pub fn record_transport_failure(&self, delivery: &Delivery) {
        let mut state = self.state.write();
        if let Some(port) = state.ports.get_mut(&delivery.source_port) {
            port.record_delivery(&delivery.connection, 0, false);
        }
    }

    /// Send and deliver synchronously. Fails when any routed connection
    /// failed; connections already delivered to are not rolled back.
    pub fn send_message(
        &self,
        port: &PortId,
        outbound: Outbound,
        connection: Option<&ConnectionId>,
    ) -> Result<SendReport, SystemError> {
        let mut state = self.state.write();
        let dispatch = state.prepare_send(port, outbound, connection)?;
        let message = dispatch.message.id.clone();
        let mut delivered = Vec::new();
        let mut failed = 0;
        for delivery in dispatch.into_deliveries() {
            match state.deliver(&delivery) {
                Ok(_) => delivered.push(delivery.connection),
                Err(_) => failed += 1,
            }
        }
        if failed > 0 {
            return Err(PortError::DeliveryFailed {
                delivered: delivered.len(),
                failed,
            }
            .into());
        }
        Ok(SendReport { message, delivered })
    }

    /// Pop the oldest buffered message of a port.
    pub fn take_message(&self, port: &PortId) -> Result<Option<PortMessage>, SystemError> {
        let mut state = self.state.write();
        Ok(state
            .ports
            .get_mut(port)
            .ok_or_else(|| SystemError::port_not_found(port))?
            .take_message())
    }

    /// Register a rule.
    pub fn add_rule(&self, rule: PSystemRule) -> Result<(), SystemError> {
        let mut state = self.state.write();
        if state.rules.contains_key(&rule.id) {
            return Err(SystemError::DuplicateId {
                kind: "rule",
                id: rule.id.to_string(),
            });
        }
        state.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Unregister a rule.
    pub fn remove_rule(&self, id: &RuleId) -> Result<PSystemRule, SystemError> {
        self.state
            .write()
            .rules
            .remove(id)
            .ok_or_else(|| SystemError::NotFound {
                kind: "rule",
                id: id.to_string(),
            })
    }

    /// Snapshot of one rule.
    pub fn rule(&self, id: &RuleId) -> Option<PSystemRule> {
        self.state.read().rules.get(id).cloned()
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> Vec<PSystemRule> {
        let state = self.state.read();
        let mut rules: Vec<_> = state.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Run one evolution cycle. A no-op report when stopped; refused while
    /// another cycle is in flight.
    pub fn execute_evolution_cycle(&self) -> Result<CycleReport, SystemError> {
        let Some(_cycle) = self.cycle_guard.try_lock() else {
            return Err(SystemError::EvolutionInProgress);
        };
        Ok(self.state.write().run_cycle())
    }

    /// Resolve a rule condition against the current system.
    pub fn condition_subject(&self, condition: &RuleCondition) -> ConditionSubject {
        self.state.read().subject(condition)
    }

    /// Materialise queued rule-driven creations now.
    pub fn materialize_pending(&self) -> Vec<MembraneId> {
        self.state.write().flush_pending()
    }

    /// Queued rule-driven creations.
    pub fn pending_creations(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Statistics snapshot.
    pub fn get_statistics(&self) -> SystemStatistics {
        self.state.read().statistics()
    }

    /// Audit history, oldest first.
    pub fn evolution_history(&self) -> Vec<EvolutionEvent> {
        self.state.read().history.iter().cloned().collect()
    }

    /// Structural analysis of the current hierarchy.
    pub fn analyze_topology(&self) -> TopologyReport {
        topology::analyze(&self.state.read())
    }

    /// Check every structural invariant.
    pub fn verify_invariants(&self) -> Result<(), InvariantViolation> {
        self.state.read().check_invariants()
    }
}

impl SystemState {
    pub(crate) fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(crate) fn statistics(&self) -> SystemStatistics {
        let total = self.membranes.len();
        let depth_sum: usize = self.membranes.values().map(|m| m.depth).sum();
        SystemStatistics {
            total_membranes: total,
            max_depth_reached: self.counters.max_depth_reached,
            average_depth: if total == 0 {
                0.0
            } else {
                depth_sum as f64 / total as f64
            },
            total_connections: self.link_count(),
            total_ports: self.ports.len(),
            rules_executed: self.counters.rules_executed,
            evolution_cycles: self.counters.evolution_cycles,
            membrane_creations: self.counters.creations,
            membrane_dissolutions: self.counters.dissolutions,
            load_balance_operations: self.counters.load_balances,
            failover_operations: self.counters.failovers,
            uptime_ms: self.uptime_ms(),
            computational_complexity: self.counters.complexity,
        }
    }

    pub(crate) fn audit(&mut self, kind: EvolutionEventKind, details: serde_json::Value) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(EvolutionEvent {
            kind,
            timestamp: membrane_spec::now_ms(),
            details,
        });
    }

    pub(crate) fn link_count(&self) -> usize {
        self.links.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.membranes.values().map(|m| m.depth).max().unwrap_or(0)
    }

    pub(crate) fn ports_of(&self, membrane: &MembraneId) -> Vec<PortId> {
        self.ports
            .values()
            .filter(|p| p.membrane_id() == membrane)
            .map(|p| p.id().clone())
            .collect()
    }

    /// Buffered messages over buffer capacity across a membrane's receiving ports.
    pub(crate) fn membrane_load(&self, membrane: &MembraneId) -> f64 {
        let (buffered, capacity) = self
            .ports
            .values()
            .filter(|p| p.membrane_id() == membrane && p.direction().can_receive())
            .fold((0usize, 0usize), |(b, c), p| (b + p.buffered(), c + p.capacity()));
        if capacity == 0 {
            0.0
        } else {
            buffered as f64 / capacity as f64
        }
    }

    pub(crate) fn buffered_messages(&self, membrane: &MembraneId) -> usize {
        self.ports
            .values()
            .filter(|p| p.membrane_id() == membrane)
            .map(PortChannel::buffered)
            .sum()
    }

    fn allocate_id(&mut self) -> MembraneId {
        loop {
            self.next_id += 1;
            let id = MembraneId::new(format!("{}-m{}", self.config.id, self.next_id));
            if !self.membranes.contains_key(&id) {
                return id;
            }
        }
    }

    fn ensure_capacity(&self) -> Result<(), SystemError> {
        if self.membranes.len() >= self.config.max_membranes {
            return Err(SystemError::CapacityExceeded {
                limit: Limit::Membranes,
                max: self.config.max_membranes,
            });
        }
        Ok(())
    }

    fn default_ports(&self, membrane: &Membrane) -> Result<Vec<PortChannel>, SystemError> {
        let cfg = &self.config;
        let configs = [
            PortChannelConfig::tensor_input(&membrane.id, &membrane.state.shape),
            PortChannelConfig::tensor_output(&membrane.id, cfg.compression_ratio),
            PortChannelConfig::control(&membrane.id, cfg.control_authorities.clone(), self.control_key),
        ];
        configs
            .into_iter()
            .map(|c| {
                let c = c.with_capacity(cfg.default_buffer_size, cfg.default_max_connections);
                self.build_port(c, membrane)
            })
            .collect()
    }

    fn build_port(
        &self,
        config: PortChannelConfig,
        membrane: &Membrane,
    ) -> Result<PortChannel, SystemError> {
        if self.ports.contains_key(&config.id) {
            return Err(SystemError::DuplicateId {
                kind: "port",
                id: config.id.to_string(),
            });
        }
        let mut port = PortChannel::new(config, self.sink.clone())?;
        port.attach_to_membrane(membrane)?;
        Ok(port)
    }

    pub(crate) fn add_root(&mut self, mut membrane: Membrane) -> Result<MembraneId, SystemError> {
        if !membrane.is_root() || !membrane.is_leaf() {
            return Err(SystemError::NotRoot(membrane.id.clone()));
        }
        if membrane.id.as_str().is_empty() {
            return Err(membrane_spec::ConfigError::EmptyField("membrane id").into());
        }
        if self.membranes.contains_key(&membrane.id) {
            return Err(SystemError::DuplicateId {
                kind: "membrane",
                id: membrane.id.to_string(),
            });
        }
        self.ensure_capacity()?;
        membrane.depth = 0;
        membrane.active = true;
        let ports = self.default_ports(&membrane)?;
        Ok(self.insert(membrane, ports))
    }

    pub(crate) fn spawn_root(
        &mut self,
        state: MembraneState,
        name: Option<String>,
        boundary: Boundary,
    ) -> Result<MembraneId, SystemError> {
        self.ensure_capacity()?;
        let id = self.allocate_id();
        let name = name.unwrap_or_else(|| id.to_string());
        self.add_root(Membrane::new(id, name, state, boundary))
    }

    pub(crate) fn create_child(
        &mut self,
        parent_id: &MembraneId,
        state: MembraneState,
        name: Option<String>,
        boundary: Option<Boundary>,
    ) -> Result<MembraneId, SystemError> {
        let parent = self
            .membranes
            .get(parent_id)
            .ok_or_else(|| SystemError::membrane_not_found(parent_id))?;
        if !parent.active {
            return Err(PortError::MembraneInactive(parent_id.clone()).into());
        }
        if parent.depth + 1 >= self.config.max_depth {
            return Err(SystemError::CapacityExceeded {
                limit: Limit::Depth,
                max: self.config.max_depth,
            });
        }
        self.ensure_capacity()?;
        let boundary = boundary.unwrap_or(parent.boundary);

        let id = self.allocate_id();
        let name = name.unwrap_or_else(|| id.to_string());
        let mut child = Membrane::new(id, name, state, boundary);
        let ports = self.default_ports(&child)?;
        self.membranes
            .get_mut(parent_id)
            .ok_or_else(|| SystemError::membrane_not_found(parent_id))?
            .add_child_membrane(&mut child)?;
        Ok(self.insert(child, ports))
    }

    fn insert(&mut self, mut membrane: Membrane, ports: Vec<PortChannel>) -> MembraneId {
        self.admitted += 1;
        membrane.created_seq = self.admitted;
        let id = membrane.id.clone();
        let parent = membrane.parent.clone();
        let depth = membrane.depth;

        self.links.entry(id.clone()).or_default();
        if let Some(parent) = &parent {
            self.link(&id, parent);
        }
        for port in ports {
            self.ports.insert(port.id().clone(), port);
        }
        self.membranes.insert(id.clone(), membrane);
        self.counters.max_depth_reached = self.counters.max_depth_reached.max(depth);
        self.counters.creations += 1;
        self.audit(
            EvolutionEventKind::MembraneCreated,
            json!({ "id": id, "parent": parent, "depth": depth }),
        );
        self.sink.emit(SystemEvent::MembraneCreated {
            id: id.clone(),
            parent,
            depth,
        });
        self.debug_check();
        id
    }

    pub(crate) fn dissolve(
        &mut self,
        id: &MembraneId,
        redistribute_children: bool,
    ) -> Result<(), SystemError> {
        let membrane = self
            .membranes
            .get(id)
            .ok_or_else(|| SystemError::membrane_not_found(id))?;
        if !membrane.is_leaf() && !redistribute_children {
            return Err(SystemError::HasChildren(id.clone()));
        }
        let children = membrane.children.clone();
        let parent = membrane.parent.clone();
        for child in &children {
            self.reparent(child, parent.as_ref())?;
        }
        self.release(id);
        self.debug_check();
        Ok(())
    }

    pub(crate) fn dissolve_recursive(&mut self, id: &MembraneId) -> Result<usize, SystemError> {
        if !self.membranes.contains_key(id) {
            return Err(SystemError::membrane_not_found(id));
        }
        let mut order = self.subtree(id);
        order.reverse();
        for victim in &order {
            self.release(victim);
        }
        self.debug_check();
        Ok(order.len())
    }

    /// Preorder ids of the subtree rooted at `id`, `id` first.
    pub(crate) fn subtree(&self, id: &MembraneId) -> Vec<MembraneId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            if let Some(m) = self.membranes.get(&next) {
                stack.extend(m.children.iter().rev().cloned());
                out.push(next);
            }
        }
        out
    }

    fn reparent(&mut self, id: &MembraneId, new_parent: Option<&MembraneId>) -> Result<(), SystemError> {
        if let Some(p) = new_parent {
            if !self.membranes.contains_key(p) {
                return Err(SystemError::membrane_not_found(p));
            }
        }
        let mut node = self
            .membranes
            .remove(id)
            .ok_or_else(|| SystemError::membrane_not_found(id))?;
        if let Some(old) = node.parent.take() {
            if let Some(old_parent) = self.membranes.get_mut(&old) {
                old_parent.remove_child_membrane(id);
            }
            self.unlink_unless_ported(id, &old);
        }
        node.depth = 0;
        let linked = match new_parent.and_then(|p| self.membranes.get_mut(p)) {
            Some(parent) => parent.add_child_membrane(&mut node),
            None => Ok(()),
        };
        let parent = node.parent.clone();
        self.membranes.insert(id.clone(), node);
        linked?;
        if let Some(parent) = &parent {
            self.link(id, parent);
        }
        self.refresh_depths(id);
        self.sink.emit(SystemEvent::MembraneReparented {
            id: id.clone(),
            parent,
        });
        Ok(())
    }

    fn refresh_depths(&mut self, root: &MembraneId) {
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(id) = queue.pop_front() {
            let Some(m) = self.membranes.get(&id) else {
                continue;
            };
            let depth = m.depth;
            let children = m.children.clone();
            for child in children {
                if let Some(c) = self.membranes.get_mut(&child) {
                    c.depth = depth + 1;
                    queue.push_back(child);
                }
            }
        }
    }

    /// Remove a membrane whose children were already handled.
    fn release(&mut self, id: &MembraneId) {
        let Some(mut node) = self.membranes.remove(id) else {
            return;
        };
        if let Some(parent) = node.parent.as_ref().and_then(|p| self.membranes.get_mut(p)) {
            parent.remove_child_membrane(id);
        }
        if let Some(neighbours) = self.links.remove(id) {
            for n in neighbours {
                if let Some(set) = self.links.get_mut(&n) {
                    set.remove(id);
                }
            }
        }
        node.deactivate();
        let ports = self.detach_ports(id);
        self.pending.retain(|p| &p.parent != id);
        self.counters.dissolutions += 1;
        self.audit(
            EvolutionEventKind::MembraneDissolved,
            json!({ "id": id, "ports": ports }),
        );
        self.sink.emit(SystemEvent::MembraneDissolved {
            id: id.clone(),
            ports,
        });
    }

    fn detach_ports(&mut self, membrane: &MembraneId) -> usize {
        let owned = self.ports_of(membrane);
        for port_id in &owned {
            let Some(port) = self.ports.remove(port_id) else {
                continue;
            };
            for conn in port.get_connections().values() {
                if let Some(peer) = self.ports.get_mut(conn.peer_of(port_id)) {
                    let _ = peer.disconnect(&conn.id);
                }
            }
        }
        owned.len()
    }

    fn link(&mut self, a: &MembraneId, b: &MembraneId) {
        if a == b {
            return;
        }
        self.links.entry(a.clone()).or_default().insert(b.clone());
        self.links.entry(b.clone()).or_default().insert(a.clone());
    }

    fn unlink_unless_ported(&mut self, a: &MembraneId, b: &MembraneId) {
        let structural = [(a, b), (b, a)].iter().any(|(x, y)| {
            self.membranes
                .get(*x)
                .is_some_and(|m| m.parent.as_ref() == Some(*y))
        });
        if structural || self.port_linked(a, b) {
            return;
        }
        if let Some(set) = self.links.get_mut(a) {
            set.remove(b);
        }
        if let Some(set) = self.links.get_mut(b) {
            set.remove(a);
        }
    }

    fn port_linked(&self, a: &MembraneId, b: &MembraneId) -> bool {
        self.ports
            .values()
            .filter(|p| p.membrane_id() == a)
            .flat_map(|p| p.get_connections().values().map(move |c| c.peer_of(p.id())))
            .any(|peer| self.ports.get(peer).is_some_and(|p| p.membrane_id() == b))
    }

    pub(crate) fn replicate(
        &mut self,
        source: &MembraneId,
        target_parent: Option<&MembraneId>,
        replicate_children: bool,
    ) -> Result<ReplicationReport, SystemError> {
        if !self.membranes.contains_key(source) {
            return Err(SystemError::membrane_not_found(source));
        }
        if let Some(p) = target_parent {
            if !self.membranes.contains_key(p) {
                return Err(SystemError::membrane_not_found(p));
            }
        }
        let order = if replicate_children {
            self.subtree(source)
        } else {
            vec![source.clone()]
        };
        let snapshot: Vec<Membrane> = order
            .iter()
            .filter_map(|id| self.membranes.get(id).cloned())
            .collect();
        let Some((top, rest)) = snapshot.split_first() else {
            return Err(SystemError::membrane_not_found(source));
        };

        let name = Some(format!("{}-replica", top.name));
        let root = match target_parent {
            Some(parent) => self.create_child(parent, top.state.clone(), name, Some(top.boundary))?,
            None => self.spawn_root(top.state.clone(), name, top.boundary)?,
        };
        let mut mapping = BTreeMap::from([(top.id.clone(), root.clone())]);
        let mut report = ReplicationReport {
            source: source.clone(),
            root: root.clone(),
            replicas: vec![(top.id.clone(), root.clone())],
            failed: Vec::new(),
            skipped: Vec::new(),
        };
        for original in rest {
            let replica_parent = original.parent.as_ref().and_then(|p| mapping.get(p)).cloned();
            let Some(replica_parent) = replica_parent else {
                report.skipped.push(original.id.clone());
                continue;
            };
            match self.create_child(
                &replica_parent,
                original.state.clone(),
                Some(format!("{}-replica", original.name)),
                Some(original.boundary),
            ) {
                Ok(replica) => {
                    mapping.insert(original.id.clone(), replica.clone());
                    report.replicas.push((original.id.clone(), replica));
                }
                Err(err) => report.failed.push((original.id.clone(), err)),
            }
        }
        self.audit(
            EvolutionEventKind::MembraneReplicated,
            json!({
                "source": source,
                "root": root,
                "replicas": report.replicas.len(),
                "failed": report.failed.len(),
            }),
        );
        Ok(report)
    }

    pub(crate) fn add_port(&mut self, config: PortChannelConfig) -> Result<PortId, SystemError> {
        let membrane = self
            .membranes
            .get(&config.membrane_id)
            .ok_or_else(|| SystemError::membrane_not_found(&config.membrane_id))?;
        let port = self.build_port(config, membrane)?;
        let id = port.id().clone();
        self.ports.insert(id.clone(), port);
        Ok(id)
    }

    pub(crate) fn connect(
        &mut self,
        source: &PortId,
        target: &PortId,
        connection_type: ConnectionType,
    ) -> Result<ConnectionId, SystemError> {
        if source == target {
            return Err(PortError::SelfConnection(source.clone()).into());
        }
        let target_membrane = self
            .ports
            .get(target)
            .ok_or_else(|| SystemError::port_not_found(target))?
            .membrane_id()
            .clone();
        let mut src = self
            .ports
            .remove(source)
            .ok_or_else(|| SystemError::port_not_found(source))?;
        let outcome = self.connect_detached(&mut src, target, connection_type);
        let source_membrane = src.membrane_id().clone();
        self.ports.insert(source.clone(), src);
        let id = outcome?;
        self.link(&source_membrane, &target_membrane);
        self.debug_check();
        Ok(id)
    }

    fn connect_detached(
        &mut self,
        src: &mut PortChannel,
        target: &PortId,
        connection_type: ConnectionType,
    ) -> Result<ConnectionId, SystemError> {
        let membrane = self
            .membranes
            .get(src.membrane_id())
            .ok_or_else(|| SystemError::membrane_not_found(src.membrane_id()))?;
        if !membrane.active {
            return Err(PortError::MembraneInactive(membrane.id.clone()).into());
        }
        let boundary = membrane.boundary;
        let tgt = self
            .ports
            .get_mut(target)
            .ok_or_else(|| SystemError::port_not_found(target))?;
        Ok(src.connect_to_port(tgt, &boundary, connection_type)?)
    }

    pub(crate) fn disconnect(&mut self, port: &PortId, id: &ConnectionId) -> Result<(), SystemError> {
        let owner = self
            .ports
            .get_mut(port)
            .ok_or_else(|| SystemError::port_not_found(port))?;
        let conn = owner.disconnect(id)?;
        let owner_membrane = owner.membrane_id().clone();
        let peer = conn.peer_of(port).clone();
        let mut peer_membrane = None;
        if let Some(p) = self.ports.get_mut(&peer) {
            let _ = p.disconnect(id);
            peer_membrane = Some(p.membrane_id().clone());
        }
        if let Some(peer_membrane) = peer_membrane {
            self.unlink_unless_ported(&owner_membrane, &peer_membrane);
        }
        self.sink.emit(SystemEvent::PortsDisconnected {
            connection: id.clone(),
        });
        self.debug_check();
        Ok(())
    }

    pub(crate) fn prepare_send(
        &mut self,
        port: &PortId,
        outbound: Outbound,
        connection: Option<&ConnectionId>,
    ) -> Result<Dispatch, SystemError> {
        let sender = self
            .ports
            .get_mut(port)
            .ok_or_else(|| SystemError::port_not_found(port))?;
        let owner = sender.membrane_id().clone();
        if !self.membranes.get(&owner).is_some_and(|m| m.active) {
            return Err(PortError::MembraneInactive(owner).into());
        }
        let dispatch = sender.prepare_send(outbound, connection)?;
        if let Some(m) = self.membranes.get_mut(&owner) {
            m.metrics.messages_sent += 1;
            m.touch(dispatch.message.timestamp_ms);
        }
        Ok(dispatch)
    }

    pub(crate) fn deliver(&mut self, delivery: &Delivery) -> Result<MessageId, SystemError> {
        let outcome = self.receive(delivery);
        let bytes = delivery.message.content_size;
        if let Some(sender) = self.ports.get_mut(&delivery.source_port) {
            sender.record_delivery(&delivery.connection, bytes, outcome.is_ok());
        }
        outcome
    }

    fn receive(&mut self, delivery: &Delivery) -> Result<MessageId, SystemError> {
        let receiver = self
            .ports
            .get_mut(&delivery.target_port)
            .ok_or_else(|| SystemError::port_not_found(&delivery.target_port))?;
        let owner = receiver.membrane_id().clone();
        if !self.membranes.get(&owner).is_some_and(|m| m.active) {
            return Err(PortError::MembraneInactive(owner).into());
        }
        let id = receiver.receive_message(delivery.message.clone())?;
        if let Some(m) = self.membranes.get_mut(&owner) {
            m.metrics.messages_received += 1;
            m.touch(membrane_spec::now_ms());
        }
        Ok(id)
    }

    pub(crate) fn debug_check(&self) {
        #[cfg(debug_assertions)]
        if let Err(violation) = self.check_invariants() {
            panic!("{violation}");
        }
    }

    pub(crate) fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let fail = |msg: String| Err(InvariantViolation(msg));
        if self.membranes.len() > self.config.max_membranes {
            return fail(format!(
                "{} membranes exceed the limit of {}",
                self.membranes.len(),
                self.config.max_membranes
            ));
        }
        for (id, m) in &self.membranes {
            if &m.id != id {
                return fail(format!("membrane {} indexed under {id}", m.id));
            }
            match &m.parent {
                Some(p) => {
                    let Some(parent) = self.membranes.get(p) else {
                        return fail(format!("{id} points at missing parent {p}"));
                    };
                    if !parent.children.contains(id) {
                        return fail(format!("{p} does not list its child {id}"));
                    }
                    if m.depth != parent.depth + 1 {
                        return fail(format!("{id} at depth {} under {p} at {}", m.depth, parent.depth));
                    }
                }
                None if m.depth != 0 => return fail(format!("root {id} at depth {}", m.depth)),
                None => {}
            }
            let unique: BTreeSet<_> = m.children.iter().collect();
            if unique.len() != m.children.len() {
                return fail(format!("{id} lists a child twice"));
            }
            for child in &m.children {
                if self.membranes.get(child).and_then(|c| c.parent.as_ref()) != Some(id) {
                    return fail(format!("{id} lists {child} which does not point back"));
                }
            }
        }
        for (id, port) in &self.ports {
            if !self.membranes.contains_key(port.membrane_id()) {
                return fail(format!("port {id} outlived membrane {}", port.membrane_id()));
            }
            if port.buffered() > port.capacity() {
                return fail(format!("port {id} buffers beyond capacity"));
            }
            for conn in port.get_connections().values() {
                let peer = conn.peer_of(id);
                if !self
                    .ports
                    .get(peer)
                    .is_some_and(|p| p.connection(&conn.id).is_some())
                {
                    return fail(format!("connection {} missing on {peer}", conn.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use membrane_spec::{BoundaryPolicy, MessagePayload, CONTROL, TENSOR_OUTPUT};
    use rand_core::OsRng;

    fn system(max_membranes: usize) -> PSystem {
        PSystem::new(PSystemConfig {
            id: "t".into(),
            max_membranes,
            max_depth: 4,
            ..PSystemConfig::default()
        })
        .unwrap()
    }

    fn root(sys: &PSystem, id: &str) -> MembraneId {
        sys.add_root_membrane(Membrane::new(id, id, MembraneState::default(), Boundary::default()))
            .unwrap()
    }

    fn child(sys: &PSystem, parent: &MembraneId) -> MembraneId {
        sys.create_child_membrane(parent, MembraneState::default(), None, None)
            .unwrap()
    }

    #[test]
    fn admission_provisions_default_ports() {
        let sys = system(10);
        let r = root(&sys, "r");
        let ports = sys.ports_of(&r);
        assert_eq!(
            ports,
            vec![
                PortId::from("r/control"),
                PortId::from("r/tensor-input"),
                PortId::from("r/tensor-output"),
            ]
        );
        assert!(sys.port(&"r/control".into()).unwrap().is_attached());
        assert!(!sys.is_running());
    }

    #[test]
    fn child_ids_are_generated_per_system() {
        let sys = system(10);
        let r = root(&sys, "r");
        let c = child(&sys, &r);
        assert_eq!(c.as_str(), "t-m1");
        assert_eq!(sys.membrane(&c).unwrap().depth(), 1);
        assert_eq!(sys.membrane(&r).unwrap().children(), &[c]);
    }

    #[test]
    fn duplicate_and_non_root_admissions_rejected() {
        let sys = system(10);
        root(&sys, "r");
        let again = Membrane::new("r", "r", MembraneState::default(), Boundary::default());
        assert!(matches!(
            sys.add_root_membrane(again),
            Err(SystemError::DuplicateId { kind: "membrane", .. })
        ));
        let mut parent = Membrane::new("p", "p", MembraneState::default(), Boundary::default());
        let mut kid = Membrane::new("k", "k", MembraneState::default(), Boundary::default());
        parent.add_child_membrane(&mut kid).unwrap();
        assert_eq!(sys.add_root_membrane(kid), Err(SystemError::NotRoot("k".into())));
    }

    #[test]
    fn depth_limit_leaves_no_trace() {
        let sys = system(10);
        let mut last = root(&sys, "r");
        for _ in 0..3 {
            last = child(&sys, &last);
        }
        let ports = sys.get_statistics().total_ports;
        let err = sys
            .create_child_membrane(&last, MembraneState::default(), None, None)
            .unwrap_err();
        assert_eq!(err, SystemError::CapacityExceeded { limit: Limit::Depth, max: 4 });
        assert_eq!(sys.membrane_count(), 4);
        assert_eq!(sys.get_statistics().total_ports, ports);
    }

    #[test]
    fn dissolve_requires_disposition_of_children() {
        let sys = system(10);
        let r = root(&sys, "r");
        let c = child(&sys, &r);
        child(&sys, &c);
        assert_eq!(sys.dissolve_membrane(&c, false), Err(SystemError::HasChildren(c.clone())));
        assert_eq!(sys.dissolve_membrane_recursive(&c), Ok(2));
        assert_eq!(sys.membrane_count(), 1);
        assert_eq!(sys.get_statistics().membrane_dissolutions, 2);
        assert!(sys.ports_of(&c).is_empty());
    }

    #[test]
    fn dissolve_unknown_changes_nothing() {
        let sys = system(10);
        root(&sys, "r");
        assert!(matches!(
            sys.dissolve_membrane(&"ghost".into(), true),
            Err(SystemError::NotFound { kind: "membrane", .. })
        ));
        assert_eq!(sys.get_statistics().membrane_dissolutions, 0);
    }

    #[test]
    fn dissolving_a_root_promotes_children() {
        let sys = system(10);
        let r = root(&sys, "r");
        let a = child(&sys, &r);
        let b = child(&sys, &a);
        sys.dissolve_membrane(&r, true).unwrap();
        let a = sys.membrane(&a).unwrap();
        assert!(a.is_root());
        assert_eq!(a.depth(), 0);
        assert_eq!(sys.membrane(&b).unwrap().depth(), 1);
        sys.verify_invariants().unwrap();
    }

    #[test]
    fn dissolution_detaches_peer_connections() {
        let sys = system(10);
        let a = root(&sys, "a");
        let b = root(&sys, "b");
        let conn = sys
            .connect_ports(&"a/tensor-output".into(), &"b/tensor-input".into(), ConnectionType::Direct)
            .unwrap();
        assert_eq!(sys.get_statistics().total_connections, 1);
        sys.dissolve_membrane(&b, false).unwrap();
        assert!(sys.port(&"a/tensor-output".into()).unwrap().connection(&conn).is_none());
        assert_eq!(sys.get_statistics().total_connections, 0);
        assert!(sys.membrane(&a).is_some());
    }

    #[test]
    fn replication_copies_subtree_shape_and_state() {
        let sys = system(20);
        let r = root(&sys, "r");
        let src = sys
            .create_child_membrane(&r, MembraneState::new(vec![1.0, 2.0], vec![2], "k", "dense"), Some("src"), None)
            .unwrap();
        let a = child(&sys, &src);
        child(&sys, &src);
        child(&sys, &a);

        let report = sys.replicate_membrane(&src, Some(&r), true).unwrap();
        assert_eq!(report.replicas.len(), 4);
        assert!(report.failed.is_empty());
        let replica = sys.membrane(&report.root).unwrap();
        assert_eq!(replica.name(), "src-replica");
        assert_eq!(replica.children().len(), 2);
        assert_eq!(replica.state(), sys.membrane(&src).unwrap().state());

        sys.update_membrane_state(&report.root, |s| s.tensor_data[0] = 9.0).unwrap();
        assert_eq!(sys.membrane(&src).unwrap().state().tensor_data[0], 1.0);
    }

    #[test]
    fn replication_under_own_descendant_terminates() {
        let sys = system(20);
        let r = root(&sys, "r");
        let c = child(&sys, &r);
        let report = sys.replicate_membrane(&r, Some(&c), true).unwrap();
        assert_eq!(report.replicas.len(), 2);
        sys.verify_invariants().unwrap();
    }

    #[test]
    fn partial_replication_is_kept() {
        let sys = system(4);
        let r = root(&sys, "r");
        let a = child(&sys, &r);
        child(&sys, &a);
        let report = sys.replicate_membrane(&a, Some(&r), true).unwrap();
        assert_eq!(report.replicas.len(), 1);
        assert!(matches!(
            report.failed[0].1,
            SystemError::CapacityExceeded { limit: Limit::Membranes, .. }
        ));
        assert_eq!(sys.membrane_count(), 4);
    }

    #[test]
    fn closed_boundary_blocks_connections() {
        let sys = system(10);
        sys.add_root_membrane(Membrane::new(
            "a",
            "a",
            MembraneState::default(),
            Boundary::new(BoundaryPolicy::Closed),
        ))
        .unwrap();
        root(&sys, "b");
        let err = sys
            .connect_ports(&"a/tensor-output".into(), &"b/tensor-input".into(), ConnectionType::Direct)
            .unwrap_err();
        assert_eq!(err, SystemError::Port(PortError::BoundaryDenied("a".into())));
        assert!(sys.port(&"a/tensor-output".into()).is_some());
    }

    #[test]
    fn send_delivers_and_counts() {
        let sys = system(10);
        let a = root(&sys, "a");
        let b = root(&sys, "b");
        let conn = sys
            .connect_ports(&"a/tensor-output".into(), &"b/tensor-input".into(), ConnectionType::Direct)
            .unwrap();
        let report = sys
            .send_message(
                &"a/tensor-output".into(),
                MessagePayload::tensor(&[1.0, 2.0, 3.0, 4.0], vec![4]).into(),
                None,
            )
            .unwrap();
        assert_eq!(report.delivered, vec![conn.clone()]);
        let out = sys.port(&"a/tensor-output".into()).unwrap();
        assert_eq!(out.connection(&conn).unwrap().total_bytes, 8);
        assert_eq!(sys.membrane(&a).unwrap().performance_metrics().messages_sent, 1);
        assert_eq!(sys.membrane(&b).unwrap().performance_metrics().messages_received, 1);
        let msg = sys.take_message(&"b/tensor-input".into()).unwrap().unwrap();
        assert_eq!(msg.hop_count, 1);
        assert_eq!(msg.transformations[0].kind, "compression");
    }

    #[test]
    fn partial_delivery_reports_failure() {
        let sys = PSystem::new(PSystemConfig {
            default_buffer_size: 1,
            ..PSystemConfig::default()
        })
        .unwrap();
        root(&sys, "a");
        root(&sys, "b");
        root(&sys, "c");
        let out = PortId::from("a/tensor-output");
        sys.connect_ports(&out, &"b/tensor-input".into(), ConnectionType::Multicast)
            .unwrap();
        sys.connect_ports(&out, &"c/tensor-input".into(), ConnectionType::Multicast)
            .unwrap();
        let payload = || -> Outbound { MessagePayload::tensor(&[1.0], vec![1]).into() };
        sys.send_message(&out, payload(), None).unwrap();
        sys.take_message(&"b/tensor-input".into()).unwrap();
        assert_eq!(
            sys.send_message(&out, payload(), None),
            Err(SystemError::Port(PortError::DeliveryFailed { delivered: 1, failed: 1 }))
        );
        assert_eq!(sys.port(&"b/tensor-input".into()).unwrap().buffered(), 1);
        let conn = ConnectionId::between(&out, &"c/tensor-input".into());
        assert_eq!(sys.port(&out).unwrap().connection(&conn).unwrap().error_count, 1);
    }

    #[test]
    fn disconnect_removes_both_copies() {
        let sys = system(10);
        let r = root(&sys, "r");
        let c = child(&sys, &r);
        let out = PortId::for_membrane(&r, membrane_spec::TENSOR_OUTPUT);
        let inp = PortId::for_membrane(&c, membrane_spec::TENSOR_INPUT);
        let conn = sys.connect_ports(&out, &inp, ConnectionType::Direct).unwrap();
        assert_eq!(sys.get_statistics().total_connections, 1);
        sys.disconnect_port(&inp, &conn).unwrap();
        assert!(sys.port(&out).unwrap().get_connections().is_empty());
        assert_eq!(sys.get_statistics().total_connections, 1, "parent link stays");
    }

    #[test]
    fn control_port_routes_only_toward_receivers() {
        let sys = system(10);
        let a = root(&sys, "a");
        let b = root(&sys, "b");
        let control = PortId::for_membrane(&b, CONTROL);
        let a_out = PortId::for_membrane(&a, TENSOR_OUTPUT);
        let a_in = PortId::for_membrane(&a, TENSOR_INPUT);

        let from_output = sys.connect_ports(&a_out, &control, ConnectionType::Direct).unwrap();
        let from_input = sys.connect_ports(&a_in, &control, ConnectionType::Direct).unwrap();
        let port = sys.port(&control).unwrap();
        let (o, i) = (
            port.connection(&from_output).unwrap(),
            port.connection(&from_input).unwrap(),
        );
        assert!(o.forward && !o.mirrored);
        assert!(!i.forward && i.mirrored);

        let key = SigningKey::generate(&mut OsRng);
        let signed = Outbound::signed(MessagePayload::tensor(&[1.0, 2.0], vec![2]), &key);
        let report = sys.send_message(&control, signed, None).unwrap();
        assert_eq!(report.delivered, vec![from_input]);
        let arrived = sys.take_message(&a_in).unwrap().unwrap();
        assert!(arrived.encrypted);
        assert_eq!(arrived.source_port, control);
    }

    #[test]
    fn forged_control_message_is_refused() {
        let sys = system(10);
        let a = root(&sys, "a");
        let b = root(&sys, "b");
        let a_out = PortId::for_membrane(&a, TENSOR_OUTPUT);
        let control = PortId::for_membrane(&b, CONTROL);
        let connection = sys.connect_ports(&a_out, &control, ConnectionType::Direct).unwrap();
        let key = SigningKey::generate(&mut OsRng);
        let genuine = PortMessage::build(
            "a#1".into(),
            a_out.clone(),
            Outbound::signed(MessagePayload::control(b"scale up".to_vec()), &key),
            0,
        );
        let delivery = |message: PortMessage| Delivery {
            source_port: a_out.clone(),
            connection: connection.clone(),
            target_port: control.clone(),
            message,
        };

        let mut forged = genuine.clone();
        forged.id = "a#2".into();
        forged.payload.content = bytes::Bytes::from_static(b"dissolve everything");
        forged.transformations.push(membrane_spec::TransformationRecord {
            rule_id: "default-compression".into(),
            kind: "compression".into(),
            size_before: 8,
            size_after: 4,
            at_ms: 0,
        });
        assert!(matches!(
            sys.deliver(&delivery(forged)),
            Err(SystemError::Port(PortError::ValidationFailed { .. }))
        ));
        assert_eq!(sys.port(&control).unwrap().buffered(), 0);

        sys.deliver(&delivery(genuine)).unwrap();
        assert_eq!(sys.port(&control).unwrap().buffered(), 1);
    }

    #[test]
    fn reshaped_state_updates_input_validation() {
        let sys = system(10);
        let src = root(&sys, "src");
        let dst = sys
            .add_root_membrane(Membrane::new(
                "dst",
                "dst",
                MembraneState::new(vec![0.0; 2], vec![2], "k", "dense"),
                Boundary::default(),
            ))
            .unwrap();
        let out = PortId::for_membrane(&src, TENSOR_OUTPUT);
        let input = PortId::for_membrane(&dst, TENSOR_INPUT);
        sys.connect_ports(&out, &input, ConnectionType::Direct).unwrap();
        let tensor = |n: usize| -> Outbound { MessagePayload::tensor(&vec![1.0; n], vec![n]).into() };

        assert!(sys.send_message(&out, tensor(3), None).is_err());
        sys.update_membrane_state(&dst, |s| {
            s.tensor_data = vec![0.0; 3];
            s.shape = vec![3];
        })
        .unwrap();
        sys.send_message(&out, tensor(3), None).unwrap();
        assert!(sys.send_message(&out, tensor(2), None).is_err());
        let port = sys.port(&input).unwrap();
        assert_eq!(port.config().tensor_shape, Some(vec![3]));
        assert_eq!(port.buffered(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let sys = system(2000);
        let r = root(&sys, "r");
        for _ in 0..HISTORY_CAPACITY {
            child(&sys, &r);
        }
        let history = sys.evolution_history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].details["id"], "t-m1");
    }

    #[test]
    fn overlapping_cycles_are_refused() {
        let sys = system(10);
        sys.start();
        let guard = sys.cycle_guard.lock();
        assert_eq!(sys.execute_evolution_cycle(), Err(SystemError::EvolutionInProgress));
        drop(guard);
        assert_eq!(sys.execute_evolution_cycle().unwrap().cycle, 1);
    }
}
