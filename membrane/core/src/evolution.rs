//! Rule engine: condition evaluation, membrane selection and structural
//! actions run by one evolution cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use membrane_spec::{
    Boundary, ComputationalComplexity, ConnectionType, CreationPolicy, DistributionStrategy,
    EvolutionEventKind, MembraneId, MembraneSelector, MembraneState, PortId, PortStatus,
    ResourceKind, RuleAction, RuleCondition, RuleId, TENSOR_INPUT, TENSOR_OUTPUT,
};

use crate::error::SystemError;
use crate::events::SystemEvent;
use crate::membrane::Membrane;
use crate::system::SystemState;

/// What one evolution cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Completed cycles after this one.
    pub cycle: u64,
    /// The system was stopped; nothing ran.
    pub skipped: bool,
    /// Eligible rules whose conditions were evaluated.
    pub evaluated: usize,
    /// Rules whose conditions held and whose actions all succeeded.
    pub fired: usize,
    /// Rules whose conditions held but an action failed.
    pub failed: usize,
    /// Queued creations materialised at cycle start.
    pub materialized: usize,
}

/// A condition resolved against the live system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionSubject {
    /// Value compared by `eq` through `ge` and `in`.
    pub scalar: f64,
    /// Values searched by `contains`.
    pub members: Vec<f64>,
}

/// Rule-driven creation waiting for materialisation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingCreation {
    pub(crate) parent: MembraneId,
    pub(crate) name: Option<String>,
    pub(crate) boundary: Option<Boundary>,
    pub(crate) state: Option<MembraneState>,
    pub(crate) rule: RuleId,
}

impl SystemState {
    pub(crate) fn run_cycle(&mut self) -> CycleReport {
        if !self.running {
            return CycleReport {
                cycle: self.counters.evolution_cycles,
                skipped: true,
                ..CycleReport::default()
            };
        }
        let mut report = CycleReport::default();
        if self.config.membrane_creation_policy == CreationPolicy::Lazy {
            report.materialized = self.flush_pending().len();
        }

        let mut order: Vec<(i32, RuleId)> = self
            .rules
            .values()
            .filter(|r| r.is_eligible())
            .map(|r| (r.priority, r.id.clone()))
            .collect();
        order.sort();

        for (_, id) in order {
            let Some(rule) = self.rules.get(&id).cloned() else {
                continue;
            };
            report.evaluated += 1;
            if !rule.conditions.iter().all(|c| self.condition_holds(c)) {
                continue;
            }
            let mut failures = Vec::new();
            for action in &rule.actions {
                if let Err(err) = self.execute_action(action, &rule.id) {
                    failures.push(format!("{}: {err}", action.label()));
                }
            }
            if failures.is_empty() {
                if let Some(stored) = self.rules.get_mut(&id) {
                    stored.execution_count += 1;
                }
                self.counters.rules_executed += 1;
                report.fired += 1;
                self.audit(
                    EvolutionEventKind::RuleExecuted,
                    json!({ "rule": id, "actions": rule.actions.len() }),
                );
                self.sink.emit(SystemEvent::RuleExecuted {
                    rule: id,
                    actions: rule.actions.len(),
                });
            } else {
                report.failed += 1;
                self.audit(
                    EvolutionEventKind::RuleFailed,
                    json!({ "rule": id, "failures": failures }),
                );
                self.sink.emit(SystemEvent::RuleFailed { rule: id, failures });
            }
        }

        self.counters.evolution_cycles += 1;
        self.counters.complexity = ComputationalComplexity::classify(
            self.max_depth(),
            self.membranes.len(),
            self.link_count(),
        );
        report.cycle = self.counters.evolution_cycles;
        self.audit(
            EvolutionEventKind::CycleCompleted,
            json!({
                "cycle": report.cycle,
                "fired": report.fired,
                "failed": report.failed,
                "complexity": self.counters.complexity.label(),
            }),
        );
        self.sink.emit(SystemEvent::CycleCompleted {
            cycle: report.cycle,
            fired: report.fired,
            failed: report.failed,
        });
        self.debug_check();
        report
    }

    pub(crate) fn condition_holds(&self, condition: &RuleCondition) -> bool {
        let subject = self.subject(condition);
        condition.comparison().holds(subject.scalar, &subject.members)
    }

    pub(crate) fn subject(&self, condition: &RuleCondition) -> ConditionSubject {
        let active = || self.membranes.values().filter(|m| m.active);
        match condition {
            RuleCondition::MembraneCount { .. } => ConditionSubject {
                scalar: active().count() as f64,
                members: Vec::new(),
            },
            RuleCondition::Depth { .. } => {
                let members: Vec<f64> = active().map(|m| m.depth as f64).collect();
                ConditionSubject {
                    scalar: members.iter().copied().fold(0.0, f64::max),
                    members,
                }
            }
            RuleCondition::Load { .. } => {
                let members: Vec<f64> = active().map(|m| self.membrane_load(&m.id)).collect();
                ConditionSubject {
                    scalar: mean(&members),
                    members,
                }
            }
            RuleCondition::Connectivity { .. } => ConditionSubject {
                scalar: self.link_count() as f64,
                members: self.links.values().map(|n| n.len() as f64).collect(),
            },
            RuleCondition::Time { .. } => ConditionSubject {
                scalar: self.uptime_ms() as f64 / 1000.0,
                members: Vec::new(),
            },
            RuleCondition::Resource { resource, .. } => {
                let members: Vec<f64> = active()
                    .map(|m| match resource {
                        ResourceKind::Memory => m.metrics.memory_usage as f64,
                        ResourceKind::BufferedMessages => self.buffered_messages(&m.id) as f64,
                        ResourceKind::Ports => self.ports_of(&m.id).len() as f64,
                    })
                    .collect();
                ConditionSubject {
                    scalar: members.iter().sum(),
                    members,
                }
            }
        }
    }

    fn execute_action(&mut self, action: &RuleAction, rule: &RuleId) -> Result<(), SystemError> {
        match action {
            RuleAction::CreateMembrane {
                parent,
                name,
                boundary,
                state,
            } => {
                let pending = PendingCreation {
                    parent: self.select(parent, true)?,
                    name: name.clone(),
                    boundary: *boundary,
                    state: state.clone(),
                    rule: rule.clone(),
                };
                match self.config.membrane_creation_policy {
                    CreationPolicy::Eager => self.materialize(pending).map(|_| ()),
                    CreationPolicy::Lazy | CreationPolicy::OnDemand => {
                        self.pending.push_back(pending);
                        Ok(())
                    }
                }
            }
            RuleAction::DissolveMembrane {
                target,
                redistribute_children,
                recursive,
            } => {
                let id = self.select(target, false)?;
                if *recursive && !*redistribute_children {
                    self.dissolve_recursive(&id).map(|_| ())
                } else {
                    self.dissolve(&id, *redistribute_children)
                }
            }
            RuleAction::ReplicateMembrane {
                source,
                target_parent,
                replicate_children,
            } => {
                let source = self.select(source, false)?;
                let parent = match target_parent {
                    Some(selector) => Some(self.select(selector, true)?),
                    None => self.membranes.get(&source).and_then(|m| m.parent.clone()),
                };
                for _ in 0..self.config.replication_factor {
                    let report = self.replicate(&source, parent.as_ref(), *replicate_children)?;
                    let refused = report.failed.len() + report.skipped.len();
                    if refused > 0 {
                        return Err(SystemError::PartialReplication {
                            membrane: source,
                            refused,
                        });
                    }
                }
                Ok(())
            }
            RuleAction::BalanceLoad => self.balance_load(),
            RuleAction::Failover => self.failover(),
            RuleAction::ConnectMembranes { source, target } => {
                let source = self.select(source, false)?;
                let target = self.select(target, false)?;
                self.connect(
                    &PortId::for_membrane(&source, TENSOR_OUTPUT),
                    &PortId::for_membrane(&target, TENSOR_INPUT),
                    ConnectionType::Direct,
                )
                .map(|_| ())
            }
        }
    }

    /// Pick a membrane. With `as_parent`, only membranes that can take
    /// another level of children qualify.
    pub(crate) fn select(
        &self,
        selector: &MembraneSelector,
        as_parent: bool,
    ) -> Result<MembraneId, SystemError> {
        if let MembraneSelector::Id(id) = selector {
            return if self.membranes.contains_key(id) {
                Ok(id.clone())
            } else {
                Err(SystemError::membrane_not_found(id))
            };
        }
        let max_depth = self.config.max_depth;
        let candidates: Vec<&Membrane> = self
            .membranes
            .values()
            .filter(|m| m.active && (!as_parent || m.depth + 1 < max_depth))
            .collect();
        let load = |m: &Membrane| self.membrane_load(&m.id);
        let older = |a: &Membrane, b: &Membrane| a.created_seq.cmp(&b.created_seq);
        let chosen = match selector {
            MembraneSelector::Id(_) => None,
            MembraneSelector::Strategy => match self.config.distribution_strategy {
                DistributionStrategy::BreadthFirst => candidates
                    .into_iter()
                    .min_by_key(|m| (m.depth, m.children.len(), m.created_seq)),
                DistributionStrategy::DepthFirst => {
                    candidates.into_iter().max_by_key(|m| (m.depth, m.created_seq))
                }
                DistributionStrategy::Balanced => candidates
                    .into_iter()
                    .min_by_key(|m| (m.children.len(), m.depth, m.created_seq)),
                DistributionStrategy::LoadAware => candidates.into_iter().min_by(|a, b| {
                    load(a)
                        .total_cmp(&load(b))
                        .then(a.children.len().cmp(&b.children.len()))
                        .then(older(a, b))
                }),
            },
            MembraneSelector::MostLoaded => candidates.into_iter().min_by(|a, b| {
                load(b).total_cmp(&load(a)).then(older(a, b))
            }),
            MembraneSelector::LeastLoaded => candidates
                .into_iter()
                .min_by(|a, b| load(a).total_cmp(&load(b)).then(older(a, b))),
            MembraneSelector::Deepest => candidates
                .into_iter()
                .max_by_key(|m| (m.depth, m.created_seq)),
            MembraneSelector::FirstRoot => candidates
                .into_iter()
                .filter(|m| m.is_root())
                .min_by_key(|m| m.created_seq),
        };
        chosen
            .map(|m| m.id.clone())
            .ok_or_else(|| SystemError::NoCandidate(format!("{selector:?}")))
    }

    fn materialize(&mut self, pending: PendingCreation) -> Result<MembraneId, SystemError> {
        let state = match pending.state {
            Some(state) => state,
            None => self
                .membranes
                .get(&pending.parent)
                .map(|p| p.state.zeros_like())
                .ok_or_else(|| SystemError::membrane_not_found(&pending.parent))?,
        };
        self.create_child(&pending.parent, state, pending.name, pending.boundary)
    }

    pub(crate) fn flush_pending(&mut self) -> Vec<MembraneId> {
        let mut created = Vec::new();
        while let Some(pending) = self.pending.pop_front() {
            let rule = pending.rule.clone();
            match self.materialize(pending) {
                Ok(id) => created.push(id),
                Err(err) => {
                    let failures = vec![format!("create_membrane: {err}")];
                    self.audit(
                        EvolutionEventKind::RuleFailed,
                        json!({ "rule": rule, "failures": failures }),
                    );
                    self.sink.emit(SystemEvent::RuleFailed { rule, failures });
                }
            }
        }
        created
    }

    /// Move half the difference between the fullest and emptiest tensor
    /// input, newest messages first, keeping their order.
    fn balance_load(&mut self) -> Result<(), SystemError> {
        if !self.config.enable_load_balancing {
            return Err(SystemError::FeatureDisabled("load balancing"));
        }
        let inputs: Vec<(PortId, MembraneId, usize, u64)> = self
            .membranes
            .values()
            .filter(|m| m.active)
            .filter_map(|m| {
                let id = PortId::for_membrane(&m.id, TENSOR_INPUT);
                let port = self.ports.get(&id)?;
                (port.status() == PortStatus::Active)
                    .then(|| (id, m.id.clone(), port.buffered(), m.created_seq))
            })
            .collect();
        let (Some(most), Some(least)) = (
            inputs.iter().max_by(|a, b| a.2.cmp(&b.2).then(b.3.cmp(&a.3))),
            inputs.iter().min_by(|a, b| a.2.cmp(&b.2).then(a.3.cmp(&b.3))),
        ) else {
            return Ok(());
        };
        if most.0 == least.0 || most.2 <= least.2 + 1 {
            return Ok(());
        }
        let surplus = (most.2 - least.2) / 2;
        let (from_port, from) = (most.0.clone(), most.1.clone());
        let (to_port, to) = (least.0.clone(), least.1.clone());

        let taken = match self.ports.get_mut(&from_port) {
            Some(port) => port.split_tail(surplus),
            None => return Ok(()),
        };
        let rest = match self.ports.get_mut(&to_port) {
            Some(port) => port.absorb(taken),
            None => taken,
        };
        let moved = surplus - rest.len();
        if let Some(port) = self.ports.get_mut(&from_port) {
            port.absorb(rest);
        }
        if moved == 0 {
            return Ok(());
        }
        self.counters.load_balances += 1;
        self.audit(
            EvolutionEventKind::LoadBalanced,
            json!({ "from": from, "to": to, "moved": moved }),
        );
        self.sink.emit(SystemEvent::LoadBalanced { from, to, moved });
        Ok(())
    }

    /// Replace every membrane that owns a faulted port with a fresh replica
    /// beside it; the faulted ports hand over their buffers and go to
    /// maintenance.
    fn failover(&mut self) -> Result<(), SystemError> {
        if !self.config.enable_failover {
            return Err(SystemError::FeatureDisabled("failover"));
        }
        let mut faulted: BTreeMap<MembraneId, Vec<PortId>> = BTreeMap::new();
        for port in self.ports.values() {
            if port.status() == PortStatus::Error {
                faulted
                    .entry(port.membrane_id().clone())
                    .or_default()
                    .push(port.id().clone());
            }
        }
        let mut first_error = None;
        for (membrane, failed_ports) in faulted {
            let parent = self.membranes.get(&membrane).and_then(|m| m.parent.clone());
            let replica = match self.replicate(&membrane, parent.as_ref(), false) {
                Ok(report) => report.root,
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            let prefix = format!("{membrane}/");
            for port_id in failed_ports {
                let Some(port) = self.ports.get_mut(&port_id) else {
                    continue;
                };
                let messages = port.split_tail(port.buffered());
                port.set_status(PortStatus::Maintenance);
                let target = port_id
                    .as_str()
                    .strip_prefix(&prefix)
                    .map(|suffix| PortId::for_membrane(&replica, suffix));
                let rest = match target.and_then(|t| self.ports.get_mut(&t)) {
                    Some(replica_port) => replica_port.absorb(messages),
                    None => messages,
                };
                if let Some(port) = self.ports.get_mut(&port_id) {
                    port.absorb(rest);
                }
            }
            self.counters.failovers += 1;
            self.audit(
                EvolutionEventKind::Failover,
                json!({ "failed": membrane, "replica": replica }),
            );
            self.sink.emit(SystemEvent::FailedOver {
                failed: membrane,
                replica,
            });
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
