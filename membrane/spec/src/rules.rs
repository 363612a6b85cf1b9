//! Evolution rules: conjunctive conditions over system metrics and ordered
//! structural actions, both as closed tagged unions.

use serde::{Deserialize, Serialize};

use crate::boundary::Boundary;
use crate::ids::{MembraneId, RuleId};
use crate::state::MembraneState;

/// Tolerance used by `eq`, `ne`, `in` and `contains`.
pub const COMPARISON_EPSILON: f64 = 1e-9;

/// Advisory rule category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Grows the hierarchy.
    #[default]
    Creation,
    /// Shrinks the hierarchy.
    Dissolution,
    /// Rewrites state or load.
    Transformation,
    /// Wires membranes together.
    Communication,
    /// Copies membranes.
    Replication,
}

/// Comparison applied to a resolved condition subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Comparison {
    /// scalar == value
    Eq(f64),
    /// scalar != value
    Ne(f64),
    /// scalar < value
    Lt(f64),
    /// scalar <= value
    Le(f64),
    /// scalar > value
    Gt(f64),
    /// scalar >= value
    Ge(f64),
    /// scalar is one of the listed values
    In(Vec<f64>),
    /// some member equals value
    Contains(f64),
}

impl Comparison {
    /// Evaluate against a scalar and its member values.
    pub fn holds(&self, scalar: f64, members: &[f64]) -> bool {
        let eq = |a: f64, b: f64| (a - b).abs() <= COMPARISON_EPSILON;
        match self {
            Comparison::Eq(v) => eq(scalar, *v),
            Comparison::Ne(v) => !eq(scalar, *v),
            Comparison::Lt(v) => scalar < *v,
            Comparison::Le(v) => scalar <= *v,
            Comparison::Gt(v) => scalar > *v,
            Comparison::Ge(v) => scalar >= *v,
            Comparison::In(set) => set.iter().any(|v| eq(scalar, *v)),
            Comparison::Contains(v) => members.iter().any(|m| eq(*m, *v)),
        }
    }
}

/// Resource measured by a `resource` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Bytes of membrane state.
    Memory,
    /// Messages sitting in port buffers.
    BufferedMessages,
    /// Registered ports.
    Ports,
}

/// A rule condition. All conditions of a rule must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Active membrane count.
    MembraneCount {
        /// Test.
        comparison: Comparison,
    },
    /// Maximum membrane depth; members are every membrane's depth.
    Depth {
        /// Test.
        comparison: Comparison,
    },
    /// Mean buffer utilisation; members are per-membrane loads.
    Load {
        /// Test.
        comparison: Comparison,
    },
    /// Membrane-level connection count; members are degrees.
    Connectivity {
        /// Test.
        comparison: Comparison,
    },
    /// Uptime in seconds.
    Time {
        /// Test.
        comparison: Comparison,
    },
    /// Total of a resource; members are per-membrane totals.
    Resource {
        /// Measured resource.
        resource: ResourceKind,
        /// Test.
        comparison: Comparison,
    },
}

impl RuleCondition {
    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            RuleCondition::MembraneCount { .. } => "membrane_count",
            RuleCondition::Depth { .. } => "depth",
            RuleCondition::Load { .. } => "load",
            RuleCondition::Connectivity { .. } => "connectivity",
            RuleCondition::Time { .. } => "time",
            RuleCondition::Resource { .. } => "resource",
        }
    }

    /// The comparison this condition applies.
    pub fn comparison(&self) -> &Comparison {
        match self {
            RuleCondition::MembraneCount { comparison }
            | RuleCondition::Depth { comparison }
            | RuleCondition::Load { comparison }
            | RuleCondition::Connectivity { comparison }
            | RuleCondition::Time { comparison }
            | RuleCondition::Resource { comparison, .. } => comparison,
        }
    }
}

/// How an action picks a membrane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "select", content = "id", rename_all = "snake_case")]
pub enum MembraneSelector {
    /// Exactly this membrane.
    Id(MembraneId),
    /// Per the configured distribution strategy.
    Strategy,
    /// Highest buffer utilisation.
    MostLoaded,
    /// Lowest buffer utilisation.
    LeastLoaded,
    /// Greatest depth, newest on ties.
    Deepest,
    /// Oldest root.
    FirstRoot,
}

/// A rule action. Actions run in order; a failure does not stop later actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Create a child membrane.
    CreateMembrane {
        /// Parent choice.
        parent: MembraneSelector,
        /// Name of the new membrane.
        #[serde(default)]
        name: Option<String>,
        /// Boundary; the parent's when absent.
        #[serde(default)]
        boundary: Option<Boundary>,
        /// State; zeros shaped like the parent's when absent.
        #[serde(default)]
        state: Option<MembraneState>,
    },
    /// Dissolve a membrane.
    DissolveMembrane {
        /// Victim choice.
        target: MembraneSelector,
        /// Reparent children to the victim's parent.
        #[serde(default)]
        redistribute_children: bool,
        /// Dissolve the whole subtree. Without either flag a membrane with
        /// children is refused.
        #[serde(default)]
        recursive: bool,
    },
    /// Replicate a membrane `replication_factor` times.
    ReplicateMembrane {
        /// Source choice.
        source: MembraneSelector,
        /// Parent of the replicas; the source's parent when absent.
        #[serde(default)]
        target_parent: Option<MembraneSelector>,
        /// Also replicate the source's subtree.
        #[serde(default)]
        replicate_children: bool,
    },
    /// Move surplus buffered messages from the most to the least loaded membrane.
    BalanceLoad,
    /// Replace membranes whose ports are in error.
    Failover,
    /// Connect tensor output of `source` to tensor input of `target`.
    ConnectMembranes {
        /// Sending membrane.
        source: MembraneSelector,
        /// Receiving membrane.
        target: MembraneSelector,
    },
}

impl RuleAction {
    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            RuleAction::CreateMembrane { .. } => "create_membrane",
            RuleAction::DissolveMembrane { .. } => "dissolve_membrane",
            RuleAction::ReplicateMembrane { .. } => "replicate_membrane",
            RuleAction::BalanceLoad => "balance_load",
            RuleAction::Failover => "failover",
            RuleAction::ConnectMembranes { .. } => "connect_membranes",
        }
    }
}

/// An autonomic rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PSystemRule {
    /// Rule id.
    pub id: RuleId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Advisory category.
    #[serde(default, rename = "type")]
    pub kind: RuleKind,
    /// Conjunctive conditions; an empty list always holds.
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Ordered actions.
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    /// Lower is evaluated first.
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules are never evaluated.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Successful executions so far.
    #[serde(default)]
    pub execution_count: u64,
    /// Stop evaluating after this many successful executions.
    #[serde(default)]
    pub max_executions: Option<u64>,
}

fn enabled_default() -> bool {
    true
}

impl PSystemRule {
    /// Enabled rule with no conditions or actions.
    pub fn new(id: impl Into<RuleId>, kind: RuleKind, priority: i32) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            kind,
            conditions: Vec::new(),
            actions: Vec::new(),
            priority,
            enabled: true,
            execution_count: 0,
            max_executions: None,
        }
    }

    /// Add a condition.
    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an action.
    pub fn then(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Cap successful executions.
    pub fn at_most(mut self, max_executions: u64) -> Self {
        self.max_executions = Some(max_executions);
        self
    }

    /// Enabled and under its execution cap.
    pub fn is_eligible(&self) -> bool {
        self.enabled
            && self
                .max_executions
                .map_or(true, |max| self.execution_count < max)
    }
}
