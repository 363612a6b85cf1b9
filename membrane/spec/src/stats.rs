//! Statistics snapshot and evolution audit records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entries kept in the evolution audit ring buffer; oldest dropped first.
pub const HISTORY_CAPACITY: usize = 1000;

/// Coarse complexity label derived from membrane and connection counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ComputationalComplexity {
    /// Flat system.
    #[serde(rename = "O(1)")]
    #[default]
    Constant,
    /// Fewer connections than membranes.
    #[serde(rename = "O(n)")]
    Linear,
    /// Fewer connections than `n log n`.
    #[serde(rename = "O(n log n)")]
    Linearithmic,
    /// Everything denser.
    #[serde(rename = "O(n^2)")]
    Quadratic,
}

impl ComputationalComplexity {
    /// Classify a system with `membranes` membranes, `connections` membrane-level
    /// connections and the given maximum depth.
    pub fn classify(max_depth: usize, membranes: usize, connections: usize) -> Self {
        if max_depth == 0 {
            return Self::Constant;
        }
        if connections < membranes {
            return Self::Linear;
        }
        let n = membranes as f64;
        if (connections as f64) < n * n.log2() {
            Self::Linearithmic
        } else {
            Self::Quadratic
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Constant => "O(1)",
            Self::Linear => "O(n)",
            Self::Linearithmic => "O(n log n)",
            Self::Quadratic => "O(n^2)",
        }
    }
}

impl fmt::Display for ComputationalComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Statistics snapshot polled by monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemStatistics {
    /// Live membranes.
    pub total_membranes: usize,
    /// Deepest level ever reached.
    pub max_depth_reached: usize,
    /// Mean depth of live membranes.
    pub average_depth: f64,
    /// Membrane-level connections.
    pub total_connections: usize,
    /// Registered ports.
    pub total_ports: usize,
    /// Rules whose actions all succeeded.
    pub rules_executed: u64,
    /// Completed evolution cycles.
    pub evolution_cycles: u64,
    /// Membranes created, replicas included.
    pub membrane_creations: u64,
    /// Membranes dissolved, cascades included.
    pub membrane_dissolutions: u64,
    /// Load balancing passes that moved messages.
    pub load_balance_operations: u64,
    /// Membranes replaced by failover.
    pub failover_operations: u64,
    /// Time since construction.
    pub uptime_ms: u64,
    /// Label from the last completed cycle.
    pub computational_complexity: ComputationalComplexity,
}

/// Audit entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionEventKind {
    /// A membrane entered the system.
    MembraneCreated,
    /// A membrane left the system.
    MembraneDissolved,
    /// A subtree was replicated.
    MembraneReplicated,
    /// A rule ran and every action succeeded.
    RuleExecuted,
    /// A rule ran and at least one action failed.
    RuleFailed,
    /// Load balancing moved messages.
    LoadBalanced,
    /// Failover replaced a faulted membrane.
    Failover,
    /// An evolution cycle completed.
    CycleCompleted,
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    /// Category.
    #[serde(rename = "type")]
    pub kind: EvolutionEventKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Structured details.
    pub details: serde_json::Value,
}
