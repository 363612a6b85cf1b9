//! Membrane records. Membranes never hold references to each other: the owning
//! system indexes them by id and each record keeps only its parent id and an
//! ordered list of child ids.

use serde::Serialize;

use membrane_spec::{Boundary, MembraneId, MembraneState, StateKey, StateValue};

use crate::error::MembraneError;

/// Counters kept per membrane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceMetrics {
    /// Bytes held by the state payload.
    pub memory_usage: usize,
    /// Messages buffered on the membrane's ports.
    pub messages_received: u64,
    /// Messages that left the membrane's ports.
    pub messages_sent: u64,
    /// Last send or receive, 0 when idle since creation.
    pub last_activity_ms: u64,
}

/// A node in the membrane hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membrane {
    pub(crate) id: MembraneId,
    pub(crate) name: String,
    pub(crate) depth: usize,
    pub(crate) boundary: Boundary,
    pub(crate) state: MembraneState,
    pub(crate) parent: Option<MembraneId>,
    pub(crate) children: Vec<MembraneId>,
    pub(crate) active: bool,
    pub(crate) metrics: PerformanceMetrics,
    pub(crate) created_seq: u64,
    pub(crate) created_at_ms: u64,
}

impl Membrane {
    /// Detached root membrane, ready for `PSystem::add_root_membrane`.
    pub fn new(
        id: impl Into<MembraneId>,
        name: impl Into<String>,
        state: MembraneState,
        boundary: Boundary,
    ) -> Self {
        let metrics = PerformanceMetrics {
            memory_usage: state.memory_bytes(),
            ..PerformanceMetrics::default()
        };
        Self {
            id: id.into(),
            name: name.into(),
            depth: 0,
            boundary,
            state,
            parent: None,
            children: Vec::new(),
            active: true,
            metrics,
            created_seq: 0,
            created_at_ms: membrane_spec::now_ms(),
        }
    }

    /// Link `child` under `self`: sets its parent and depth and appends it.
    pub fn add_child_membrane(&mut self, child: &mut Membrane) -> Result<(), MembraneError> {
        if child.id == self.id {
            return Err(MembraneError::SelfChild(child.id.clone()));
        }
        if self.children.contains(&child.id) {
            return Err(MembraneError::DuplicateChild(child.id.clone()));
        }
        child.parent = Some(self.id.clone());
        child.depth = self.depth + 1;
        self.children.push(child.id.clone());
        Ok(())
    }

    /// Unlink a child id. The child's own subtree is untouched.
    pub fn remove_child_membrane(&mut self, id: &MembraneId) -> bool {
        match self.children.iter().position(|c| c == id) {
            Some(pos) => {
                self.children.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Stop accepting messages. There is no way back.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Id.
    pub fn id(&self) -> &MembraneId {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distance from the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Boundary policy.
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Whole state payload.
    pub fn state(&self) -> &MembraneState {
        &self.state
    }

    /// One state field.
    pub fn get_state(&self, key: StateKey) -> StateValue<'_> {
        self.state.get(key)
    }

    /// Parent id.
    pub fn parent(&self) -> Option<&MembraneId> {
        self.parent.as_ref()
    }

    /// Child ids in insertion order.
    pub fn children(&self) -> &[MembraneId] {
        &self.children
    }

    /// Accepts messages.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Counters.
    pub fn performance_metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Admission order within the owning system.
    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    /// Admission time.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// No parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// No children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn replace_state(&mut self, state: MembraneState) {
        self.metrics.memory_usage = state.memory_bytes();
        self.state = state;
    }

    pub(crate) fn touch(&mut self, now_ms: u64) {
        self.metrics.last_activity_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(id: &str) -> Membrane {
        Membrane::new(id, id, MembraneState::default(), Boundary::default())
    }

    #[test]
    fn linking_sets_parent_and_depth() {
        let mut root = bare("r");
        let mut child = bare("c");
        root.add_child_membrane(&mut child).unwrap();
        assert_eq!(child.parent(), Some(&MembraneId::from("r")));
        assert_eq!(child.depth(), 1);
        assert!(!root.is_leaf());
        assert!(!child.is_root() && child.is_leaf());
    }

    #[test]
    fn duplicate_and_self_children_rejected() {
        let mut root = bare("r");
        let mut child = bare("c");
        root.add_child_membrane(&mut child).unwrap();
        assert_eq!(
            root.add_child_membrane(&mut child),
            Err(MembraneError::DuplicateChild("c".into()))
        );
        let mut twin = bare("r");
        assert_eq!(
            root.add_child_membrane(&mut twin),
            Err(MembraneError::SelfChild("r".into()))
        );
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn removal_is_shallow() {
        let mut root = bare("r");
        let mut child = bare("c");
        let mut grandchild = bare("g");
        root.add_child_membrane(&mut child).unwrap();
        child.add_child_membrane(&mut grandchild).unwrap();
        assert!(root.remove_child_membrane(&"c".into()));
        assert!(!root.remove_child_membrane(&"c".into()));
        assert_eq!(child.children(), &[MembraneId::from("g")]);
    }

    #[test]
    fn deactivate_and_state_accessors() {
        let state = MembraneState::new(vec![0.5; 6], vec![2, 3], "k", "dense");
        let mut m = Membrane::new("m", "m", state, Boundary::default());
        assert_eq!(m.performance_metrics().memory_usage, 24);
        assert_eq!(m.get_state(StateKey::StateType), StateValue::StateType("dense"));
        m.deactivate();
        assert!(!m.is_active());
    }
}
