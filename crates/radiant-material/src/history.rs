//! Undo/redo for material graph edits.

use crate::error::GraphError;
use crate::graph::{MaterialGraph, NodeId, PinId};
use crate::value::PinValue;
use tracing::debug;

/// Default number of undo steps kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 128;

/// A reversible change to a graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEdit {
    MoveNode {
        node: NodeId,
        from: [f32; 2],
        to: [f32; 2],
    },
    SetParam {
        node: NodeId,
        index: usize,
        before: PinValue,
        after: PinValue,
    },
    SetPinDefault {
        pin: PinId,
        before: PinValue,
        after: PinValue,
    },
    /// Whole-graph snapshots around node or link creation and deletion.
    Structural {
        before: Box<MaterialGraph>,
        after: Box<MaterialGraph>,
    },
}

impl GraphEdit {
    pub fn structural(before: MaterialGraph, after: MaterialGraph) -> Self {
        Self::Structural {
            before: Box::new(before),
            after: Box::new(after),
        }
    }

    pub fn apply(&self, graph: &mut MaterialGraph) -> Result<(), GraphError> {
        match self {
            Self::MoveNode { node, to, .. } => graph.move_node(*node, *to).map(drop),
            Self::SetParam {
                node, index, after, ..
            } => graph.set_param(*node, *index, after.clone()).map(drop),
            Self::SetPinDefault { pin, after, .. } => {
                graph.set_pin_default(*pin, after.clone()).map(drop)
            }
            Self::Structural { after, .. } => {
                graph.clone_from(after);
                Ok(())
            }
        }
    }

    pub fn revert(&self, graph: &mut MaterialGraph) -> Result<(), GraphError> {
        match self {
            Self::MoveNode { node, from, .. } => graph.move_node(*node, *from).map(drop),
            Self::SetParam {
                node, index, before, ..
            } => graph.set_param(*node, *index, before.clone()).map(drop),
            Self::SetPinDefault { pin, before, .. } => {
                graph.set_pin_default(*pin, before.clone()).map(drop)
            }
            Self::Structural { before, .. } => {
                graph.clone_from(before);
                Ok(())
            }
        }
    }

    /// Fold `next` into this edit if both change the same thing.
    ///
    /// Structural edits never merge.
    pub fn merge(&mut self, next: &Self) -> bool {
        match (self, next) {
            (Self::MoveNode { node, to, .. }, Self::MoveNode { node: n, to: t, .. })
                if *node == *n =>
            {
                *to = *t;
                true
            }
            (
                Self::SetParam {
                    node, index, after, ..
                },
                Self::SetParam {
                    node: n,
                    index: i,
                    after: a,
                    ..
                },
            ) if *node == *n && *index == *i => {
                after.clone_from(a);
                true
            }
            (
                Self::SetPinDefault { pin, after, .. },
                Self::SetPinDefault {
                    pin: p, after: a, ..
                },
            ) if *pin == *p => {
                after.clone_from(a);
                true
            }
            _ => false,
        }
    }
}

/// Undo and redo stacks for one graph.
#[derive(Debug, Clone)]
pub struct EditHistory {
    undo: Vec<GraphEdit>,
    redo: Vec<GraphEdit>,
    limit: usize,
    /// Whether the next push may merge into the top of the undo stack.
    open: bool,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl EditHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.max(1),
            open: false,
        }
    }

    /// Record an edit that has already been applied.
    pub fn push(&mut self, edit: GraphEdit) {
        self.redo.clear();
        if self.open {
            if let Some(top) = self.undo.last_mut() {
                if top.merge(&edit) {
                    return;
                }
            }
        }
        self.undo.push(edit);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
        self.open = true;
    }

    /// Apply `edit` to `graph` and record it.
    pub fn apply(&mut self, graph: &mut MaterialGraph, edit: GraphEdit) -> Result<(), GraphError> {
        edit.apply(graph)?;
        self.push(edit);
        Ok(())
    }

    /// Run a structural change and record before/after snapshots.
    ///
    /// Nothing is recorded if `change` fails.
    pub fn structural<T>(
        &mut self,
        graph: &mut MaterialGraph,
        change: impl FnOnce(&mut MaterialGraph) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let before = graph.clone();
        let value = change(graph)?;
        self.push(GraphEdit::structural(before, graph.clone()));
        self.seal();
        Ok(value)
    }

    /// End the current run of mergeable edits.
    pub fn seal(&mut self) {
        self.open = false;
    }

    /// Revert the newest edit. Returns `false` if there was nothing to undo.
    pub fn undo(&mut self, graph: &mut MaterialGraph) -> Result<bool, GraphError> {
        let Some(edit) = self.undo.pop() else {
            return Ok(false);
        };
        if let Err(e) = edit.revert(graph) {
            self.undo.push(edit);
            return Err(e);
        }
        debug!(remaining = self.undo.len(), "Undo graph edit");
        self.redo.push(edit);
        self.open = false;
        Ok(true)
    }

    /// Reapply the newest undone edit.
    pub fn redo(&mut self, graph: &mut MaterialGraph) -> Result<bool, GraphError> {
        let Some(edit) = self.redo.pop() else {
            return Ok(false);
        };
        if let Err(e) = edit.apply(graph) {
            self.redo.push(edit);
            return Err(e);
        }
        self.undo.push(edit);
        self.open = false;
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    fn move_edit(graph: &MaterialGraph, node: NodeId, to: [f32; 2]) -> GraphEdit {
        GraphEdit::MoveNode {
            node,
            from: graph.node(node).unwrap().position,
            to,
        }
    }

    #[test]
    fn drag_merges_into_one_step() {
        let mut graph = MaterialGraph::default();
        let node = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let mut history = EditHistory::default();

        for x in 1..=5 {
            let edit = move_edit(&graph, node, [x as f32 * 10.0, 0.0]);
            history.apply(&mut graph, edit).unwrap();
        }
        assert_eq!(history.undo_len(), 1);
        assert_eq!(graph.node(node).unwrap().position, [50.0, 0.0]);

        assert!(history.undo(&mut graph).unwrap());
        assert_eq!(graph.node(node).unwrap().position, [0.0, 0.0]);
        assert!(history.redo(&mut graph).unwrap());
        assert_eq!(graph.node(node).unwrap().position, [50.0, 0.0]);
    }

    #[test]
    fn different_targets_do_not_merge() {
        let mut graph = MaterialGraph::default();
        let a = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let b = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let mut history = EditHistory::default();

        let edit = move_edit(&graph, a, [1.0, 1.0]);

        history.apply(&mut graph, edit).unwrap();
        let edit = move_edit(&graph, b, [2.0, 2.0]);
        history.apply(&mut graph, edit).unwrap();
        let param = GraphEdit::SetParam {
            node: a,
            index: 0,
            before: PinValue::Float(0.5),
            after: PinValue::Float(0.1),
        };
        history.apply(&mut graph, param).unwrap();
        assert_eq!(history.undo_len(), 3);
    }

    #[test]
    fn sealed_edits_stay_separate() {
        let mut graph = MaterialGraph::default();
        let node = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let mut history = EditHistory::default();
        let edit = move_edit(&graph, node, [1.0, 0.0]);
        history.apply(&mut graph, edit).unwrap();
        history.seal();
        let edit = move_edit(&graph, node, [2.0, 0.0]);
        history.apply(&mut graph, edit).unwrap();
        assert_eq!(history.undo_len(), 2);
    }

    #[test]
    fn param_edits_merge_and_revert() {
        let mut graph = MaterialGraph::default();
        let node = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let mut history = EditHistory::default();
        for v in [0.6, 0.7, 0.8] {
            let before = graph.node(node).unwrap().params[0].clone();
            let edit = GraphEdit::SetParam {
                node,
                index: 0,
                before,
                after: PinValue::Float(v),
            };
            history.apply(&mut graph, edit).unwrap();
        }
        assert_eq!(history.undo_len(), 1);
        history.undo(&mut graph).unwrap();
        assert_eq!(graph.node(node).unwrap().params[0], PinValue::Float(0.5));
    }

    #[test]
    fn structural_undo_restores_graph() {
        let mut graph = MaterialGraph::default();
        let original = graph.clone();
        let mut history = EditHistory::default();

        let node = history
            .structural(&mut graph, |g| g.create_node(NodeKind::Checker, [0.0, 0.0]))
            .unwrap();
        assert!(graph.node(node).is_some());

        // A refused change records nothing
        let output = graph.active_output().unwrap();
        assert!(history.structural(&mut graph, |g| g.delete_node(output)).is_err());
        assert_eq!(history.undo_len(), 1);

        history.undo(&mut graph).unwrap();
        assert_eq!(graph, original);
        history.redo(&mut graph).unwrap();
        assert!(graph.node(node).is_some());
    }

    #[test]
    fn new_edit_clears_redo() {
        let mut graph = MaterialGraph::default();
        let node = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let mut history = EditHistory::default();
        let edit = move_edit(&graph, node, [1.0, 0.0]);
        history.apply(&mut graph, edit).unwrap();
        history.undo(&mut graph).unwrap();
        assert!(history.can_redo());
        let edit = move_edit(&graph, node, [3.0, 0.0]);
        history.apply(&mut graph, edit).unwrap();
        assert!(!history.can_redo());
        assert!(!history.redo(&mut graph).unwrap());
    }

    #[test]
    fn limit_drops_oldest() {
        let mut graph = MaterialGraph::default();
        let node = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let mut history = EditHistory::new(2);
        for x in 1..=3 {
            let edit = move_edit(&graph, node, [x as f32, 0.0]);
            history.apply(&mut graph, edit).unwrap();
            history.seal();
        }
        assert_eq!(history.undo_len(), 2);
        history.undo(&mut graph).unwrap();
        history.undo(&mut graph).unwrap();
        assert!(!history.can_undo());
        assert_eq!(graph.node(node).unwrap().position, [1.0, 0.0]);
    }
}
