//! The program graph consumed by the control flow graph builder.
//!
//! [`StructuredGraph`] is an arena of [`Node`]s connected through `next` links, control split
//! successors, ends flowing into merges, and loop ends flowing back to loop headers. It is
//! immutable once handed to [`crate::analysis::ControlFlowGraph`]; all edits happen through the
//! builder methods below, which reject shapes the CFG builder could not interpret.
//!
//! # Example
//!
//! A diamond: the start node branches to two begins which both jump into a merge.
//!
//! ```rust
//! use flowscope::ir::StructuredGraph;
//!
//! let mut graph = StructuredGraph::new();
//! let then_begin = graph.add_begin();
//! let else_begin = graph.add_begin();
//! let split = graph.add_if(then_begin, else_begin, 0.3)?;
//! graph.set_next(graph.start(), split)?;
//!
//! let merge = graph.add_merge();
//! let then_end = graph.add_end(merge)?;
//! let else_end = graph.add_end(merge)?;
//! graph.set_next(then_begin, then_end)?;
//! graph.set_next(else_begin, else_end)?;
//!
//! let ret = graph.add_return();
//! graph.set_next(merge, ret)?;
//! assert_eq!(graph.forward_ends(merge), &[then_end, else_end]);
//! # Ok::<(), flowscope::Error>(())
//! ```

use strum::Display;

use crate::{
    config::CfgOptions,
    ir::{Kills, Node, NodeId, NodeKind, ProfileSource},
    Error::{self, GraphError},
    Result,
};

/// Probability attached to the exception edge of an invoke unless stated otherwise.
pub const EXCEPTION_PROBABILITY: f64 = 1e-6;

/// How far guard lowering has progressed on a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum GuardsStage {
    /// Guards float and are not yet anchored in control flow.
    #[default]
    FloatingGuards,
    /// Guards were lowered to fixed deoptimizations.
    FixedDeopts,
    /// Frame states were assigned to deoptimizations.
    AfterFsa,
}

impl GuardsStage {
    /// Returns `true` once every deoptimization carries its own frame state.
    ///
    /// From this point on, paths that leave a loop through a deoptimization no longer need to be
    /// treated as part of the loop body.
    #[must_use]
    pub fn are_frame_states_at_deopts(self) -> bool {
        self == GuardsStage::AfterFsa
    }
}

/// A method's instruction-level control flow graph.
#[derive(Debug, Clone)]
pub struct StructuredGraph {
    nodes: Vec<Node>,
    guards_stage: GuardsStage,
    options: CfgOptions,
    name: Option<String>,
}

impl Default for StructuredGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredGraph {
    /// Creates a graph containing only its start node.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(CfgOptions::default())
    }

    /// Creates a graph with the given options.
    #[must_use]
    pub fn with_options(options: CfgOptions) -> Self {
        StructuredGraph {
            nodes: vec![Node::new(NodeKind::Start)],
            guards_stage: GuardsStage::default(),
            options,
            name: None,
        }
    }

    /// The entry node of the method.
    #[must_use]
    pub const fn start(&self) -> NodeId {
        NodeId(0)
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Returns the kind of the node with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub(crate) fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over all nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }

    /// Iterates over all nodes that open a basic block.
    pub fn begin_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes()
            .filter(|(_, node)| node.kind.is_begin())
            .map(|(id, _)| id)
    }

    /// Returns `true` if the graph contains at least one loop.
    #[must_use]
    pub fn has_loops(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node.kind, NodeKind::LoopBegin { .. }))
    }

    /// The options controlling analyses of this graph.
    #[must_use]
    pub fn options(&self) -> &CfgOptions {
        &self.options
    }

    /// Replaces the options of this graph.
    pub fn set_options(&mut self, options: CfgOptions) {
        self.options = options;
    }

    /// The current guards stage.
    #[must_use]
    pub fn guards_stage(&self) -> GuardsStage {
        self.guards_stage
    }

    /// Sets the guards stage.
    pub fn set_guards_stage(&mut self, stage: GuardsStage) {
        self.guards_stage = stage;
    }

    /// A human readable name, used in log output and DOT titles.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Sets the name of the graph.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    fn checked(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| GraphError(format!("Node {id} does not exist")))
    }

    fn check_probability(node: NodeId, probability: f64) -> Result<()> {
        if (0.0..=1.0).contains(&probability) {
            Ok(())
        } else {
            Err(Error::InvalidProbability { node, probability })
        }
    }

    /// Adds a plain block begin.
    pub fn add_begin(&mut self) -> NodeId {
        self.push(NodeKind::Begin)
    }

    /// Adds a straight-line instruction.
    pub fn add_fixed(&mut self) -> NodeId {
        self.push(NodeKind::Fixed)
    }

    /// Adds a straight-line instruction that overwrites the given locations.
    pub fn add_memory_kill(&mut self, kills: Kills) -> NodeId {
        let id = self.push(NodeKind::Fixed);
        self.nodes[id.0].kills = kills;
        id
    }

    /// Adds a merge without forward ends. Ends are attached with [`add_end`](Self::add_end).
    pub fn add_merge(&mut self) -> NodeId {
        self.push(NodeKind::Merge { ends: Vec::new() })
    }

    /// Adds a loop header. Its entering ends, back edges and exits are attached with
    /// [`add_end`](Self::add_end), [`add_loop_end`](Self::add_loop_end) and
    /// [`add_loop_exit`](Self::add_loop_exit).
    pub fn add_loop_begin(&mut self) -> NodeId {
        self.push(NodeKind::LoopBegin {
            ends: Vec::new(),
            loop_ends: Vec::new(),
            loop_exits: Vec::new(),
            inverted: false,
        })
    }

    /// Adds a forward end flowing into `merge`, which must be a merge or loop header.
    ///
    /// Ends are recorded in the order they are added; that order becomes the predecessor order
    /// of the merge block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `merge` is neither a merge nor a loop header.
    pub fn add_end(&mut self, merge: NodeId) -> Result<NodeId> {
        let end = NodeId(self.nodes.len());
        match self.nodes.get_mut(merge.0).map(|node| &mut node.kind) {
            Some(NodeKind::Merge { ends } | NodeKind::LoopBegin { ends, .. }) => ends.push(end),
            Some(other) => {
                return Err(GraphError(format!(
                    "End target {merge} is a {}, not a merge",
                    other.name()
                )))
            }
            None => return Err(GraphError(format!("Node {merge} does not exist"))),
        }
        self.push(NodeKind::End { merge });
        Ok(end)
    }

    /// Adds a back edge to `loop_begin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `loop_begin` is not a loop header.
    pub fn add_loop_end(&mut self, loop_begin: NodeId) -> Result<NodeId> {
        self.expect_loop_begin(loop_begin)?;
        let end = self.push(NodeKind::LoopEnd { loop_begin });
        if let NodeKind::LoopBegin { loop_ends, .. } = &mut self.nodes[loop_begin.0].kind {
            loop_ends.push(end);
        }
        Ok(end)
    }

    /// Adds an exit of `loop_begin`. The exit is a block begin and must become the successor of
    /// a node inside the loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `loop_begin` is not a loop header.
    pub fn add_loop_exit(&mut self, loop_begin: NodeId) -> Result<NodeId> {
        self.expect_loop_begin(loop_begin)?;
        let exit = self.push(NodeKind::LoopExit { loop_begin });
        if let NodeKind::LoopBegin { loop_exits, .. } = &mut self.nodes[loop_begin.0].kind {
            loop_exits.push(exit);
        }
        Ok(exit)
    }

    fn expect_loop_begin(&self, loop_begin: NodeId) -> Result<()> {
        match self.checked(loop_begin)?.kind {
            NodeKind::LoopBegin { .. } => Ok(()),
            ref other => Err(GraphError(format!(
                "Node {loop_begin} is a {}, not a loop begin",
                other.name()
            ))),
        }
    }

    /// Marks a loop as inverted (rotated).
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `loop_begin` is not a loop header.
    pub fn set_loop_inverted(&mut self, loop_begin: NodeId, value: bool) -> Result<()> {
        self.expect_loop_begin(loop_begin)?;
        if let NodeKind::LoopBegin { inverted, .. } = &mut self.nodes[loop_begin.0].kind {
            *inverted = value;
        }
        Ok(())
    }

    /// Wires `successor` as the target of a control split.
    fn attach_split_successor(&mut self, split: NodeId, successor: NodeId) -> Result<()> {
        let node = self.checked(successor)?;
        match node.kind {
            NodeKind::Begin | NodeKind::LoopExit { .. } => {}
            ref other => {
                return Err(GraphError(format!(
                    "Control split successor {successor} is a {}, not a begin",
                    other.name()
                )))
            }
        }
        if let Some(existing) = node.predecessor {
            return Err(GraphError(format!(
                "Begin {successor} already has predecessor {existing}"
            )));
        }
        self.nodes[successor.0].predecessor = Some(split);
        Ok(())
    }

    fn add_split(&mut self, kind: NodeKind) -> Result<NodeId> {
        let successors = kind.split_successors();
        let split = self.push(kind);
        for (position, &successor) in successors.iter().enumerate() {
            if let Err(error) = self.attach_split_successor(split, successor) {
                for &attached in &successors[..position] {
                    self.nodes[attached.0].predecessor = None;
                }
                self.nodes.pop();
                return Err(error);
            }
        }
        Ok(split)
    }

    /// Adds a two-way branch taking `true_successor` with `true_probability`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProbability`] for a probability outside `[0, 1]` and
    /// [`Error::GraphError`] if a successor is not an unattached begin.
    pub fn add_if(
        &mut self,
        true_successor: NodeId,
        false_successor: NodeId,
        true_probability: f64,
    ) -> Result<NodeId> {
        Self::check_probability(NodeId(self.nodes.len()), true_probability)?;
        self.add_split(NodeKind::If {
            true_successor,
            false_successor,
            true_probability,
        })
    }

    /// Adds a multi-way branch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if there are no successors or the number of probabilities
    /// differs from the number of successors, and [`Error::InvalidProbability`] for a
    /// probability outside `[0, 1]`.
    pub fn add_switch(&mut self, successors: Vec<NodeId>, probabilities: Vec<f64>) -> Result<NodeId> {
        if successors.is_empty() || successors.len() != probabilities.len() {
            return Err(GraphError(format!(
                "Switch with {} successors and {} probabilities",
                successors.len(),
                probabilities.len()
            )));
        }
        let id = NodeId(self.nodes.len());
        for &probability in &probabilities {
            Self::check_probability(id, probability)?;
        }
        self.add_split(NodeKind::Switch {
            successors,
            probabilities,
        })
    }

    /// Adds an invoke with a normal continuation `next` and an exception continuation.
    ///
    /// # Errors
    ///
    /// Same as [`add_if`](Self::add_if).
    pub fn add_invoke_with_exception(
        &mut self,
        next: NodeId,
        exception_edge: NodeId,
        exception_probability: f64,
    ) -> Result<NodeId> {
        Self::check_probability(NodeId(self.nodes.len()), exception_probability)?;
        self.add_split(NodeKind::InvokeWithException {
            next,
            exception_edge,
            exception_probability,
        })
    }

    /// Adds a return.
    pub fn add_return(&mut self) -> NodeId {
        self.push(NodeKind::Return)
    }

    /// Adds a deoptimization.
    pub fn add_deoptimize(&mut self) -> NodeId {
        self.push(NodeKind::Deoptimize)
    }

    /// Adds an unwind.
    pub fn add_unwind(&mut self) -> NodeId {
        self.push(NodeKind::Unwind)
    }

    /// Links `node` to its following node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `node` cannot have a `next` or already has one, or if
    /// `next` is entered through ends (start, merges, loop headers) or already has a
    /// predecessor.
    pub fn set_next(&mut self, node: NodeId, next: NodeId) -> Result<()> {
        let from = self.checked(node)?;
        if !from.kind.is_fixed_with_next() {
            return Err(GraphError(format!(
                "Node {node} is a {} and cannot have a next",
                from.kind.name()
            )));
        }
        if let Some(existing) = from.next {
            return Err(GraphError(format!(
                "Node {node} already continues to {existing}"
            )));
        }
        let to = self.checked(next)?;
        if matches!(to.kind, NodeKind::Start) || to.kind.is_merge() {
            return Err(GraphError(format!(
                "Node {next} is a {} and is only entered through ends",
                to.kind.name()
            )));
        }
        if let Some(existing) = to.predecessor {
            return Err(GraphError(format!(
                "Node {next} already has predecessor {existing}"
            )));
        }
        self.nodes[node.0].next = Some(next);
        self.nodes[next.0].predecessor = Some(node);
        Ok(())
    }

    /// Links a chain of nodes, each to the following one.
    ///
    /// # Errors
    ///
    /// Fails on the first link [`set_next`](Self::set_next) rejects.
    pub fn chain(&mut self, nodes: &[NodeId]) -> Result<()> {
        for pair in nodes.windows(2) {
            self.set_next(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Declares the memory locations `node` may overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if the node does not exist.
    pub fn set_kills(&mut self, node: NodeId, kills: Kills) -> Result<()> {
        self.checked(node)?;
        self.nodes[node.0].kills = kills;
        Ok(())
    }

    /// Declares where the probabilities of a control split come from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `split` is not a control split.
    pub fn set_profile_source(&mut self, split: NodeId, source: ProfileSource) -> Result<()> {
        if !self.checked(split)?.kind.is_control_split() {
            return Err(GraphError(format!("Node {split} is not a control split")));
        }
        self.nodes[split.0].profile_source = source;
        Ok(())
    }

    /// The declared probability of reaching `successor` from the control split `split`.
    ///
    /// Returns 0 if `successor` is not a successor of `split`.
    #[must_use]
    pub fn probability(&self, split: NodeId, successor: NodeId) -> f64 {
        match &self.get(split).kind {
            NodeKind::If {
                true_successor,
                false_successor,
                true_probability,
            } => {
                if *true_successor == successor {
                    *true_probability
                } else if *false_successor == successor {
                    1.0 - true_probability
                } else {
                    0.0
                }
            }
            NodeKind::Switch {
                successors,
                probabilities,
            } => successors
                .iter()
                .zip(probabilities)
                .filter(|(candidate, _)| **candidate == successor)
                .map(|(_, probability)| probability)
                .sum(),
            NodeKind::InvokeWithException {
                next,
                exception_edge,
                exception_probability,
            } => {
                if *exception_edge == successor {
                    *exception_probability
                } else if *next == successor {
                    1.0 - exception_probability
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// The forward ends of a merge or loop header, in declaration order.
    #[must_use]
    pub fn forward_ends(&self, merge: NodeId) -> &[NodeId] {
        match &self.get(merge).kind {
            NodeKind::Merge { ends } | NodeKind::LoopBegin { ends, .. } => ends,
            _ => &[],
        }
    }

    /// The back edges of a loop header, in declaration order.
    #[must_use]
    pub fn loop_ends(&self, loop_begin: NodeId) -> &[NodeId] {
        match &self.get(loop_begin).kind {
            NodeKind::LoopBegin { loop_ends, .. } => loop_ends,
            _ => &[],
        }
    }

    /// The declared exits of a loop header, in declaration order.
    #[must_use]
    pub fn loop_exits(&self, loop_begin: NodeId) -> &[NodeId] {
        match &self.get(loop_begin).kind {
            NodeKind::LoopBegin { loop_exits, .. } => loop_exits,
            _ => &[],
        }
    }

    /// Returns `true` if `node` is a declared exit of `loop_begin`.
    #[must_use]
    pub fn is_loop_exit_of(&self, loop_begin: NodeId, node: NodeId) -> bool {
        matches!(self.get(node).kind, NodeKind::LoopExit { loop_begin: owner } if owner == loop_begin)
    }

    /// Returns `true` if `loop_begin` was marked inverted.
    #[must_use]
    pub fn is_loop_inverted(&self, loop_begin: NodeId) -> bool {
        matches!(self.get(loop_begin).kind, NodeKind::LoopBegin { inverted: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::LocationIdentity;

    #[test]
    fn test_new_graph_has_start() {
        let graph = StructuredGraph::new();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(*graph.kind(graph.start()), NodeKind::Start);
        assert!(!graph.has_loops());
        assert_eq!(graph.begin_nodes().count(), 1);
    }

    #[test]
    fn test_if_probabilities() {
        let mut graph = StructuredGraph::new();
        let a = graph.add_begin();
        let b = graph.add_begin();
        let split = graph.add_if(a, b, 0.25).unwrap();

        assert!((graph.probability(split, a) - 0.25).abs() < 1e-12);
        assert!((graph.probability(split, b) - 0.75).abs() < 1e-12);
        assert_eq!(graph.node(a).unwrap().predecessor(), Some(split));
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let mut graph = StructuredGraph::new();
        let a = graph.add_begin();
        let b = graph.add_begin();
        let result = graph.add_if(a, b, 1.5);
        assert!(matches!(result, Err(Error::InvalidProbability { .. })));

        let result = graph.add_if(a, b, f64::NAN);
        assert!(matches!(result, Err(Error::InvalidProbability { .. })));

        // Successors stay unattached after a rejected split
        assert_eq!(graph.node(a).unwrap().predecessor(), None);
    }

    #[test]
    fn test_split_successor_must_be_unattached_begin() {
        let mut graph = StructuredGraph::new();
        let a = graph.add_begin();
        let fixed = graph.add_fixed();
        assert!(graph.add_if(a, fixed, 0.5).is_err());
        assert_eq!(graph.node(a).unwrap().predecessor(), None);

        let b = graph.add_begin();
        graph.add_if(a, b, 0.5).unwrap();
        let c = graph.add_begin();
        assert!(graph.add_if(a, c, 0.5).is_err());
    }

    #[test]
    fn test_switch_validation() {
        let mut graph = StructuredGraph::new();
        let a = graph.add_begin();
        let b = graph.add_begin();
        assert!(graph.add_switch(vec![a, b], vec![1.0]).is_err());
        assert!(graph.add_switch(vec![], vec![]).is_err());

        let switch = graph.add_switch(vec![a, b], vec![0.1, 0.9]).unwrap();
        assert!((graph.probability(switch, b) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_merge_ends_in_declaration_order() {
        let mut graph = StructuredGraph::new();
        let merge = graph.add_merge();
        let first = graph.add_end(merge).unwrap();
        let second = graph.add_end(merge).unwrap();
        assert_eq!(graph.forward_ends(merge), &[first, second]);

        let fixed = graph.add_fixed();
        assert!(graph.add_end(fixed).is_err());
    }

    #[test]
    fn test_loop_adjacency() {
        let mut graph = StructuredGraph::new();
        let header = graph.add_loop_begin();
        let entry = graph.add_end(header).unwrap();
        let back = graph.add_loop_end(header).unwrap();
        let exit = graph.add_loop_exit(header).unwrap();
        graph.set_loop_inverted(header, true).unwrap();

        assert!(graph.has_loops());
        assert_eq!(graph.forward_ends(header), &[entry]);
        assert_eq!(graph.loop_ends(header), &[back]);
        assert_eq!(graph.loop_exits(header), &[exit]);
        assert!(graph.is_loop_exit_of(header, exit));
        assert!(graph.is_loop_inverted(header));

        let not_a_loop = graph.add_merge();
        assert!(graph.add_loop_end(not_a_loop).is_err());
    }

    #[test]
    fn test_set_next_validation() {
        let mut graph = StructuredGraph::new();
        let merge = graph.add_merge();
        assert!(graph.set_next(graph.start(), merge).is_err());

        let fixed = graph.add_fixed();
        graph.set_next(graph.start(), fixed).unwrap();
        let other = graph.add_fixed();
        assert!(graph.set_next(graph.start(), other).is_err());

        let ret = graph.add_return();
        graph.set_next(fixed, ret).unwrap();
        let after = graph.add_fixed();
        assert!(graph.set_next(ret, after).is_err());
    }

    #[test]
    fn test_kills_and_profile_source() {
        let mut graph = StructuredGraph::new();
        let store = graph.add_memory_kill(Kills::Single(LocationIdentity::mutable("f")));
        assert_eq!(graph.node(store).unwrap().kills().locations().len(), 1);

        let a = graph.add_begin();
        let b = graph.add_begin();
        let split = graph.add_if(a, b, 0.5).unwrap();
        graph.set_profile_source(split, ProfileSource::Profiled).unwrap();
        assert_eq!(graph.node(split).unwrap().profile_source(), ProfileSource::Profiled);
        assert!(graph.set_profile_source(store, ProfileSource::Profiled).is_err());
    }

    #[test]
    fn test_guards_stage() {
        let mut graph = StructuredGraph::new();
        assert!(!graph.guards_stage().are_frame_states_at_deopts());
        graph.set_guards_stage(GuardsStage::AfterFsa);
        assert!(graph.guards_stage().are_frame_states_at_deopts());
    }
}
