//! Nodes of the program graph.
//!
//! This module provides the [`NodeId`] handle used to reference nodes of a
//! [`StructuredGraph`](crate::ir::StructuredGraph), the [`NodeKind`] classification that the
//! control flow graph builder dispatches on, and the per-node [`Kills`] declaration used for
//! memory scheduling.

use std::fmt;

use strum::IntoStaticStr;

use crate::ir::{LocationIdentity, ProfileSource};

/// A strongly-typed identifier for nodes within a program graph.
///
/// `NodeId` wraps a `usize` index into the node arena of a
/// [`StructuredGraph`](crate::ir::StructuredGraph). Node ids are assigned sequentially starting
/// from 0 (the start node) when nodes are added to a graph.
///
/// # Examples
///
/// ```rust
/// use flowscope::ir::{NodeId, StructuredGraph};
///
/// let mut graph = StructuredGraph::new();
/// let begin = graph.add_begin();
/// assert_eq!(graph.start(), NodeId::new(0));
/// assert_ne!(graph.start(), begin);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    ///
    /// Normal usage obtains `NodeId` values from the `add_*` methods of
    /// [`StructuredGraph`](crate::ir::StructuredGraph).
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

/// The memory locations a node may overwrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Kills {
    /// The node does not write memory.
    #[default]
    None,
    /// The node overwrites exactly one location.
    Single(LocationIdentity),
    /// The node overwrites several locations.
    Multi(Vec<LocationIdentity>),
}

impl Kills {
    /// Returns the killed locations as a slice.
    #[must_use]
    pub fn locations(&self) -> &[LocationIdentity] {
        match self {
            Kills::None => &[],
            Kills::Single(location) => std::slice::from_ref(location),
            Kills::Multi(locations) => locations,
        }
    }
}

/// The control flow role of a node.
///
/// Nodes fall into five groups which the control flow graph builder treats differently:
///
/// - **Begin nodes** ([`Start`](Self::Start), [`Begin`](Self::Begin), [`Merge`](Self::Merge),
///   [`LoopBegin`](Self::LoopBegin), [`LoopExit`](Self::LoopExit)) open a basic block.
/// - **Fixed nodes** ([`Fixed`](Self::Fixed)) are straight-line instructions with a `next`.
/// - **Ends** ([`End`](Self::End), [`LoopEnd`](Self::LoopEnd)) jump to a merge or back to a
///   loop header.
/// - **Control splits** ([`If`](Self::If), [`Switch`](Self::Switch),
///   [`InvokeWithException`](Self::InvokeWithException)) branch to several begin nodes with
///   declared probabilities.
/// - **Control sinks** ([`Return`](Self::Return), [`Deoptimize`](Self::Deoptimize),
///   [`Unwind`](Self::Unwind)) leave the method.
///
/// Begin nodes and fixed nodes together form the "fixed with next" nodes: they continue to
/// exactly one following node.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "PascalCase")]
pub enum NodeKind {
    /// The unique entry of the method.
    Start,
    /// A plain block begin, typically a successor of a control split.
    Begin,
    /// Joins several forward [`End`](Self::End)s.
    Merge {
        /// The forward ends in declaration order.
        ends: Vec<NodeId>,
    },
    /// The header of a loop.
    LoopBegin {
        /// Forward ends entering the loop, in declaration order.
        ends: Vec<NodeId>,
        /// Back edges, in declaration order.
        loop_ends: Vec<NodeId>,
        /// Declared exits, in declaration order.
        loop_exits: Vec<NodeId>,
        /// Whether the loop was rotated so that its condition is checked at the bottom.
        inverted: bool,
    },
    /// Begins the block that control reaches after leaving a loop.
    LoopExit {
        /// The loop being left.
        loop_begin: NodeId,
    },
    /// A straight-line instruction.
    Fixed,
    /// Forward jump into a merge or loop header.
    End {
        /// The merge or loop begin this end flows into.
        merge: NodeId,
    },
    /// Back edge of a loop.
    LoopEnd {
        /// The loop header this end jumps back to.
        loop_begin: NodeId,
    },
    /// Two-way branch.
    If {
        /// Successor taken when the condition holds.
        true_successor: NodeId,
        /// Successor taken otherwise.
        false_successor: NodeId,
        /// Probability of taking the true successor.
        true_probability: f64,
    },
    /// Multi-way branch.
    Switch {
        /// Successors in declaration order.
        successors: Vec<NodeId>,
        /// Probability per successor, in the same order.
        probabilities: Vec<f64>,
    },
    /// A call with a normal continuation and an exception continuation.
    InvokeWithException {
        /// The normal continuation.
        next: NodeId,
        /// The continuation taken when the callee throws.
        exception_edge: NodeId,
        /// Probability of the exception continuation.
        exception_probability: f64,
    },
    /// Returns from the method.
    Return,
    /// Transfers execution to the interpreter.
    Deoptimize,
    /// Propagates an exception to the caller.
    Unwind,
}

impl NodeKind {
    /// Returns the name of the node kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Returns `true` if this node opens a basic block.
    #[must_use]
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::Begin
                | NodeKind::Merge { .. }
                | NodeKind::LoopBegin { .. }
                | NodeKind::LoopExit { .. }
        )
    }

    /// Returns `true` if this node is a merge or a loop header.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        matches!(self, NodeKind::Merge { .. } | NodeKind::LoopBegin { .. })
    }

    /// Returns `true` if this node continues to exactly one following node through `next`.
    #[must_use]
    pub fn is_fixed_with_next(&self) -> bool {
        self.is_begin() || matches!(self, NodeKind::Fixed)
    }

    /// Returns `true` if this node branches to several successors.
    #[must_use]
    pub fn is_control_split(&self) -> bool {
        matches!(
            self,
            NodeKind::If { .. } | NodeKind::Switch { .. } | NodeKind::InvokeWithException { .. }
        )
    }

    /// Returns `true` if this node leaves the method.
    #[must_use]
    pub fn is_control_sink(&self) -> bool {
        matches!(
            self,
            NodeKind::Return | NodeKind::Deoptimize | NodeKind::Unwind
        )
    }

    /// Returns the successors of a control split in declaration order.
    ///
    /// Empty for every other kind.
    #[must_use]
    pub fn split_successors(&self) -> Vec<NodeId> {
        match self {
            NodeKind::If {
                true_successor,
                false_successor,
                ..
            } => vec![*true_successor, *false_successor],
            NodeKind::Switch { successors, .. } => successors.clone(),
            NodeKind::InvokeWithException {
                next,
                exception_edge,
                ..
            } => vec![*next, *exception_edge],
            _ => Vec::new(),
        }
    }
}

/// A single node of a [`StructuredGraph`](crate::ir::StructuredGraph).
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) next: Option<NodeId>,
    pub(crate) predecessor: Option<NodeId>,
    pub(crate) kills: Kills,
    pub(crate) profile_source: ProfileSource,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            next: None,
            predecessor: None,
            kills: Kills::None,
            profile_source: ProfileSource::Unknown,
        }
    }

    /// The control flow role of this node.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The following node, for begin and fixed nodes.
    #[must_use]
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// The node control arrives from.
    ///
    /// `None` for the start node, merges and loop headers, which are entered through ends.
    #[must_use]
    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }

    /// The memory locations this node may overwrite.
    #[must_use]
    pub fn kills(&self) -> &Kills {
        &self.kills
    }

    /// Where the branch probabilities of this node come from, for control splits.
    #[must_use]
    pub fn profile_source(&self) -> ProfileSource {
        self.profile_source
    }
}
