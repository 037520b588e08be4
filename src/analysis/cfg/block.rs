//! Basic blocks of a [`ControlFlowGraph`](super::ControlFlowGraph).

use std::{fmt, sync::OnceLock};

use crate::{
    analysis::cfg::{LocationSet, LoopId},
    ir::{NodeId, ProfileSource},
};

/// Highest block id a control flow graph may assign.
///
/// Block ids are kept within 16 bits so that per-block side tables stay small; graphs with
/// more blocks are rejected with [`Error::GraphTooLarge`](crate::Error::GraphTooLarge).
pub const LAST_VALID_BLOCK_INDEX: usize = u16::MAX as usize - 1;

/// Identifier of a basic block.
///
/// The id of a block is its position in the reverse post order of the control flow graph and
/// doubles as an index into [`ControlFlowGraph::blocks`](super::ControlFlowGraph::blocks).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a block id from its reverse post order position.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the reverse post order position of the block.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A basic block: the run of nodes from a begin node up to the next block boundary.
///
/// Blocks are created once per begin node and filled in by the analyses of the owning
/// [`ControlFlowGraph`](super::ControlFlowGraph). Fields an analysis did not compute keep their
/// neutral value (`None`, depth 0, frequency 0).
///
/// Queries that need the program graph, such as kill locations or the contained nodes, live on
/// the control flow graph and take a [`BlockId`].
#[derive(Debug)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) begin: NodeId,
    pub(crate) end: NodeId,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) loop_header: bool,
    pub(crate) loop_end: bool,

    pub(crate) dominator: Option<BlockId>,
    pub(crate) first_dominated: Option<BlockId>,
    pub(crate) dominated_sibling: Option<BlockId>,
    pub(crate) dominator_depth: usize,
    pub(crate) dominator_number: Option<usize>,
    pub(crate) max_child_dominator_number: Option<usize>,

    pub(crate) loop_id: Option<LoopId>,
    pub(crate) postdominator: Option<BlockId>,

    pub(crate) relative_frequency: f64,
    pub(crate) frequency_source: ProfileSource,

    pub(crate) kill_locations: OnceLock<LocationSet>,
    pub(crate) kill_locations_between_this_and_dominator: OnceLock<LocationSet>,
}

impl Block {
    pub(crate) fn new(id: BlockId, begin: NodeId, end: NodeId) -> Self {
        Block {
            id,
            begin,
            end,
            predecessors: Vec::new(),
            successors: Vec::new(),
            loop_header: false,
            loop_end: false,
            dominator: None,
            first_dominated: None,
            dominated_sibling: None,
            dominator_depth: 0,
            dominator_number: None,
            max_child_dominator_number: None,
            loop_id: None,
            postdominator: None,
            relative_frequency: 0.0,
            frequency_source: ProfileSource::Unknown,
            kill_locations: OnceLock::new(),
            kill_locations_between_this_and_dominator: OnceLock::new(),
        }
    }

    /// The id of this block, equal to its reverse post order position.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The begin node opening this block.
    #[must_use]
    pub fn begin_node(&self) -> NodeId {
        self.begin
    }

    /// The last node of this block.
    ///
    /// Either a control split, control sink, end, loop end, or the last fixed node before a begin
    /// node that opens the next block.
    #[must_use]
    pub fn end_node(&self) -> NodeId {
        self.end
    }

    /// Predecessor blocks.
    ///
    /// For loop headers: blocks of the forward ends in declaration order, then blocks of the loop
    /// ends in declaration order. For merges: blocks of the forward ends in declaration order.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Successor blocks in declared branch order.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// The first predecessor, if any.
    #[must_use]
    pub fn first_predecessor(&self) -> Option<BlockId> {
        self.predecessors.first().copied()
    }

    /// The first successor, if any.
    #[must_use]
    pub fn first_successor(&self) -> Option<BlockId> {
        self.successors.first().copied()
    }

    /// Returns `true` if `block` is a direct successor of this block.
    #[must_use]
    pub fn contains_successor(&self, block: BlockId) -> bool {
        self.successors.contains(&block)
    }

    /// Returns `true` if this block begins with a loop header.
    #[must_use]
    pub fn is_loop_header(&self) -> bool {
        self.loop_header
    }

    /// Returns `true` if this block ends with a back edge.
    #[must_use]
    pub fn is_loop_end(&self) -> bool {
        self.loop_end
    }

    /// The immediate dominator. `None` for the start block or before dominators are computed.
    #[must_use]
    pub fn dominator(&self) -> Option<BlockId> {
        self.dominator
    }

    /// The dominated child with the lowest id.
    #[must_use]
    pub fn first_dominated(&self) -> Option<BlockId> {
        self.first_dominated
    }

    /// The next child of this block's dominator, in ascending id order.
    #[must_use]
    pub fn dominated_sibling(&self) -> Option<BlockId> {
        self.dominated_sibling
    }

    /// Number of dominator tree edges between this block and the start block.
    #[must_use]
    pub fn dominator_depth(&self) -> usize {
        self.dominator_depth
    }

    /// Pre-order number of this block in the dominator tree.
    #[must_use]
    pub fn dominator_number(&self) -> Option<usize> {
        self.dominator_number
    }

    /// Largest pre-order number among the blocks this block dominates.
    #[must_use]
    pub fn max_child_dominator_number(&self) -> Option<usize> {
        self.max_child_dominator_number
    }

    /// The innermost loop containing this block.
    #[must_use]
    pub fn loop_id(&self) -> Option<LoopId> {
        self.loop_id
    }

    /// The immediate postdominator.
    #[must_use]
    pub fn postdominator(&self) -> Option<BlockId> {
        self.postdominator
    }

    /// Expected executions of this block per execution of the start block.
    #[must_use]
    pub fn relative_frequency(&self) -> f64 {
        self.relative_frequency
    }

    /// Provenance of [`relative_frequency`](Self::relative_frequency).
    #[must_use]
    pub fn frequency_source(&self) -> ProfileSource {
        self.frequency_source
    }

    pub(crate) fn clear_kill_caches(&mut self) {
        self.kill_locations.take();
        self.kill_locations_between_this_and_dominator.take();
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{}]", self.id, self.begin, self.end)
    }
}
