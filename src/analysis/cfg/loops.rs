//! Natural loops of a control flow graph.
//!
//! Loops are discovered from the loop headers of the program graph, so every loop has exactly
//! one header and its back edges are the declared loop ends. Nesting is recorded through
//! [`Loop::parent`] and [`Loop::children`]; each block points at its innermost loop.
//!
//! Two notions of exit are kept per loop:
//!
//! - **Natural exits** are blocks outside the loop that are direct successors of a loop block.
//! - **Loop exits** are the blocks opened by the declared loop exit nodes. Before frame states
//!   are attached to deoptimizations, branches that leave the loop without a loop exit (they
//!   always end in a deoptimization) are pulled into the loop body instead of being exits.
//!   Afterwards the loop exits are the natural exits.

use std::{fmt, sync::OnceLock};

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph, LocationSet},
    ir::NodeKind,
};

/// Identifier of a loop, equal to its position in
/// [`ControlFlowGraph::loops`](super::ControlFlowGraph::loops).
///
/// Loops are numbered in the reverse post order of their headers, so outer loops have smaller
/// ids than the loops nested in them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(pub(crate) usize);

impl LoopId {
    /// Creates a loop id from its index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        LoopId(index)
    }

    /// Returns the index of the loop.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoopId({})", self.0)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A natural loop.
#[derive(Debug)]
pub struct Loop {
    pub(crate) id: LoopId,
    pub(crate) depth: usize,
    pub(crate) header: BlockId,
    pub(crate) parent: Option<LoopId>,
    pub(crate) children: Vec<LoopId>,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) natural_exits: Vec<BlockId>,
    pub(crate) loop_exits: Vec<BlockId>,
    pub(crate) inverted: bool,
    pub(crate) num_backedges: usize,
    pub(crate) kill_locations: OnceLock<LocationSet>,
}

impl Loop {
    pub(crate) fn new(
        id: LoopId,
        parent: Option<(LoopId, usize)>,
        header: BlockId,
        inverted: bool,
        num_backedges: usize,
    ) -> Self {
        Loop {
            id,
            depth: parent.map_or(1, |(_, depth)| depth + 1),
            header,
            parent: parent.map(|(parent, _)| parent),
            children: Vec::new(),
            blocks: Vec::new(),
            natural_exits: Vec::new(),
            loop_exits: Vec::new(),
            inverted,
            num_backedges,
            kill_locations: OnceLock::new(),
        }
    }

    /// The id of this loop.
    #[must_use]
    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Nesting depth; outermost loops have depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The loop header block.
    #[must_use]
    pub fn header(&self) -> BlockId {
        self.header
    }

    /// The directly enclosing loop.
    #[must_use]
    pub fn parent(&self) -> Option<LoopId> {
        self.parent
    }

    /// Loops directly nested in this one.
    #[must_use]
    pub fn children(&self) -> &[LoopId] {
        &self.children
    }

    /// All blocks of the loop, including blocks of nested loops. The header comes first.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Blocks outside the loop that directly succeed a loop block, sorted by id.
    #[must_use]
    pub fn natural_exits(&self) -> &[BlockId] {
        &self.natural_exits
    }

    /// Blocks through which control leaves the loop, sorted by id.
    #[must_use]
    pub fn loop_exits(&self) -> &[BlockId] {
        &self.loop_exits
    }

    /// Returns `true` if `block` is a natural exit of this loop.
    #[must_use]
    pub fn is_natural_exit(&self, block: BlockId) -> bool {
        self.natural_exits.binary_search(&block).is_ok()
    }

    /// Returns `true` if `block` is a loop exit of this loop.
    #[must_use]
    pub fn is_loop_exit(&self, block: BlockId) -> bool {
        self.loop_exits.binary_search(&block).is_ok()
    }

    /// Whether the loop was rotated so that its condition is checked at the bottom.
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Number of back edges into the header.
    #[must_use]
    pub fn num_backedges(&self) -> usize {
        self.num_backedges
    }
}

impl fmt::Display for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} header {} depth {}", self.id, self.header, self.depth)
    }
}

impl ControlFlowGraph<'_> {
    /// Discovers all loops, outer loops first.
    ///
    /// Loop headers are visited in block order. An inner header is reached after the flood of
    /// its enclosing loop labelled it, which gives the parent link; the inner flood then
    /// relabels the inner blocks.
    pub(crate) fn compute_loop_information(&mut self) {
        self.loops.clear();
        if !self.graph.has_loops() {
            return;
        }
        let graph = self.graph;
        let mut stack = Vec::with_capacity(self.blocks.len());

        for index in 0..self.blocks.len() {
            let begin = self.blocks[index].begin;
            if !matches!(graph.kind(begin), NodeKind::LoopBegin { .. }) {
                continue;
            }

            let header = BlockId(index);
            let id = LoopId(self.loops.len());
            let parent = self.blocks[index]
                .loop_id
                .map(|parent| (parent, self.loops[parent.0].depth));
            let mut current = Loop::new(
                id,
                parent,
                header,
                graph.is_loop_inverted(begin),
                graph.loop_ends(begin).len(),
            );
            if let Some((parent, _)) = parent {
                self.loops[parent.0].children.push(id);
            }
            self.blocks[index].loop_id = Some(id);
            current.blocks.push(header);

            for &end in graph.loop_ends(begin) {
                if let Some(end_block) = self.block_for(end) {
                    self.compute_loop_blocks(end_block, &mut current, &mut stack, true);
                }
            }

            // Nested loops are not discovered yet, their blocks still carry this loop's id.
            for &block in &current.blocks {
                for &successor in &self.blocks[block.0].successors {
                    if self.blocks[successor.0].loop_id != Some(id) {
                        current.natural_exits.push(successor);
                    }
                }
            }
            current.natural_exits.sort_unstable();
            current.natural_exits.dedup();

            if graph.guards_stage().are_frame_states_at_deopts() {
                current.loop_exits = current.natural_exits.clone();
            } else {
                for &exit in graph.loop_exits(begin) {
                    let Some(exit_block) = self.block_for(exit) else {
                        continue;
                    };
                    if let Some(predecessor) = self.blocks[exit_block.0].first_predecessor() {
                        self.compute_loop_blocks(predecessor, &mut current, &mut stack, true);
                    }
                    current.loop_exits.push(exit_block);
                }
                current.loop_exits.sort_unstable();
                current.loop_exits.dedup();

                // Branches leaving without a loop exit end in a deoptimization; they become part
                // of the loop. Only the blocks known before this scan are inspected.
                let known = current.blocks.len();
                for position in 0..known {
                    let block = current.blocks[position];
                    let mut next = 0;
                    while let Some(successor) = self.neighbour(block, next, false) {
                        next += 1;
                        if self.blocks[successor.0].loop_id == Some(id) {
                            continue;
                        }
                        if !graph.is_loop_exit_of(begin, self.blocks[successor.0].begin) {
                            log::debug!(
                                "Unexpected loop exit with {} from {}, including whole branch in the loop",
                                successor,
                                id
                            );
                            self.compute_loop_blocks(successor, &mut current, &mut stack, false);
                        }
                    }
                }
            }

            self.loops.push(current);
        }
    }

    fn neighbour(&self, block: BlockId, position: usize, predecessors: bool) -> Option<BlockId> {
        let block = &self.blocks[block.0];
        if predecessors {
            block.predecessors.get(position).copied()
        } else {
            block.successors.get(position).copied()
        }
    }

    /// Floods `current` from `start` along predecessors or successors until blocks of the loop
    /// are reached.
    fn compute_loop_blocks(
        &mut self,
        start: BlockId,
        current: &mut Loop,
        stack: &mut Vec<BlockId>,
        predecessors: bool,
    ) {
        if self.blocks[start.0].loop_id == Some(current.id) {
            return;
        }
        self.blocks[start.0].loop_id = Some(current.id);
        current.blocks.push(start);
        stack.push(start);

        while let Some(block) = stack.pop() {
            let mut next = 0;
            while let Some(neighbour) = self.neighbour(block, next, predecessors) {
                next += 1;
                if self.blocks[neighbour.0].loop_id != Some(current.id) {
                    self.blocks[neighbour.0].loop_id = Some(current.id);
                    current.blocks.push(neighbour);
                    stack.push(neighbour);
                }
            }
        }
    }

    /// Returns `true` if `block` leaves the loop of its dominator in the dominator tree.
    ///
    /// That is the case when the dominator belongs to a different loop, unless `block` is the
    /// header of a loop nested in the dominator's loop. With `consider_real_exits` every block
    /// opened by a loop exit counts as well.
    #[must_use]
    pub fn is_dominator_tree_loop_exit(&self, block: BlockId, consider_real_exits: bool) -> bool {
        let current = &self.blocks[block.0];
        let leaves_dominator_loop = current.dominator.is_some_and(|dominator| {
            current.loop_id != self.blocks[dominator.0].loop_id
                && (!current.loop_header || self.loop_depth(dominator) >= self.loop_depth(block))
        });
        leaves_dominator_loop
            || (consider_real_exits
                && matches!(self.graph.kind(current.begin), NodeKind::LoopExit { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::GuardsStage, test};

    fn b(index: usize) -> BlockId {
        BlockId::new(index)
    }

    fn sorted(blocks: &[BlockId]) -> Vec<BlockId> {
        let mut blocks = blocks.to_vec();
        blocks.sort_unstable();
        blocks
    }

    #[test]
    fn test_loop_depth_from_parent() {
        let outer = Loop::new(LoopId::new(0), None, BlockId::new(1), false, 1);
        assert_eq!(outer.depth(), 1);
        assert_eq!(outer.parent(), None);

        let inner = Loop::new(
            LoopId::new(1),
            Some((outer.id(), outer.depth())),
            BlockId::new(3),
            true,
            2,
        );
        assert_eq!(inner.depth(), 2);
        assert_eq!(inner.parent(), Some(LoopId::new(0)));
        assert!(inner.is_inverted());
        assert_eq!(inner.num_backedges(), 2);
        assert_eq!(inner.to_string(), "L1 header B3 depth 2");
    }

    #[test]
    fn test_exit_membership_uses_sorted_lists() {
        let mut l = Loop::new(LoopId::new(0), None, BlockId::new(1), false, 1);
        l.natural_exits = vec![BlockId::new(4), BlockId::new(7)];
        l.loop_exits = vec![BlockId::new(7)];
        assert!(l.is_natural_exit(BlockId::new(4)));
        assert!(!l.is_loop_exit(BlockId::new(4)));
        assert!(l.is_loop_exit(BlockId::new(7)));
    }

    #[test]
    fn test_simple_loop() {
        let fixture = test::simple_loop(0.9);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        assert_eq!(cfg.loops().len(), 1);
        let l = cfg.loop_at(LoopId::new(0));
        assert_eq!(l.header(), b(1));
        assert_eq!(l.depth(), 1);
        assert_eq!(l.parent(), None);
        assert_eq!(l.num_backedges(), 1);
        assert!(!l.is_inverted());
        assert_eq!(sorted(l.blocks()), vec![b(1), b(2)]);
        assert_eq!(l.blocks()[0], b(1));
        assert_eq!(l.natural_exits(), &[b(3)]);
        assert_eq!(l.loop_exits(), &[b(3)]);

        assert_eq!(cfg.loop_depth(b(0)), 0);
        assert_eq!(cfg.loop_depth(b(2)), 1);
        assert_eq!(cfg.loop_depth(b(3)), 0);
        assert!(cfg.loop_contains(l.id(), b(2)));
        assert!(!cfg.loop_contains(l.id(), b(3)));
    }

    #[test]
    fn test_nested_loops() {
        let fixture = test::nested_loops(0.9, 0.8);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        assert_eq!(cfg.loops().len(), 2);
        let outer = cfg.loop_at(LoopId::new(0));
        let inner = cfg.loop_at(LoopId::new(1));

        assert_eq!(outer.children(), &[inner.id()]);
        assert_eq!(inner.parent(), Some(outer.id()));
        assert_eq!(inner.depth(), 2);
        assert_eq!(sorted(outer.blocks()), vec![b(1), b(2), b(3), b(4), b(5)]);
        assert_eq!(sorted(inner.blocks()), vec![b(3), b(4)]);
        assert_eq!(inner.loop_exits(), &[b(5)]);
        assert_eq!(outer.loop_exits(), &[b(6)]);

        let loop_ids: Vec<_> = cfg.blocks().iter().map(|block| block.loop_id()).collect();
        let (l0, l1) = (Some(outer.id()), Some(inner.id()));
        assert_eq!(loop_ids, vec![None, l0, l0, l1, l1, l0, None]);
        assert!(cfg.loop_contains(outer.id(), b(4)));
        assert!(!cfg.loop_contains(inner.id(), b(5)));
    }

    #[test]
    fn test_deopt_branch_pulled_into_loop() {
        let fixture = test::deopt_loop(GuardsStage::FloatingGuards);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        let l = cfg.loop_at(LoopId::new(0));

        assert_eq!(l.natural_exits(), &[b(4), b(5)]);
        assert_eq!(l.loop_exits(), &[b(5)]);
        assert_eq!(sorted(l.blocks()), vec![b(1), b(2), b(3), b(4)]);
        assert_eq!(cfg.block(b(4)).loop_id(), Some(l.id()));
    }

    #[test]
    fn test_natural_exits_after_frame_state_assignment() {
        let fixture = test::deopt_loop(GuardsStage::AfterFsa);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        let l = cfg.loop_at(LoopId::new(0));

        assert_eq!(l.loop_exits(), &[b(4), b(5)]);
        assert_eq!(sorted(l.blocks()), vec![b(1), b(2), b(3)]);
        assert_eq!(cfg.block(b(4)).loop_id(), None);
    }

    #[test]
    fn test_dominator_tree_loop_exit() {
        let fixture = test::nested_loops(0.9, 0.8);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        // B6 leaves the outer loop, B5 leaves the inner loop.
        assert!(cfg.is_dominator_tree_loop_exit(b(6), false));
        assert!(cfg.is_dominator_tree_loop_exit(b(5), false));
        // Entering a nested loop is not an exit.
        assert!(!cfg.is_dominator_tree_loop_exit(b(3), false));
        assert!(!cfg.is_dominator_tree_loop_exit(b(1), false));
        assert!(!cfg.is_dominator_tree_loop_exit(b(4), false));
        assert!(!cfg.is_dominator_tree_loop_exit(b(0), true));
    }

    #[test]
    fn test_inverted_loop() {
        let mut fixture = test::simple_loop(0.5);
        fixture
            .graph
            .set_loop_inverted(fixture.header, true)
            .unwrap();
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert!(cfg.loops()[0].is_inverted());
    }
}
