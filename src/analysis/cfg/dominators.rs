//! Dominator tree, dominator numbering and postdominators.
//!
//! Dominators are computed in a single pass over the reverse post order: the immediate
//! dominator of a block is the common dominator of its forward predecessors, all of which come
//! earlier in the order. Back edges are ignored since the loop header dominates them anyway.
//!
//! After the tree is built every block receives a pre-order number and the largest number
//! among its descendants, which turns `dominates` into two integer comparisons.

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph},
    ir::NodeId,
};

impl ControlFlowGraph<'_> {
    pub(crate) fn compute_dominators(&mut self) {
        let mut max_depth = 0;
        for index in 1..self.blocks.len() {
            let mut dominator: Option<BlockId> = None;
            for &predecessor in &self.blocks[index].predecessors {
                if self.blocks[predecessor.0].loop_end {
                    continue;
                }
                dominator = Some(match dominator {
                    None => predecessor,
                    Some(current) => self.common_dominator_raw(current, predecessor),
                });
            }
            if let Some(dominator) = dominator {
                self.set_dominator(BlockId(index), dominator);
                max_depth = max_depth.max(self.blocks[index].dominator_depth);
            }
        }
        self.max_dominator_depth = max_depth;
        self.calc_dominator_ranges();
    }

    fn set_dominator(&mut self, block: BlockId, dominator: BlockId) {
        self.blocks[block.0].dominator = Some(dominator);
        self.blocks[block.0].dominator_depth = self.blocks[dominator.0].dominator_depth + 1;

        // Keep the children of `dominator` sorted by id.
        match self.blocks[dominator.0].first_dominated {
            Some(first) if first < block => {
                let mut current = first;
                while let Some(next) = self.blocks[current.0].dominated_sibling {
                    if next > block {
                        break;
                    }
                    current = next;
                }
                self.blocks[block.0].dominated_sibling = self.blocks[current.0].dominated_sibling;
                self.blocks[current.0].dominated_sibling = Some(block);
            }
            first => {
                self.blocks[block.0].dominated_sibling = first;
                self.blocks[dominator.0].first_dominated = Some(block);
            }
        }
    }

    /// Numbers the dominator tree in pre-order with an explicit stack.
    ///
    /// Children are pushed in sibling order, so the last sibling is numbered first and the first
    /// dominated child carries the largest numbers of the subtree.
    fn calc_dominator_ranges(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        let mut stack = Vec::with_capacity(self.max_dominator_depth + 1);
        stack.push(BlockId(0));
        let mut number = 0;

        while let Some(&current) = stack.last() {
            let first_dominated = self.blocks[current.0].first_dominated;
            if self.blocks[current.0].dominator_number.is_none() {
                self.blocks[current.0].dominator_number = Some(number);
                match first_dominated {
                    Some(first) => {
                        let mut child = Some(first);
                        while let Some(dominated) = child {
                            stack.push(dominated);
                            child = self.blocks[dominated.0].dominated_sibling;
                        }
                    }
                    None => {
                        self.blocks[current.0].max_child_dominator_number = Some(number);
                        stack.pop();
                    }
                }
                number += 1;
            } else {
                self.blocks[current.0].max_child_dominator_number = first_dominated
                    .and_then(|first| self.blocks[first.0].max_child_dominator_number);
                stack.pop();
            }
        }
    }

    /// Common dominator of two blocks whose dominators are already set.
    fn common_dominator_raw(&self, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        let mut depth_a = self.blocks[a.0].dominator_depth;
        let mut depth_b = self.blocks[b.0].dominator_depth;

        while depth_a > depth_b {
            match self.blocks[a.0].dominator {
                Some(dominator) => a = dominator,
                None => return a,
            }
            depth_a -= 1;
        }
        while depth_b > depth_a {
            match self.blocks[b.0].dominator {
                Some(dominator) => b = dominator,
                None => return b,
            }
            depth_b -= 1;
        }
        while a != b {
            match (self.blocks[a.0].dominator, self.blocks[b.0].dominator) {
                (Some(next_a), Some(next_b)) => {
                    a = next_a;
                    b = next_b;
                }
                _ => return BlockId(0),
            }
        }
        a
    }

    /// Returns `true` if every path from the start block to `b` passes through `a`.
    ///
    /// Every block dominates itself. Without computed dominators only that reflexive case holds.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let (a, b) = (&self.blocks[a.0], &self.blocks[b.0]);
        match (
            a.dominator_number,
            a.max_child_dominator_number,
            b.dominator_number,
        ) {
            (Some(min), Some(max), Some(number)) => min <= number && number <= max,
            _ => false,
        }
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The deepest block dominating both `a` and `b`.
    ///
    /// A missing block acts as the neutral element, so folding over a list of blocks can start
    /// with `None`.
    #[must_use]
    pub fn common_dominator(&self, a: Option<BlockId>, b: Option<BlockId>) -> Option<BlockId> {
        match (a, b) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) => {
                if self.dominates(a, b) {
                    Some(a)
                } else if self.dominates(b, a) {
                    Some(b)
                } else {
                    Some(self.common_dominator_raw(a, b))
                }
            }
        }
    }

    /// The common dominator of the blocks of all `nodes`.
    ///
    /// Nodes outside of any block are skipped; `None` if no node belongs to a block.
    pub fn common_dominator_for<I>(&self, nodes: I) -> Option<BlockId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        nodes
            .into_iter()
            .filter_map(|node| self.block_for(node))
            .fold(None, |dominator, block| {
                self.common_dominator(dominator, Some(block))
            })
    }

    /// The dominator `distance` levels above `block`; `block` itself for distance 0.
    #[must_use]
    pub fn dominator_at_distance(&self, block: BlockId, distance: usize) -> Option<BlockId> {
        let mut current = block;
        for _ in 0..distance {
            current = self.blocks[current.0].dominator?;
        }
        Some(current)
    }

    /// Iterates over the blocks immediately dominated by `block`, in ascending id order.
    pub fn dominated(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.blocks[block.0].first_dominated, move |child| {
            self.blocks[child.0].dominated_sibling
        })
    }

    /// Assigns immediate postdominators in reverse block order.
    ///
    /// Blocks ending in a back edge and blocks without successors get none; a block whose
    /// successors do not meet before a sink gets none either.
    pub(crate) fn compute_postdominators(&mut self) {
        'blocks: for index in (0..self.blocks.len()).rev() {
            let block = &self.blocks[index];
            if block.loop_end {
                continue;
            }
            let Some((&first, rest)) = block.successors.split_first() else {
                continue;
            };

            let mut postdominator = first;
            for &successor in rest {
                match self.common_postdominator(postdominator, successor) {
                    Some(common) => postdominator = common,
                    None => continue 'blocks,
                }
            }
            self.blocks[index].postdominator = Some(postdominator);
        }
    }

    fn common_postdominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let (mut a, mut b) = (a, b);
        while a != b {
            if a < b {
                a = self.blocks[a.0].postdominator?;
            } else {
                b = self.blocks[b.0].postdominator?;
            }
        }
        Some(a)
    }
}
