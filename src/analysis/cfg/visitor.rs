//! Dominator tree traversals.
//!
//! Both traversals call [`RecursiveVisitor::enter`] when a block is reached and
//! [`RecursiveVisitor::exit`] after all blocks it dominates were exited, with the value `enter`
//! returned. They run on explicit stacks, so deep dominator trees cannot overflow the call
//! stack.
//!
//! - [`ControlFlowGraph::visit_dominator_tree_default`] visits the dominated blocks of a block
//!   in id order, except that a dominated postdominator (a block always reached from its
//!   dominator) is visited last.
//! - [`ControlFlowGraph::visit_dominator_tree_defer_loop_exits`] holds back every block that
//!   leaves a loop in the dominator tree until the whole loop was visited and exited.

use std::fmt;

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph},
    utils::BitSet,
};

/// Callbacks of a dominator tree traversal.
///
/// # Examples
///
/// ```rust
/// use flowscope::{
///     analysis::{BlockId, ControlFlowGraph, RecursiveVisitor},
///     ir::StructuredGraph,
/// };
///
/// /// Records the dominator tree depth of every block.
/// struct Depths(Vec<(BlockId, usize)>, usize);
///
/// impl RecursiveVisitor for Depths {
///     type Value = ();
///
///     fn enter(&mut self, _cfg: &ControlFlowGraph<'_>, block: BlockId) {
///         self.0.push((block, self.1));
///         self.1 += 1;
///     }
///
///     fn exit(&mut self, _cfg: &ControlFlowGraph<'_>, _block: BlockId, _value: ()) {
///         self.1 -= 1;
///     }
/// }
///
/// let mut graph = StructuredGraph::new();
/// let ret = graph.add_return();
/// graph.set_next(graph.start(), ret)?;
/// let cfg = ControlFlowGraph::compute_all(&graph)?;
///
/// let mut depths = Depths(Vec::new(), 0);
/// cfg.visit_dominator_tree(&mut depths, false);
/// assert_eq!(depths.0, vec![(BlockId::new(0), 0)]);
/// # Ok::<(), flowscope::Error>(())
/// ```
pub trait RecursiveVisitor {
    /// Value handed from `enter` to the matching `exit`.
    type Value;

    /// Called when `block` is reached.
    fn enter(&mut self, cfg: &ControlFlowGraph<'_>, block: BlockId) -> Self::Value;

    /// Called once every block dominated by `block` was exited.
    fn exit(&mut self, cfg: &ControlFlowGraph<'_>, block: BlockId, value: Self::Value);
}

impl ControlFlowGraph<'_> {
    /// Visits the dominator tree, deferring loop exits if requested and the graph has loops.
    pub fn visit_dominator_tree<V>(&self, visitor: &mut V, defer_loop_exits: bool)
    where
        V: RecursiveVisitor + ?Sized,
    {
        if defer_loop_exits && !self.loops.is_empty() {
            self.visit_dominator_tree_defer_loop_exits(visitor);
        } else {
            self.visit_dominator_tree_default(visitor);
        }
    }

    fn is_always_reached(&self, block: BlockId) -> bool {
        self.blocks[block.0]
            .dominator
            .is_some_and(|dominator| self.blocks[dominator.0].postdominator == Some(block))
    }

    fn skip_post_dom(&self, block: Option<BlockId>) -> Option<BlockId> {
        match block {
            Some(block) if self.is_always_reached(block) => self.blocks[block.0].dominated_sibling,
            other => other,
        }
    }

    /// Visits the dominator tree depth first, postdominators after their siblings.
    ///
    /// Without computed dominators only the start block is visited.
    pub fn visit_dominator_tree_default<V>(&self, visitor: &mut V)
    where
        V: RecursiveVisitor + ?Sized,
    {
        if self.blocks.is_empty() {
            return;
        }
        // One entry per tree level: the dominated block currently being visited from it.
        let mut stack: Vec<Option<BlockId>> = Vec::with_capacity(self.max_dominator_depth + 1);
        let mut values = Vec::with_capacity(self.max_dominator_depth + 1);
        let mut current = BlockId(0);
        stack.push(None);

        while let Some(&state) = stack.last() {
            let finished_post_dom = state.is_some_and(|state| self.is_always_reached(state));
            if !finished_post_dom {
                let next = match state {
                    None => {
                        values.push(visitor.enter(self, current));
                        self.skip_post_dom(self.blocks[current.0].first_dominated)
                    }
                    Some(state) => self.skip_post_dom(self.blocks[state.0].dominated_sibling),
                };
                let next = next.or_else(|| {
                    self.blocks[current.0]
                        .postdominator
                        .filter(|post_dom| self.blocks[post_dom.0].dominator == Some(current))
                });
                if let Some(next) = next {
                    if let Some(top) = stack.last_mut() {
                        *top = Some(next);
                    }
                    current = next;
                    stack.push(None);
                    continue;
                }
            }

            if let Some(value) = values.pop() {
                visitor.exit(self, current, value);
            }
            if let Some(dominator) = self.blocks[current.0].dominator {
                current = dominator;
            }
            stack.pop();
        }
    }

    /// Visits the dominator tree, entering the blocks that leave a loop only after the loop
    /// header was exited.
    ///
    /// Dominated blocks are visited in id order with a dominated postdominator last, so that
    /// branches are seen before the merges they flow into.
    pub fn visit_dominator_tree_defer_loop_exits<V>(&self, visitor: &mut V)
    where
        V: RecursiveVisitor + ?Sized,
    {
        if self.blocks.is_empty() {
            return;
        }
        let mut stack = vec![BlockId(0)];
        let mut visited = BitSet::new(self.blocks.len());
        let mut deferred: Vec<Vec<BlockId>> = vec![Vec::new(); self.loops.len()];
        let mut values = Vec::with_capacity(self.max_dominator_depth + 1);
        let mut dominated = Vec::with_capacity(3);

        while let Some(&current) = stack.last() {
            if visited.contains(current.0) {
                if let Some(value) = values.pop() {
                    visitor.exit(self, current, value);
                }
                stack.pop();

                let block = &self.blocks[current.0];
                if let (true, Some(id)) = (block.loop_header, block.loop_id) {
                    // Oldest deferred exit on top.
                    let exits = std::mem::take(&mut deferred[id.0]);
                    stack.extend(exits.into_iter().rev());
                }
                continue;
            }

            visited.insert(current.0);
            values.push(visitor.enter(self, current));

            let mut always_reached = self.blocks[current.0].postdominator;
            if let Some(reached) = always_reached {
                if self.blocks[reached.0].dominator != Some(current) {
                    always_reached = None;
                } else if self.is_dominator_tree_loop_exit(reached, false) {
                    self.add_deferred_exit(&mut deferred, &mut stack, reached);
                } else {
                    stack.push(reached);
                }
            }

            dominated.clear();
            dominated.extend(self.dominated(current));
            while let Some(child) = dominated.pop() {
                if Some(child) == always_reached {
                    continue;
                }
                if self.is_dominator_tree_loop_exit(child, false) {
                    self.add_deferred_exit(&mut deferred, &mut stack, child);
                } else {
                    stack.push(child);
                }
            }
        }
    }

    /// Defers `exit` to the outermost loop it leaves.
    ///
    /// An exit whose dominator is in no loop cannot be deferred and is pushed directly.
    fn add_deferred_exit(
        &self,
        deferred: &mut [Vec<BlockId>],
        stack: &mut Vec<BlockId>,
        exit: BlockId,
    ) {
        let exit_loop = self.blocks[exit.0].loop_id;
        let Some(mut outermost) = self.blocks[exit.0]
            .dominator
            .and_then(|dominator| self.blocks[dominator.0].loop_id)
        else {
            stack.push(exit);
            return;
        };
        while let Some(parent) = self.loops[outermost.0].parent {
            if Some(parent) == exit_loop {
                break;
            }
            outermost = parent;
        }
        deferred[outermost.0].push(exit);
    }
}

/// Decorator logging every step of a traversal at trace level.
///
/// The dominator tree is logged once on construction.
pub struct LoggingVisitor<V> {
    inner: V,
    depth: usize,
}

impl<V> LoggingVisitor<V> {
    /// Wraps `inner`, logging the dominator tree of `cfg`.
    pub fn new(inner: V, cfg: &ControlFlowGraph<'_>) -> Self {
        if log::log_enabled!(log::Level::Trace) && cfg.block_count() > 0 {
            log::trace!(
                "Dominator tree for {}",
                cfg.graph().name().unwrap_or("<anonymous>")
            );
            let mut stack = vec![(BlockId(0), 0usize)];
            while let Some((block, depth)) = stack.pop() {
                let current = cfg.block(block);
                log::trace!(
                    "{:indent$}{} [dom {:?}, post dom {:?}]",
                    "",
                    block,
                    current.dominator(),
                    current.postdominator(),
                    indent = depth * 2
                );
                let children: Vec<_> = cfg.dominated(block).collect();
                stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
            }
        }
        LoggingVisitor { inner, depth: 0 }
    }

    /// The wrapped visitor.
    pub fn inner(&self) -> &V {
        &self.inner
    }

    /// Unwraps the decorated visitor.
    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V> RecursiveVisitor for LoggingVisitor<V>
where
    V: RecursiveVisitor,
    V::Value: fmt::Debug,
{
    type Value = V::Value;

    fn enter(&mut self, cfg: &ControlFlowGraph<'_>, block: BlockId) -> Self::Value {
        log::trace!("{:indent$}Enter block {}", "", block, indent = self.depth * 2);
        self.depth += 1;
        self.inner.enter(cfg, block)
    }

    fn exit(&mut self, cfg: &ControlFlowGraph<'_>, block: BlockId, value: Self::Value) {
        self.depth = self.depth.saturating_sub(1);
        log::trace!(
            "{:indent$}Exit block {} with value {:?}",
            "",
            block,
            value,
            indent = self.depth * 2
        );
        self.inner.exit(cfg, block, value);
    }
}

impl<V: fmt::Debug> fmt::Debug for LoggingVisitor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingVisitor")
            .field("inner", &self.inner)
            .field("depth", &self.depth)
            .finish()
    }
}
