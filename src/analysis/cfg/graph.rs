//! Control Flow Graph implementation.
//!
//! This module provides the main [`ControlFlowGraph`] structure: the basic blocks of a
//! [`StructuredGraph`] in reverse post order, together with the node-to-block map, the loops
//! and the cached local loop frequencies. The analyses filling in the blocks live in the
//! sibling modules and are driven by [`ControlFlowGraphBuilder`](super::ControlFlowGraphBuilder).

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::{
    analysis::cfg::{
        rpo::ReversePostOrder, Block, BlockId, BuildConfiguration, Loop, LoopId,
        LAST_VALID_BLOCK_INDEX,
    },
    ir::{LoopFrequencyData, NodeId, NodeKind, ProfileSource, StructuredGraph},
    utils::BitSet,
    Error, Result,
};

/// The basic blocks of a method and the analyses computed over them.
///
/// A control flow graph borrows the [`StructuredGraph`] it was built from; the program graph
/// must not change while the CFG is in use. Build one with
/// [`ControlFlowGraph::builder`], [`ControlFlowGraph::compute_for_schedule`] or
/// [`ControlFlowGraph::compute_all`].
///
/// # Invariants
///
/// - `blocks()[0]` is the start block and has no predecessors; every other block has at least
///   one predecessor.
/// - Block ids are the reverse post order positions: every predecessor of a block has a
///   smaller id, except loop ends flowing back into a loop header.
/// - Blocks of an inner loop come before the exits of every loop enclosing it.
///
/// # Thread Safety
///
/// A finished `ControlFlowGraph` is [`Send`] and [`Sync`]. The memoized kill location sets use
/// [`std::sync::OnceLock`], so concurrent readers may race to compute a set but always observe
/// the same value.
///
/// # Examples
///
/// ```rust
/// use flowscope::{analysis::ControlFlowGraph, ir::StructuredGraph};
///
/// let mut graph = StructuredGraph::new();
/// let then_begin = graph.add_begin();
/// let else_begin = graph.add_begin();
/// let split = graph.add_if(then_begin, else_begin, 0.3)?;
/// graph.set_next(graph.start(), split)?;
/// let merge = graph.add_merge();
/// let then_end = graph.add_end(merge)?;
/// let else_end = graph.add_end(merge)?;
/// graph.set_next(then_begin, then_end)?;
/// graph.set_next(else_begin, else_end)?;
/// let ret = graph.add_return();
/// graph.set_next(merge, ret)?;
///
/// let cfg = ControlFlowGraph::compute_all(&graph)?;
/// let merge_block = cfg.block(cfg.block_for(merge).unwrap());
/// assert!((merge_block.relative_frequency() - 1.0).abs() < 1e-9);
/// assert_eq!(merge_block.dominator(), Some(cfg.start_block().id()));
/// # Ok::<(), flowscope::Error>(())
/// ```
#[derive(Debug)]
pub struct ControlFlowGraph<'g> {
    pub(crate) graph: &'g StructuredGraph,
    pub(crate) config: BuildConfiguration,
    pub(crate) blocks: Vec<Block>,
    pub(crate) node_to_block: Vec<Option<BlockId>>,
    pub(crate) loops: Vec<Loop>,
    pub(crate) max_dominator_depth: usize,
    pub(crate) local_loop_frequency_data: FxHashMap<NodeId, LoopFrequencyData>,
}

impl<'g> ControlFlowGraph<'g> {
    /// Partitions `graph` into basic blocks, orders them and wires predecessors and successors.
    ///
    /// No analysis is run; see [`ControlFlowGraph::compute_missing`].
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedGraph`] if a begin node other than the start node, a merge or a loop
    ///   header has no predecessor, a fixed node has no `next`, the block order cannot be
    ///   computed, or a block is unreachable from the start node.
    /// - [`Error::GraphTooLarge`] if there are more than [`LAST_VALID_BLOCK_INDEX`] blocks.
    pub(crate) fn identify_blocks(graph: &'g StructuredGraph) -> Result<Self> {
        let mut block_ends: Vec<Option<NodeId>> = vec![None; graph.node_count()];
        let mut begin_count = 0usize;

        for begin in graph.begin_nodes() {
            let node = graph.get(begin);
            let entered_through_ends = matches!(
                node.kind(),
                NodeKind::Start | NodeKind::Merge { .. } | NodeKind::LoopBegin { .. }
            );
            if node.predecessor().is_none() && !entered_through_ends {
                return Err(malformed_graph!(
                    "Disconnected control flow {} encountered",
                    begin
                ));
            }

            block_ends[begin.index()] = Some(Self::find_block_end(graph, begin)?);
            begin_count += 1;
            if begin_count > LAST_VALID_BLOCK_INDEX {
                return Err(Error::GraphTooLarge(LAST_VALID_BLOCK_INDEX));
            }
        }

        let order = ReversePostOrder::new(graph, &block_ends).compute()?;
        if order.len() != begin_count {
            let mut reached = BitSet::new(graph.node_count());
            for begin in &order {
                reached.insert(begin.index());
            }
            let unreached = graph
                .begin_nodes()
                .find(|begin| !reached.contains(begin.index()));
            return Err(match unreached {
                Some(begin) => malformed_graph!(
                    "Block of begin {} is not reachable from the start node",
                    begin
                ),
                None => malformed_graph!(
                    "Block order has {} entries for {} blocks",
                    order.len(),
                    begin_count
                ),
            });
        }

        let mut node_to_block = vec![None; graph.node_count()];
        let mut blocks = Vec::with_capacity(order.len());
        for (index, &begin) in order.iter().enumerate() {
            let id = BlockId(index);
            let end = block_ends[begin.index()]
                .ok_or_else(|| malformed_graph!("Begin {} has no block end", begin))?;

            let mut block = Block::new(id, begin, end);
            block.loop_header = matches!(graph.kind(begin), NodeKind::LoopBegin { .. });
            block.loop_end = matches!(graph.kind(end), NodeKind::LoopEnd { .. });
            for node in BlockNodes::new(graph, begin, end) {
                node_to_block[node.index()] = Some(id);
            }
            blocks.push(block);
        }

        let mut cfg = ControlFlowGraph {
            graph,
            config: BuildConfiguration::empty(),
            blocks,
            node_to_block,
            loops: Vec::new(),
            max_dominator_depth: 0,
            local_loop_frequency_data: FxHashMap::default(),
        };
        cfg.connect_blocks()?;
        Ok(cfg)
    }

    /// Returns the last node of the block opened by `begin`.
    ///
    /// The block extends along `next` links until the following node is a begin node (the block
    /// ends before it) or is not a fixed node with a `next` (the block ends with it).
    fn find_block_end(graph: &StructuredGraph, begin: NodeId) -> Result<NodeId> {
        let mut current = begin;
        loop {
            let next = graph
                .get(current)
                .next()
                .ok_or_else(|| malformed_graph!("Fixed node {} has no next", current))?;
            let kind = graph.kind(next);
            if kind.is_begin() {
                return Ok(current);
            } else if kind.is_fixed_with_next() {
                current = next;
            } else {
                return Ok(next);
            }
        }
    }

    fn owning_block(&self, node: NodeId) -> Result<BlockId> {
        self.node_to_block
            .get(node.index())
            .copied()
            .flatten()
            .ok_or_else(|| malformed_graph!("Node {} does not belong to any block", node))
    }

    fn connect_blocks(&mut self) -> Result<()> {
        let graph = self.graph;
        for index in 0..self.blocks.len() {
            let (begin, end) = (self.blocks[index].begin, self.blocks[index].end);

            let predecessors = match graph.kind(begin) {
                NodeKind::Start => Vec::new(),
                NodeKind::Merge { ends } => ends
                    .iter()
                    .map(|&end| self.owning_block(end))
                    .collect::<Result<Vec<_>>>()?,
                NodeKind::LoopBegin {
                    ends, loop_ends, ..
                } => ends
                    .iter()
                    .chain(loop_ends)
                    .map(|&end| self.owning_block(end))
                    .collect::<Result<Vec<_>>>()?,
                _ => {
                    let predecessor = graph.get(begin).predecessor().ok_or_else(|| {
                        malformed_graph!("Disconnected control flow {} encountered", begin)
                    })?;
                    vec![self.owning_block(predecessor)?]
                }
            };

            let successors = match graph.kind(end) {
                NodeKind::End { merge } => vec![self.owning_block(*merge)?],
                NodeKind::LoopEnd { loop_begin } => vec![self.owning_block(*loop_begin)?],
                kind if kind.is_control_split() => kind
                    .split_successors()
                    .into_iter()
                    .map(|successor| self.owning_block(successor))
                    .collect::<Result<Vec<_>>>()?,
                kind if kind.is_control_sink() => Vec::new(),
                _ => {
                    let next = graph
                        .get(end)
                        .next()
                        .ok_or_else(|| malformed_graph!("Fixed node {} has no next", end))?;
                    vec![self.owning_block(next)?]
                }
            };

            let block = &mut self.blocks[index];
            block.predecessors = predecessors;
            block.successors = successors;
        }
        Ok(())
    }

    /// Builds one control flow graph per program graph, in parallel.
    ///
    /// Every graph is processed independently with the same `config`; a failure for one graph
    /// does not affect the others.
    #[must_use]
    pub fn build_many(
        graphs: &'g [StructuredGraph],
        config: BuildConfiguration,
    ) -> Vec<Result<ControlFlowGraph<'g>>> {
        graphs
            .par_iter()
            .map(|graph| Self::builder(graph).with_configuration(config).build())
            .collect()
    }

    /// The program graph this CFG was built from.
    #[must_use]
    pub fn graph(&self) -> &'g StructuredGraph {
        self.graph
    }

    /// The analyses this CFG currently holds.
    #[must_use]
    pub fn build_configuration(&self) -> BuildConfiguration {
        self.config
    }

    /// All blocks in reverse post order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the block with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this CFG.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// The block containing the start node.
    #[must_use]
    pub fn start_block(&self) -> &Block {
        &self.blocks[0]
    }

    /// The block containing `node`, if the node is a fixed node of the method.
    #[must_use]
    pub fn block_for(&self, node: NodeId) -> Option<BlockId> {
        self.node_to_block.get(node.index()).copied().flatten()
    }

    /// The block of every node, indexed by node index.
    #[must_use]
    pub fn node_to_block(&self) -> &[Option<BlockId>] {
        &self.node_to_block
    }

    /// All loops, outer loops before the loops nested in them.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Returns the loop with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this CFG.
    #[must_use]
    pub fn loop_at(&self, id: LoopId) -> &Loop {
        &self.loops[id.0]
    }

    /// The innermost loop containing `block`.
    #[must_use]
    pub fn loop_of(&self, block: BlockId) -> Option<&Loop> {
        self.blocks[block.0].loop_id.map(|id| &self.loops[id.0])
    }

    /// Loop nesting depth of `block`; 0 outside of any loop.
    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> usize {
        self.loop_of(block).map_or(0, Loop::depth)
    }

    /// Returns `true` if `block` belongs to `loop_id` or to a loop nested in it.
    #[must_use]
    pub fn loop_contains(&self, loop_id: LoopId, block: BlockId) -> bool {
        let mut current = self.blocks[block.0].loop_id;
        while let Some(candidate) = current {
            if candidate == loop_id {
                return true;
            }
            current = self.loops[candidate.0].parent;
        }
        false
    }

    /// The deepest dominator tree depth of any block.
    #[must_use]
    pub fn max_dominator_depth(&self) -> usize {
        self.max_dominator_depth
    }

    /// Iterates over the nodes of `block`, from its begin node to its end node.
    pub fn block_nodes(&self, block: BlockId) -> BlockNodes<'g> {
        let block = &self.blocks[block.0];
        BlockNodes::new(self.graph, block.begin, block.end)
    }

    /// Returns `true` if `block` is the exception continuation of an invoke.
    #[must_use]
    pub fn is_exception_entry(&self, block: BlockId) -> bool {
        let begin = self.blocks[block.0].begin;
        self.graph
            .get(begin)
            .predecessor()
            .is_some_and(|predecessor| {
                matches!(
                    self.graph.kind(predecessor),
                    NodeKind::InvokeWithException { exception_edge, .. } if *exception_edge == begin
                )
            })
    }

    /// The local frequency of the loop headed by `loop_begin`.
    ///
    /// `None` if frequencies were not computed or `loop_begin` is not a loop header.
    #[must_use]
    pub fn local_loop_frequency(&self, loop_begin: NodeId) -> Option<f64> {
        self.local_loop_frequency_data
            .get(&loop_begin)
            .map(LoopFrequencyData::loop_frequency)
    }

    /// The provenance of the local frequency of the loop headed by `loop_begin`.
    #[must_use]
    pub fn local_loop_frequency_source(&self, loop_begin: NodeId) -> Option<ProfileSource> {
        self.local_loop_frequency_data
            .get(&loop_begin)
            .map(LoopFrequencyData::profile_source)
    }

    /// All local loop frequencies keyed by loop header.
    #[must_use]
    pub fn local_loop_frequency_data(&self) -> &FxHashMap<NodeId, LoopFrequencyData> {
        &self.local_loop_frequency_data
    }

    /// Replaces the cached local frequency of a loop with `updater(current)`.
    ///
    /// Later queries on this CFG see the updated value. The program graph is not changed, so
    /// a newly built CFG computes the frequency from the branch probabilities again. Phases use
    /// this to record the effect of a loop transformation without rebuilding the CFG.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotComputed`] if no local frequency is known for `loop_begin`.
    pub fn update_cached_local_loop_frequency<F>(
        &mut self,
        loop_begin: NodeId,
        updater: F,
    ) -> Result<()>
    where
        F: FnOnce(LoopFrequencyData) -> LoopFrequencyData,
    {
        let data = self
            .local_loop_frequency_data
            .get_mut(&loop_begin)
            .ok_or(Error::NotComputed("Local loop frequencies"))?;
        *data = updater(*data);
        Ok(())
    }
}

/// Iterator over the nodes of a block, from its begin node to its end node.
#[derive(Debug, Clone)]
pub struct BlockNodes<'g> {
    graph: &'g StructuredGraph,
    next: Option<NodeId>,
    end: NodeId,
}

impl<'g> BlockNodes<'g> {
    fn new(graph: &'g StructuredGraph, begin: NodeId, end: NodeId) -> Self {
        BlockNodes {
            graph,
            next: Some(begin),
            end,
        }
    }
}

impl Iterator for BlockNodes<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = if current == self.end {
            None
        } else {
            self.graph.get(current).next()
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::cfg::BuildConfiguration,
        ir::{GuardsStage, EXCEPTION_PROBABILITY},
    };

    /// start -> fixed -> fixed -> return
    fn straight_line() -> (StructuredGraph, Vec<NodeId>) {
        let mut graph = StructuredGraph::new();
        let a = graph.add_fixed();
        let b = graph.add_fixed();
        let ret = graph.add_return();
        let nodes = vec![graph.start(), a, b, ret];
        graph.chain(&nodes).unwrap();
        (graph, nodes)
    }

    #[test]
    fn test_single_block() {
        let (graph, nodes) = straight_line();
        let cfg = ControlFlowGraph::compute_all(&graph).unwrap();

        assert_eq!(cfg.block_count(), 1);
        let start = cfg.start_block();
        assert_eq!(start.begin_node(), graph.start());
        assert_eq!(start.end_node(), nodes[3]);
        assert!(start.predecessors().is_empty());
        assert!(start.successors().is_empty());
        for node in &nodes {
            assert_eq!(cfg.block_for(*node), Some(BlockId::new(0)));
        }
        assert_eq!(cfg.block_nodes(BlockId::new(0)).collect::<Vec<_>>(), nodes);
    }

    #[test]
    fn test_begin_after_fixed_splits_block() {
        let mut graph = StructuredGraph::new();
        let fixed = graph.add_fixed();
        let begin = graph.add_begin();
        let ret = graph.add_return();
        graph.chain(&[graph.start(), fixed, begin, ret]).unwrap();

        let cfg = ControlFlowGraph::compute_all(&graph).unwrap();
        assert_eq!(cfg.block_count(), 2);
        assert_eq!(cfg.block(BlockId::new(0)).end_node(), fixed);
        assert_eq!(cfg.block(BlockId::new(0)).successors(), &[BlockId::new(1)]);
        assert_eq!(cfg.block(BlockId::new(1)).predecessors(), &[BlockId::new(0)]);
        assert_eq!(cfg.block_for(ret), Some(BlockId::new(1)));
    }

    #[test]
    fn test_disconnected_begin_rejected() {
        let (mut graph, _) = straight_line();
        let orphan = graph.add_begin();
        let ret = graph.add_return();
        graph.set_next(orphan, ret).unwrap();

        let err = ControlFlowGraph::compute_all(&graph).unwrap_err();
        assert!(matches!(err, Error::MalformedGraph { ref message, .. } if message.contains("Disconnected")));
    }

    #[test]
    fn test_missing_next_rejected() {
        let mut graph = StructuredGraph::new();
        let fixed = graph.add_fixed();
        graph.set_next(graph.start(), fixed).unwrap();

        let err = ControlFlowGraph::compute_all(&graph).unwrap_err();
        assert!(matches!(err, Error::MalformedGraph { .. }));
    }

    #[test]
    fn test_unreachable_merge_rejected() {
        let (mut graph, _) = straight_line();
        let merge = graph.add_merge();
        let ret = graph.add_return();
        graph.set_next(merge, ret).unwrap();

        let err = ControlFlowGraph::compute_all(&graph).unwrap_err();
        assert!(matches!(err, Error::MalformedGraph { ref message, .. } if message.contains("not reachable")));
    }

    #[test]
    fn test_exception_entry() {
        let mut graph = StructuredGraph::new();
        let normal = graph.add_begin();
        let exceptional = graph.add_begin();
        let invoke = graph
            .add_invoke_with_exception(normal, exceptional, EXCEPTION_PROBABILITY)
            .unwrap();
        graph.set_next(graph.start(), invoke).unwrap();
        let ret = graph.add_return();
        let unwind = graph.add_unwind();
        graph.set_next(normal, ret).unwrap();
        graph.set_next(exceptional, unwind).unwrap();

        let cfg = ControlFlowGraph::compute_all(&graph).unwrap();
        let normal_block = cfg.block_for(normal).unwrap();
        let exception_block = cfg.block_for(exceptional).unwrap();
        assert!(!cfg.is_exception_entry(normal_block));
        assert!(cfg.is_exception_entry(exception_block));
        assert_eq!(
            cfg.start_block().successors(),
            &[normal_block, exception_block]
        );
    }

    #[test]
    fn test_build_many_in_parallel() {
        let mut graphs = Vec::new();
        for _ in 0..8 {
            graphs.push(straight_line().0);
        }
        let mut broken = StructuredGraph::new();
        broken.set_guards_stage(GuardsStage::AfterFsa);
        let fixed = broken.add_fixed();
        broken.set_next(broken.start(), fixed).unwrap();
        graphs.push(broken);

        let results = ControlFlowGraph::build_many(&graphs, BuildConfiguration::all());
        assert_eq!(results.len(), 9);
        assert!(results[..8].iter().all(Result::is_ok));
        assert!(results[8].is_err());
    }
}
