//! Reverse post order of the basic blocks, inner loops first.
//!
//! Blocks are numbered by a worklist traversal starting at the start node. The traversal keeps
//! one worklist frame per open loop:
//!
//! - A block is numbered when its begin node is taken from a worklist.
//! - A merge (or loop header) is queued once all of its forward ends have been numbered.
//! - A loop end only counts towards its loop; the header is already numbered.
//! - A loop exit is not queued. It is recorded on its loop and released only after the loop's
//!   frame ran empty, at which point every loop end and every exit predecessor must have been
//!   seen. All exits of the loop are then numbered at once, in declaration order, and their
//!   continuations are queued on the enclosing frame.
//! - Control split successors are queued in reverse so that they are taken in declared order.
//!
//! Because an exhausted frame is the only way to release exits, code following a loop is never
//! numbered while some block inside the loop (or inside a nested loop) is still waiting. This
//! gives the "inner loops first" property the frequency computation depends on.
//!
//! The second half of this module replays that property over a finished block order
//! ([`inner_loops_first`]) and reports when each loop is closed.

use rustc_hash::FxHashMap;

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph},
    ir::{NodeId, NodeKind, StructuredGraph},
    utils::BitSet,
    Result,
};

#[derive(Debug, Default)]
struct LoopProgress {
    ends_visited: usize,
    exit_predecessors_visited: usize,
}

#[derive(Debug)]
struct Frame {
    loop_begin: Option<NodeId>,
    worklist: Vec<NodeId>,
}

/// Computes the reverse post order of the begin nodes of `graph`.
pub(crate) struct ReversePostOrder<'g> {
    graph: &'g StructuredGraph,
    block_ends: &'g [Option<NodeId>],
    order: Vec<NodeId>,
    visited: BitSet,
    forward_ends_visited: FxHashMap<NodeId, usize>,
    loops: FxHashMap<NodeId, LoopProgress>,
    frames: Vec<Frame>,
}

impl<'g> ReversePostOrder<'g> {
    /// Creates the traversal.
    ///
    /// `block_ends` maps every begin node (by index) to the last node of its block.
    pub(crate) fn new(graph: &'g StructuredGraph, block_ends: &'g [Option<NodeId>]) -> Self {
        ReversePostOrder {
            graph,
            block_ends,
            order: Vec::new(),
            visited: BitSet::new(graph.node_count()),
            forward_ends_visited: FxHashMap::default(),
            loops: FxHashMap::default(),
            frames: Vec::new(),
        }
    }

    /// Runs the traversal and returns the begin nodes in reverse post order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedGraph`] if a loop exit or loop end is reached before its
    /// loop header, if a loop's worklist runs out before all of its ends and exit predecessors
    /// were reached, or if a begin node is reached twice.
    pub(crate) fn compute(mut self) -> Result<Vec<NodeId>> {
        self.frames.push(Frame {
            loop_begin: None,
            worklist: vec![self.graph.start()],
        });

        while let Some(frame) = self.frames.last_mut() {
            if let Some(begin) = frame.worklist.pop() {
                self.visit(begin)?;
                continue;
            }

            let Some(Frame {
                loop_begin: Some(loop_begin),
                ..
            }) = self.frames.pop()
            else {
                break;
            };
            self.release_exits(loop_begin)?;
        }

        Ok(self.order)
    }

    fn release_exits(&mut self, loop_begin: NodeId) -> Result<()> {
        let loop_ends = self.graph.loop_ends(loop_begin).len();
        let loop_exits = self.graph.loop_exits(loop_begin);
        let progress = self.loops.get(&loop_begin).ok_or_else(|| {
            malformed_graph!("Loop {} has a worklist but was never opened", loop_begin)
        })?;
        if progress.ends_visited != loop_ends
            || progress.exit_predecessors_visited != loop_exits.len()
        {
            return Err(malformed_graph!(
                "Worklist of loop {} exhausted with {}/{} loop ends and {}/{} exit predecessors visited",
                loop_begin,
                progress.ends_visited,
                loop_ends,
                progress.exit_predecessors_visited,
                loop_exits.len()
            ));
        }
        for &exit in loop_exits {
            self.visit(exit)?;
        }
        Ok(())
    }

    fn visit(&mut self, begin: NodeId) -> Result<()> {
        if !self.visited.insert(begin.index()) {
            return Err(malformed_graph!("Block of begin {} reached twice", begin));
        }
        self.order.push(begin);

        if matches!(self.graph.kind(begin), NodeKind::LoopBegin { .. }) {
            self.loops.insert(begin, LoopProgress::default());
            self.frames.push(Frame {
                loop_begin: Some(begin),
                worklist: Vec::new(),
            });
        }

        let end = self.block_ends[begin.index()]
            .ok_or_else(|| malformed_graph!("Begin {} has no block end", begin))?;

        match self.graph.kind(end) {
            NodeKind::End { merge } => {
                let merge = *merge;
                let visited = self.forward_ends_visited.entry(merge).or_insert(0);
                *visited += 1;
                if *visited == self.graph.forward_ends(merge).len() {
                    self.enqueue(merge)?;
                }
            }
            NodeKind::LoopEnd { loop_begin } => {
                let progress = self.loops.get_mut(loop_begin).ok_or_else(|| {
                    malformed_graph!("Loop end {} reached before loop {}", end, loop_begin)
                })?;
                progress.ends_visited += 1;
            }
            kind if kind.is_control_split() => {
                for successor in kind.split_successors().into_iter().rev() {
                    self.enqueue(successor)?;
                }
            }
            kind if kind.is_control_sink() => {}
            _ => {
                let next = self
                    .graph
                    .get(end)
                    .next()
                    .ok_or_else(|| malformed_graph!("Fixed node {} has no next", end))?;
                self.enqueue(next)?;
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, begin: NodeId) -> Result<()> {
        if let NodeKind::LoopExit { loop_begin } = self.graph.kind(begin) {
            let progress = self.loops.get_mut(loop_begin).ok_or_else(|| {
                malformed_graph!(
                    "Loop exit {} with no registered owning loop {}",
                    begin,
                    loop_begin
                )
            })?;
            progress.exit_predecessors_visited += 1;
            return Ok(());
        }
        match self.frames.last_mut() {
            Some(frame) => {
                frame.worklist.push(begin);
                Ok(())
            }
            None => Err(malformed_graph!("No open worklist for {}", begin)),
        }
    }
}

/// An event of the inner-loops-first replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RpoEvent {
    /// The next block in order.
    Block(BlockId),
    /// Every loop end and every loop exit of the loop with this header was seen.
    LoopClosed(NodeId),
}

#[derive(Debug)]
struct OpenLoop {
    loop_begin: NodeId,
    ends_visited: usize,
    exits_visited: usize,
}

impl OpenLoop {
    fn all_ends_visited(&self, graph: &StructuredGraph) -> bool {
        self.ends_visited == graph.loop_ends(self.loop_begin).len()
    }

    fn fully_processed(&self, graph: &StructuredGraph) -> bool {
        self.all_ends_visited(graph) && self.exits_visited == graph.loop_exits(self.loop_begin).len()
    }
}

/// Replays the block order and checks that every inner loop is closed before any outer loop.
///
/// A loop is closed once all of its loop ends and loop exits were seen. The returned events
/// interleave each block with the closing of loops, in the order a frequency pass has to
/// observe them.
///
/// A block can be an exit of an inner loop and at the same time end with a back edge of an
/// outer loop, possibly through a chain of single-successor blocks. That back edge may be seen
/// while the inner loop is still open; it is then attributed to the outer loop found further
/// down the stack.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedGraph`] if a loop is exited or ended while a different
/// loop is innermost, if an exit is seen before all ends of its loop, or if loops remain open
/// after the last block.
pub(crate) fn inner_loops_first(cfg: &ControlFlowGraph<'_>) -> Result<Vec<RpoEvent>> {
    let graph = cfg.graph();
    let mut events = Vec::with_capacity(cfg.block_count());
    let mut open: Vec<OpenLoop> = Vec::new();

    for block in cfg.blocks() {
        if block.is_loop_header() {
            open.push(OpenLoop {
                loop_begin: block.begin_node(),
                ends_visited: 0,
                exits_visited: 0,
            });
        }

        events.push(RpoEvent::Block(block.id()));

        let mut was_exit = sequential_predecessor_is_loop_exit(cfg, block.id());

        if let NodeKind::LoopExit { loop_begin } = graph.kind(block.begin_node()) {
            let innermost = open.last_mut().ok_or_else(|| {
                malformed_graph!("Loop exit {} with no open loop", block.begin_node())
            })?;
            if innermost.loop_begin != *loop_begin {
                return Err(malformed_graph!(
                    "Must close inner loops first: open loop {}, exited loop {}, block {}",
                    innermost.loop_begin,
                    loop_begin,
                    block.id()
                ));
            }
            if !innermost.all_ends_visited(graph) {
                return Err(malformed_graph!(
                    "Loop ends of {} must be visited before its exit {}",
                    loop_begin,
                    block.begin_node()
                ));
            }
            innermost.exits_visited += 1;
            if innermost.fully_processed(graph) {
                events.push(RpoEvent::LoopClosed(*loop_begin));
                open.pop();
            }
            was_exit = true;
        }

        if let NodeKind::LoopEnd { loop_begin } = graph.kind(block.end_node()) {
            let index = if was_exit {
                open.iter()
                    .rposition(|candidate| candidate.loop_begin == *loop_begin)
            } else {
                open.len().checked_sub(1)
            };
            let Some(index) = index else {
                return Err(malformed_graph!(
                    "Loop end {} of {} outside of an open loop",
                    block.end_node(),
                    loop_begin
                ));
            };
            let target = &mut open[index];
            if target.loop_begin != *loop_begin {
                return Err(malformed_graph!(
                    "Must close inner loops first: open loop {}, ended loop {}, block {}",
                    target.loop_begin,
                    loop_begin,
                    block.id()
                ));
            }
            target.ends_visited += 1;
            if target.fully_processed(graph) {
                events.push(RpoEvent::LoopClosed(*loop_begin));
                open.remove(index);
            }
        }
    }

    if let Some(unfinished) = open.last() {
        return Err(malformed_graph!(
            "{} loops left open, innermost {}",
            open.len(),
            unfinished.loop_begin
        ));
    }
    Ok(events)
}

/// Returns `true` if a chain of single-successor predecessors of `block` starts at a loop exit.
///
/// Graphs that are not fully canonicalized can split a loop exit and a following back edge of an
/// outer loop across several sequential blocks.
fn sequential_predecessor_is_loop_exit(cfg: &ControlFlowGraph<'_>, block: BlockId) -> bool {
    let mut current = cfg.block(block);
    while let [predecessor] = current.predecessors() {
        let predecessor = cfg.block(*predecessor);
        if predecessor.successors().len() != 1 {
            break;
        }
        if matches!(
            cfg.graph().kind(predecessor.begin_node()),
            NodeKind::LoopExit { .. }
        ) {
            return true;
        }
        current = predecessor;
    }
    false
}
