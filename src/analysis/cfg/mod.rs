//! Control Flow Graph (CFG) construction and analysis.
//!
//! This module partitions the fixed nodes of a [`crate::ir::StructuredGraph`] into basic blocks
//! and computes the analyses a compiler's scheduler and optimizations query.
//!
//! # Architecture
//!
//! A [`ControlFlowGraph`] is built in stages, each selected by a [`BuildConfiguration`] flag:
//!
//! 1. **Block identification.** Every begin node opens a block that extends along `next`
//!    links. Blocks are numbered in a reverse post order in which the blocks of a loop are
//!    contiguous and inner loops come before the exits of their enclosing loops.
//! 2. **Frequencies.** Expected executions per method entry, derived from branch probabilities
//!    and per-loop iteration counts.
//! 3. **Loops.** Loop nesting, membership and exits.
//! 4. **Dominators.** The dominator tree with a numbering for constant time `dominates`.
//! 5. **Postdominators.** Immediate postdominators.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - Blocks, loops and the query API
//! - [`ControlFlowGraphBuilder`] - Selects the analyses to run
//! - [`Block`] / [`BlockId`] - A basic block and its position in block order
//! - [`Loop`] / [`LoopId`] - A natural loop
//! - [`LocationSet`] - Memory locations killed by a block or loop
//! - [`RecursiveVisitor`] - Dominator tree traversal callbacks
//!
//! # Memory Kill Queries
//!
//! [`ControlFlowGraph::kill_locations`], [`ControlFlowGraph::loop_kill_locations`] and
//! [`ControlFlowGraph::kill_locations_between_this_and_dominator`] are memoized in
//! [`std::sync::OnceLock`] cells on first use, so a shared CFG can be queried from several
//! threads.
//!
//! # Examples
//!
//! ```rust
//! use flowscope::{
//!     analysis::{BuildConfiguration, ControlFlowGraph},
//!     ir::StructuredGraph,
//! };
//!
//! let mut graph = StructuredGraph::new();
//! let header = graph.add_loop_begin();
//! let entry = graph.add_end(header)?;
//! graph.set_next(graph.start(), entry)?;
//! let body = graph.add_begin();
//! let exit = graph.add_loop_exit(header)?;
//! let split = graph.add_if(body, exit, 0.9)?;
//! graph.set_next(header, split)?;
//! let back_edge = graph.add_loop_end(header)?;
//! graph.set_next(body, back_edge)?;
//! let ret = graph.add_return();
//! graph.set_next(exit, ret)?;
//!
//! let cfg = ControlFlowGraph::builder(&graph)
//!     .with_configuration(BuildConfiguration::SCHEDULE)
//!     .build()?;
//! assert_eq!(cfg.loops().len(), 1);
//! assert!((cfg.local_loop_frequency(header).unwrap() - 10.0).abs() < 1e-9);
//! # Ok::<(), flowscope::Error>(())
//! ```

mod block;
mod build;
mod dominators;
mod dot;
mod frequency;
mod graph;
mod kill;
mod location;
mod loops;
mod rpo;
mod verify;
mod visitor;

pub use block::{Block, BlockId, LAST_VALID_BLOCK_INDEX};
pub use build::{BuildConfiguration, ControlFlowGraphBuilder};
pub use frequency::{
    multiply_relative_frequencies, multiply_relative_frequencies3, MAX_RELATIVE_FREQUENCY,
    MIN_RELATIVE_FREQUENCY,
};
pub use graph::{BlockNodes, ControlFlowGraph};
pub use location::LocationSet;
pub use loops::{Loop, LoopId};
pub use visitor::{LoggingVisitor, RecursiveVisitor};
