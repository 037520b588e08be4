//! Analyses over program graphs.
//!
//! - [`cfg`] - Control flow graph construction, frequencies, loops, dominators and memory kill
//!   queries
//!
//! The primary types are re-exported here.

pub mod cfg;

pub use cfg::{
    multiply_relative_frequencies, multiply_relative_frequencies3, Block, BlockId, BlockNodes,
    BuildConfiguration, ControlFlowGraph, ControlFlowGraphBuilder, LocationSet, LoggingVisitor,
    Loop, LoopId, RecursiveVisitor, LAST_VALID_BLOCK_INDEX, MAX_RELATIVE_FREQUENCY,
    MIN_RELATIVE_FREQUENCY,
};
