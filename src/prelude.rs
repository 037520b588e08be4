//! # flowscope Prelude
//!
//! Re-exports of the types needed to build a program graph and analyze it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all flowscope operations
pub use crate::Error;

/// The result type used throughout flowscope
pub use crate::Result;

/// Options read while building a control flow graph
pub use crate::CfgOptions;

// ================================================================================================
// Program Graph
// ================================================================================================

/// The node arena the control flow graph is derived from, and its node types
pub use crate::ir::{GuardsStage, Kills, LocationIdentity, NodeId, NodeKind, StructuredGraph};

/// Profile provenance and cached loop frequencies
pub use crate::ir::{LoopFrequencyData, ProfileSource};

// ================================================================================================
// Control Flow Analysis
// ================================================================================================

/// The control flow graph and its builder
pub use crate::analysis::{BuildConfiguration, ControlFlowGraph, ControlFlowGraphBuilder};

/// Blocks and loops
pub use crate::analysis::{Block, BlockId, Loop, LoopId};

/// Memory kill sets and dominator tree traversal
pub use crate::analysis::{LocationSet, LoggingVisitor, RecursiveVisitor};

/// Frequency arithmetic
pub use crate::analysis::{
    multiply_relative_frequencies, MAX_RELATIVE_FREQUENCY, MIN_RELATIVE_FREQUENCY,
};
