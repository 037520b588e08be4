//! The instruction-level program graph.
//!
//! The control flow graph is derived from a [`StructuredGraph`]: an arena of [`Node`]s where
//! block boundaries are explicit begin nodes, branches are control splits with per-successor
//! probabilities, and loops are in closed form (every loop has explicit loop ends and, unless it
//! is endless, loop exits).
//!
//! # Key Components
//!
//! - [`StructuredGraph`] - The node arena and its builder API
//! - [`NodeId`] / [`NodeKind`] / [`Node`] - Node handles and their control flow role
//! - [`LocationIdentity`] / [`Kills`] - Memory locations written by a node
//! - [`ProfileSource`] / [`LoopFrequencyData`] - Provenance of probability estimates
//! - [`GuardsStage`] - Lowering stage, which changes how loop exits are computed

mod graph;
mod location;
mod node;
mod profile;

pub use graph::{GuardsStage, StructuredGraph, EXCEPTION_PROBABILITY};
pub use location::LocationIdentity;
pub use node::{Kills, Node, NodeId, NodeKind};
pub use profile::{LoopFrequencyData, ProfileSource};
