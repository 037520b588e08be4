// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # flowscope
//!
//! Control flow graph construction and analysis for an optimizing compiler's structured
//! program graph.
//!
//! `flowscope` takes a [`ir::StructuredGraph`], a graph of fixed nodes with explicit block
//! begins, probability annotated control splits and closed-form loops, and derives the basic
//! block view the later compiler phases work on.
//!
//! ## Features
//!
//! - **Block identification** - Basic blocks numbered in a reverse post order that keeps loop
//!   bodies contiguous and closes inner loops first
//! - **Relative frequencies** - Expected executions per method entry, computed in two passes so
//!   that every loop is scaled by its own local iteration count
//! - **Loop analysis** - Nesting, membership, natural exits and loop exits, including branches
//!   that leave a loop by deoptimizing
//! - **Dominators and postdominators** - A dominator tree with constant time `dominates`
//! - **Memory kill queries** - Memoized sets of memory locations a block, a loop or the paths
//!   between a block and its dominator may overwrite
//! - **Dominator tree visitors** - Iterative traversals, optionally deferring loop exits until
//!   the loop is finished
//!
//! ## Quick Start
//!
//! ```rust
//! use flowscope::prelude::*;
//!
//! // if (p) { ... } else { ... } return
//! let mut graph = StructuredGraph::new();
//! let then_begin = graph.add_begin();
//! let else_begin = graph.add_begin();
//! let split = graph.add_if(then_begin, else_begin, 0.25)?;
//! graph.set_next(graph.start(), split)?;
//! let merge = graph.add_merge();
//! let then_end = graph.add_end(merge)?;
//! let else_end = graph.add_end(merge)?;
//! graph.set_next(then_begin, then_end)?;
//! graph.set_next(else_begin, else_end)?;
//! let ret = graph.add_return();
//! graph.set_next(merge, ret)?;
//!
//! let cfg = ControlFlowGraph::compute_all(&graph)?;
//! assert_eq!(cfg.block_count(), 4);
//!
//! let then_block = cfg.block_for(then_begin).unwrap();
//! assert!((cfg.block(then_block).relative_frequency() - 0.25).abs() < 1e-9);
//! # Ok::<(), flowscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`ir`] - The program graph the CFG is built from
//! - [`analysis`] - The control flow graph and its analyses
//! - [`CfgOptions`] - Per-graph options read during construction
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! `flowscope` reports through the [`log`] facade: build summaries and unexpected loop exits
//! at `debug`, diverging loop frequency estimates at `warn` and dominator tree walks traced by
//! [`analysis::LoggingVisitor`] at `trace`. Install any `log` compatible logger to see them.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). A failed build always means
//! the program graph is not in the expected shape:
//!
//! ```rust
//! use flowscope::{analysis::ControlFlowGraph, ir::StructuredGraph, Error};
//!
//! let mut graph = StructuredGraph::new();
//! let fixed = graph.add_fixed();
//! graph.set_next(graph.start(), fixed)?;
//!
//! match ControlFlowGraph::compute_all(&graph) {
//!     Err(Error::MalformedGraph { message, .. }) => println!("Rejected: {message}"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! # Ok::<(), flowscope::Error>(())
//! ```
#[macro_use]
pub(crate) mod error;
pub(crate) mod utils;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use flowscope::prelude::*;
///
/// let mut graph = StructuredGraph::new();
/// let ret = graph.add_return();
/// graph.set_next(graph.start(), ret)?;
/// let cfg = ControlFlowGraph::compute_for_schedule(&graph)?;
/// assert_eq!(cfg.start_block().id(), BlockId::new(0));
/// # Ok::<(), flowscope::Error>(())
/// ```
pub mod prelude;

/// Options controlling control flow graph construction.
pub mod config;

/// The structured program graph consumed by the analyses.
pub mod ir;

/// Control flow graph construction and the analyses computed over it.
///
/// # Key Types
///
/// - [`analysis::ControlFlowGraph`] - Blocks, loops and query API
/// - [`analysis::ControlFlowGraphBuilder`] - Selects the analyses to run
/// - [`analysis::LocationSet`] - Killed memory locations
/// - [`analysis::RecursiveVisitor`] - Dominator tree traversal callbacks
pub mod analysis;

/// `flowscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `flowscope` Error type
///
/// The main error type for all operations in this crate. Every variant describes either a
/// program graph the builder cannot handle or a query for an analysis that was not computed.
pub use error::Error;

/// Per-graph construction options.
///
/// See [`config::CfgOptions`].
pub use config::CfgOptions;
