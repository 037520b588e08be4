use thiserror::Error;

use crate::ir::NodeId;

macro_rules! malformed_graph {
    // Single string version
    ($msg:expr) => {
        crate::Error::MalformedGraph {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedGraph {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Control flow graph construction is a deterministic function of its input graph. None of
/// these errors is transient: a failed build means the program graph handed in was not in the
/// shape the analyses rely on and has to be fixed by whoever produced it.
///
/// # Error Categories
///
/// ## Graph Shape Errors
/// - [`Error::MalformedGraph`] - The program graph violates a structural assumption of the CFG
///   builder (disconnected control flow, unfinished loops, unreachable blocks, ...)
/// - [`Error::InvalidProbability`] - A control split was given a probability outside `[0, 1]`
/// - [`Error::GraphError`] - A builder operation was applied to a node of the wrong kind
///
/// ## Capacity Errors
/// - [`Error::GraphTooLarge`] - The graph contains more blocks than a block id can address
///
/// ## Usage Errors
/// - [`Error::NotComputed`] - An analysis was queried that the build did not request
///
/// # Examples
///
/// ```rust
/// use flowscope::{Error, ir::StructuredGraph, analysis::ControlFlowGraph};
///
/// let mut graph = StructuredGraph::new();
/// let ret = graph.add_return();
/// graph.set_next(graph.start(), ret)?;
///
/// match ControlFlowGraph::compute_all(&graph) {
///     Ok(cfg) => println!("{} blocks", cfg.block_count()),
///     Err(Error::MalformedGraph { message, file, line }) => {
///         eprintln!("Malformed graph: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), flowscope::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The program graph is structurally unsound.
    ///
    /// Raised for every condition that indicates a bug in the component that produced the
    /// graph: a loop exit without an open owning loop, a loop whose worklist ran dry before all
    /// of its ends and exits were seen, a begin node without a predecessor, blocks that were never
    /// reached from the start node, and inner loops that are not closed before outer ones.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the offending node or block
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed graph - {file}:{line}: {message}")]
    MalformedGraph {
        /// The message to be printed for the MalformedGraph error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The graph has more basic blocks than can be numbered.
    ///
    /// Block ids are bounded by [`crate::analysis::LAST_VALID_BLOCK_INDEX`]. The associated value
    /// is that limit. Callers usually treat this as a bailout and skip compiling the method.
    #[error("Graph too large to safely compile in reasonable time. Graph contains more than {0} basic blocks")]
    GraphTooLarge(usize),

    /// A branch probability outside of `[0, 1]` (or NaN) was attached to a control split.
    #[error("Invalid probability {probability} for control split {node}")]
    InvalidProbability {
        /// The control split node the probability was attached to
        node: NodeId,
        /// The rejected probability
        probability: f64,
    },

    /// An analysis result was requested that this CFG was not built with.
    ///
    /// The associated value names the missing analysis. Use
    /// [`crate::analysis::ControlFlowGraph::compute_missing`] to upgrade an existing CFG.
    #[error("{0} have not been computed for this control flow graph")]
    NotComputed(&'static str),

    /// Graph construction error.
    ///
    /// Errors raised by the [`crate::ir::StructuredGraph`] builder methods when an edge is
    /// requested between nodes whose kinds do not allow it.
    #[error("{0}")]
    GraphError(String),
}
