//! Per-graph options controlling control flow graph construction.
//!
//! [`CfgOptions`] is carried by every [`crate::ir::StructuredGraph`] and read by the
//! [`crate::analysis::ControlFlowGraph`] builder. The defaults produce the production behaviour;
//! the remaining toggles exist for diagnosing suspicious block frequencies.

/// Options for building a control flow graph.
///
/// # Example
///
/// ```rust
/// use flowscope::CfgOptions;
///
/// let options = CfgOptions {
///     dump_end_versus_exit_loop_frequencies: true,
///     ..CfgOptions::default()
/// };
/// assert!(!options.use_loop_end_frequencies);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CfgOptions {
    /// Derive a loop's local frequency from the frequencies of its loop ends instead of
    /// its loop exits (default: false).
    ///
    /// The end based estimate also accounts for control flow sinks inside the loop body, the
    /// exit based one only for regular exits.
    pub use_loop_end_frequencies: bool,

    /// Compare the end based and the exit based loop frequency for every loop and log a warning
    /// when they diverge (default: false).
    ///
    /// Enabling this also computes loop information and dominators before frequencies.
    pub dump_end_versus_exit_loop_frequencies: bool,

    /// Absolute difference between the end based and exit based loop frequency above which a
    /// divergence is reported (default: 1000.0).
    pub loop_exit_vs_loop_end_frequency_diff: f64,

    /// Run the structural verifier after every build (default: enabled in debug builds).
    pub verify: bool,
}

impl Default for CfgOptions {
    fn default() -> Self {
        Self {
            use_loop_end_frequencies: false,
            dump_end_versus_exit_loop_frequencies: false,
            loop_exit_vs_loop_end_frequency_diff: 1000.0,
            verify: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CfgOptions::default();
        assert!(!options.use_loop_end_frequencies);
        assert!(!options.dump_end_versus_exit_loop_frequencies);
        assert!((options.loop_exit_vs_loop_end_frequency_diff - 1000.0).abs() < f64::EPSILON);
        assert_eq!(options.verify, cfg!(debug_assertions));
    }
}
