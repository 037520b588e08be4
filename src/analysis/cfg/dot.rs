//! Graphviz export of a control flow graph.

use std::fmt::Write;

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph},
    utils::escape_dot,
};

impl ControlFlowGraph<'_> {
    /// Renders the graph in DOT format.
    ///
    /// Each block becomes a node labelled with its id, its begin and end node and its relative
    /// frequency. Loop headers are drawn as double octagons and back edges dashed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flowscope::{analysis::ControlFlowGraph, ir::StructuredGraph};
    ///
    /// let mut graph = StructuredGraph::new();
    /// graph.set_name("identity");
    /// let ret = graph.add_return();
    /// graph.set_next(graph.start(), ret)?;
    ///
    /// let dot = ControlFlowGraph::compute_all(&graph)?.to_dot();
    /// assert!(dot.starts_with("digraph \"identity\" {"));
    /// assert!(dot.contains("B0"));
    /// # Ok::<(), flowscope::Error>(())
    /// ```
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let name = escape_dot(self.graph.name().unwrap_or("cfg"));
        // Writing into a String cannot fail.
        let _ = writeln!(out, "digraph \"{name}\" {{");
        let _ = writeln!(out, "  node [shape=box, fontname=\"monospace\"];");

        for block in &self.blocks {
            let begin = escape_dot(self.graph.kind(block.begin).name());
            let end = escape_dot(self.graph.kind(block.end).name());
            let shape = if block.loop_header {
                ", shape=doubleoctagon"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  {} [label=\"{}\\n{} {} .. {} {}\\nfreq {:.4}\"{}];",
                block.id,
                block.id,
                block.begin,
                begin,
                block.end,
                end,
                block.relative_frequency,
                shape
            );
        }

        for block in &self.blocks {
            for &successor in &block.successors {
                let style = if self.is_back_edge(block.id, successor) {
                    " [style=dashed]"
                } else {
                    ""
                };
                let _ = writeln!(out, "  {} -> {}{};", block.id, successor, style);
            }
        }

        out.push_str("}\n");
        out
    }

    fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.blocks[from.0].loop_end && self.blocks[to.0].loop_header
    }
}
