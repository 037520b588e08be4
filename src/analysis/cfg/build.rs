//! Selection and scheduling of the analyses run on a control flow graph.

use bitflags::bitflags;

use crate::{
    analysis::cfg::{rpo::inner_loops_first, ControlFlowGraph},
    ir::StructuredGraph,
    Result,
};

bitflags! {
    /// The analyses a [`ControlFlowGraph`] holds.
    ///
    /// Block identification and ordering always run; every flag adds one analysis on top.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BuildConfiguration : u8 {
        /// Relative block frequencies and local loop frequencies
        const FREQUENCIES = 0b0001;
        /// Loop nesting, membership and exits
        const LOOPS = 0b0010;
        /// Dominator tree and dominator numbering
        const DOMINATORS = 0b0100;
        /// Immediate postdominators
        const POSTDOMINATORS = 0b1000;
        /// What the scheduler needs: everything but postdominators
        const SCHEDULE = Self::FREQUENCIES.bits() | Self::LOOPS.bits() | Self::DOMINATORS.bits();
    }
}

impl BuildConfiguration {
    /// Returns `true` if this configuration computes at least everything `other` computes.
    #[must_use]
    pub fn not_weaker_than(self, other: BuildConfiguration) -> bool {
        self.contains(other)
    }
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        BuildConfiguration::all()
    }
}

/// Fluent construction of a [`ControlFlowGraph`].
///
/// # Examples
///
/// ```rust
/// use flowscope::{analysis::ControlFlowGraph, ir::StructuredGraph};
///
/// let mut graph = StructuredGraph::new();
/// let ret = graph.add_return();
/// graph.set_next(graph.start(), ret)?;
///
/// let cfg = ControlFlowGraph::builder(&graph)
///     .frequencies(true)
///     .dominators(true)
///     .build()?;
/// assert_eq!(cfg.block_count(), 1);
/// # Ok::<(), flowscope::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ControlFlowGraphBuilder<'g> {
    graph: &'g StructuredGraph,
    config: BuildConfiguration,
}

impl<'g> ControlFlowGraphBuilder<'g> {
    /// Creates a builder that computes no analysis.
    #[must_use]
    pub fn new(graph: &'g StructuredGraph) -> Self {
        ControlFlowGraphBuilder {
            graph,
            config: BuildConfiguration::empty(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn with_configuration(mut self, config: BuildConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Toggles relative block frequencies.
    #[must_use]
    pub fn frequencies(mut self, enabled: bool) -> Self {
        self.config.set(BuildConfiguration::FREQUENCIES, enabled);
        self
    }

    /// Toggles loop information.
    #[must_use]
    pub fn loops(mut self, enabled: bool) -> Self {
        self.config.set(BuildConfiguration::LOOPS, enabled);
        self
    }

    /// Toggles the dominator tree.
    #[must_use]
    pub fn dominators(mut self, enabled: bool) -> Self {
        self.config.set(BuildConfiguration::DOMINATORS, enabled);
        self
    }

    /// Toggles postdominators.
    #[must_use]
    pub fn postdominators(mut self, enabled: bool) -> Self {
        self.config.set(BuildConfiguration::POSTDOMINATORS, enabled);
        self
    }

    /// Builds the blocks and runs the selected analyses.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedGraph`] or [`crate::Error::GraphTooLarge`] if the program
    /// graph cannot be partitioned into ordered blocks, or if verification is enabled and fails.
    pub fn build(self) -> Result<ControlFlowGraph<'g>> {
        let mut cfg = ControlFlowGraph::identify_blocks(self.graph)?;
        cfg.compute_missing(self.config)?;
        log::debug!(
            "Built CFG{} with {} blocks and {} loops ({:?})",
            self.graph
                .name()
                .map(|name| format!(" for {name}"))
                .unwrap_or_default(),
            cfg.block_count(),
            cfg.loops().len(),
            cfg.build_configuration()
        );
        Ok(cfg)
    }
}

impl<'g> ControlFlowGraph<'g> {
    /// Starts building a control flow graph for `graph`.
    #[must_use]
    pub fn builder(graph: &'g StructuredGraph) -> ControlFlowGraphBuilder<'g> {
        ControlFlowGraphBuilder::new(graph)
    }

    /// Builds a control flow graph with every analysis.
    ///
    /// # Errors
    ///
    /// See [`ControlFlowGraphBuilder::build`].
    pub fn compute_all(graph: &'g StructuredGraph) -> Result<Self> {
        Self::builder(graph)
            .with_configuration(BuildConfiguration::all())
            .build()
    }

    /// Builds a control flow graph with what instruction scheduling needs.
    ///
    /// # Errors
    ///
    /// See [`ControlFlowGraphBuilder::build`].
    pub fn compute_for_schedule(graph: &'g StructuredGraph) -> Result<Self> {
        Self::builder(graph)
            .with_configuration(BuildConfiguration::SCHEDULE)
            .build()
    }

    /// Runs the analyses of `requested` that this graph does not hold yet.
    ///
    /// Analyses already present are not recomputed. Memoized kill location sets are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedGraph`] if the block order violates the inner loops
    /// first property, or if verification is enabled and fails.
    pub fn compute_missing(&mut self, requested: BuildConfiguration) -> Result<()> {
        let options = self.graph.options().clone();

        if options.dump_end_versus_exit_loop_frequencies {
            self.ensure_loops();
            self.ensure_dominators();
        }
        if requested.contains(BuildConfiguration::FREQUENCIES)
            && !self.config.contains(BuildConfiguration::FREQUENCIES)
        {
            self.compute_frequencies()?;
            self.config.insert(BuildConfiguration::FREQUENCIES);
        }
        if requested.contains(BuildConfiguration::LOOPS) {
            self.ensure_loops();
        }
        if requested.contains(BuildConfiguration::DOMINATORS) {
            let fresh = !self.config.contains(BuildConfiguration::DOMINATORS);
            self.ensure_dominators();
            if fresh && options.verify {
                inner_loops_first(self)?;
            }
        }
        if requested.contains(BuildConfiguration::POSTDOMINATORS)
            && !self.config.contains(BuildConfiguration::POSTDOMINATORS)
        {
            self.compute_postdominators();
            self.config.insert(BuildConfiguration::POSTDOMINATORS);
        }

        for block in &mut self.blocks {
            block.clear_kill_caches();
        }
        for l in &mut self.loops {
            l.kill_locations.take();
        }

        if options.verify {
            self.verify()?;
        }
        Ok(())
    }

    fn ensure_loops(&mut self) {
        if !self.config.contains(BuildConfiguration::LOOPS) {
            self.compute_loop_information();
            self.config.insert(BuildConfiguration::LOOPS);
        }
    }

    fn ensure_dominators(&mut self) {
        if !self.config.contains(BuildConfiguration::DOMINATORS) {
            self.compute_dominators();
            self.config.insert(BuildConfiguration::DOMINATORS);
        }
    }
}
