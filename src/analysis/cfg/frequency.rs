//! Relative block frequencies.
//!
//! The relative frequency of a block is the expected number of its executions per execution of
//! the start block. Frequencies are computed in two passes over the blocks:
//!
//! 1. **Local pass.** Blocks are visited inner loops first. Every loop header starts at 1, so
//!    the blocks of a loop get frequencies relative to a single entry into the loop. When a loop
//!    is closed its local frequency is derived from its exit (or end) frequencies and its exits
//!    are rescaled to the frequency of the code entering the loop.
//! 2. **Global pass.** All frequencies are reset and recomputed in block order, now multiplying
//!    every loop header by the local loop frequency found in the first pass.
//!
//! All frequencies are clamped to `[MIN_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY]` so that
//! deep loop nests cannot underflow to 0 or overflow to infinity.

use crate::{
    analysis::cfg::{
        rpo::{inner_loops_first, RpoEvent},
        BlockId, ControlFlowGraph,
    },
    ir::{LoopFrequencyData, NodeId, ProfileSource},
    Result,
};

/// Smallest relative frequency a block can have, `2^-500`.
pub const MIN_RELATIVE_FREQUENCY: f64 = 3.054936363499605e-151;

/// Largest relative frequency a block can have, `2^500`.
pub const MAX_RELATIVE_FREQUENCY: f64 = 1.0 / MIN_RELATIVE_FREQUENCY;

/// Tolerance for the sanity checks of the local pass.
const FREQUENCY_DELTA: f64 = 0.01;

/// Frequency of a block not reached yet by the local pass.
const UNVISITED: f64 = -1.0;

fn clamp(frequency: f64) -> f64 {
    frequency.clamp(MIN_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY)
}

/// Multiplies two relative frequencies, clamping the product.
///
/// # Examples
///
/// ```rust
/// use flowscope::analysis::{multiply_relative_frequencies, MAX_RELATIVE_FREQUENCY};
///
/// assert_eq!(multiply_relative_frequencies(0.5, 4.0), 2.0);
/// assert_eq!(multiply_relative_frequencies(1e300, 1e300), MAX_RELATIVE_FREQUENCY);
/// ```
#[must_use]
pub fn multiply_relative_frequencies(a: f64, b: f64) -> f64 {
    debug_assert!(!a.is_nan() && a.is_finite(), "invalid frequency {a}");
    debug_assert!(!b.is_nan() && b.is_finite(), "invalid frequency {b}");
    clamp(a * b)
}

/// Multiplies three relative frequencies, clamping after each of the two products.
#[must_use]
pub fn multiply_relative_frequencies3(a: f64, b: f64, c: f64) -> f64 {
    multiply_relative_frequencies(multiply_relative_frequencies(a, b), c)
}

impl ControlFlowGraph<'_> {
    pub(crate) fn compute_frequencies(&mut self) -> Result<()> {
        self.local_loop_frequency_data.clear();

        for block in &mut self.blocks {
            block.relative_frequency = UNVISITED;
            block.frequency_source = ProfileSource::Unknown;
        }
        for event in inner_loops_first(self)? {
            match event {
                RpoEvent::Block(block) => self.per_block_frequency(block, true),
                RpoEvent::LoopClosed(loop_begin) => self.finish_local_loop_frequency(loop_begin),
            }
        }

        for block in &mut self.blocks {
            block.relative_frequency = 0.0;
        }
        for index in 0..self.blocks.len() {
            self.per_block_frequency(BlockId(index), false);
        }

        debug_assert!(self
            .blocks
            .iter()
            .all(|block| block.relative_frequency >= MIN_RELATIVE_FREQUENCY));
        Ok(())
    }

    fn frequency_of(&self, node: NodeId) -> f64 {
        self.block_for(node)
            .map_or(0.0, |block| self.blocks[block.0].relative_frequency)
    }

    fn per_block_frequency(&mut self, id: BlockId, local: bool) {
        let block = &self.blocks[id.0];
        let begin = block.begin;
        let mut source = ProfileSource::Unknown;

        let frequency = if block.loop_header {
            if local {
                1.0
            } else {
                let entering: f64 = block
                    .predecessors
                    .iter()
                    .filter(|predecessor| !self.blocks[predecessor.0].loop_end)
                    .map(|predecessor| self.blocks[predecessor.0].relative_frequency)
                    .sum();
                let loop_frequency = self.local_loop_frequency(begin).unwrap_or(1.0);
                multiply_relative_frequencies(entering, loop_frequency)
            }
        } else {
            match block.predecessors.as_slice() {
                [] => 1.0,
                [predecessor] => {
                    let predecessor = &self.blocks[predecessor.0];
                    if predecessor.successors.len() > 1 {
                        let split = predecessor.end;
                        source = self.graph.get(split).profile_source();
                        multiply_relative_frequencies(
                            predecessor.relative_frequency,
                            self.graph.probability(split, begin),
                        )
                    } else {
                        source = predecessor.frequency_source;
                        predecessor.relative_frequency
                    }
                }
                predecessors => {
                    let mut sum = 0.0;
                    for predecessor in predecessors {
                        let predecessor = &self.blocks[predecessor.0];
                        sum += predecessor.relative_frequency;
                        source = source.combine(predecessor.frequency_source);
                    }
                    sum
                }
            }
        };

        let block = &mut self.blocks[id.0];
        block.relative_frequency = clamp(frequency);
        if local {
            block.frequency_source = source;
        }
    }

    /// Computes and stores the local frequency of a closed loop, then rescales its exits.
    ///
    /// Each exit keeps its share of the total exit frequency, applied to the frequency of the
    /// code entering the loop.
    fn finish_local_loop_frequency(&mut self, loop_begin: NodeId) {
        self.calculate_local_loop_frequency(loop_begin);

        let graph = self.graph;
        let exits = graph.loop_exits(loop_begin);
        let sum_all_exits: f64 = exits.iter().map(|&exit| self.frequency_of(exit)).sum();
        let loop_predecessor_frequency: f64 = graph
            .forward_ends(loop_begin)
            .iter()
            .map(|&end| self.frequency_of(end))
            .sum();

        for &exit in exits {
            let Some(exit_block) = self.block_for(exit) else {
                continue;
            };
            let share = self.blocks[exit_block.0].relative_frequency / sum_all_exits;
            let exit_frequency = multiply_relative_frequencies(share, loop_predecessor_frequency);
            debug_assert!(
                exit_frequency <= loop_predecessor_frequency * (1.0 + 1e-9) + MIN_RELATIVE_FREQUENCY,
                "exit frequency {exit_frequency} must be below predecessor frequency {loop_predecessor_frequency}"
            );
            self.blocks[exit_block.0].relative_frequency = exit_frequency;
        }
    }

    fn calculate_local_loop_frequency(&mut self, loop_begin: NodeId) {
        let graph = self.graph;
        let options = graph.options();
        let mut source = ProfileSource::Unknown;

        let loop_frequency = if options.use_loop_end_frequencies {
            let mut end_sum = 0.0;
            for &end in graph.loop_ends(loop_begin) {
                if let Some(block) = self.block_for(end) {
                    let block = &self.blocks[block.0];
                    end_sum += block.relative_frequency;
                    source = source.combine(block.frequency_source);
                }
            }
            let end_sum = end_sum.clamp(MIN_RELATIVE_FREQUENCY, 1.0);
            if end_sum == 1.0 {
                // Endless loop, or every exit deoptimizes right away.
                MAX_RELATIVE_FREQUENCY
            } else {
                1.0 / (1.0 - end_sum)
            }
        } else {
            let mut exit_sum = 0.0;
            for &exit in graph.loop_exits(loop_begin) {
                if let Some(block) = self.block_for(exit) {
                    let block = &self.blocks[block.0];
                    debug_assert!(block.relative_frequency >= 0.0, "exit {exit} not visited");
                    exit_sum += block.relative_frequency;
                    source = source.combine(block.frequency_source);
                }
            }
            let exit_sum = exit_sum.clamp(MIN_RELATIVE_FREQUENCY, 1.0);
            let loop_frequency = 1.0 / exit_sum;
            if options.dump_end_versus_exit_loop_frequencies {
                self.debug_local_loop_frequencies(loop_begin, loop_frequency, exit_sum);
            }
            loop_frequency
        };
        debug_assert!(
            loop_frequency.is_finite() && !loop_frequency.is_nan(),
            "loop {loop_begin} has frequency {loop_frequency}"
        );

        if source.is_trusted() {
            log::debug!(
                "Local frequency of loop {} is {:.4} ({})",
                loop_begin,
                loop_frequency,
                source
            );
        } else {
            log::debug!(
                "Local frequency of loop {} is {:.4}, estimated without profile",
                loop_begin,
                loop_frequency
            );
        }
        self.local_loop_frequency_data
            .insert(loop_begin, LoopFrequencyData::new(loop_frequency, source));
    }

    /// Cross-checks the local frequencies of a loop while its pass-1 values are still present.
    ///
    /// Needs loop information; without it only the end versus exit comparison runs. Findings
    /// are logged as warnings.
    fn debug_local_loop_frequencies(
        &self,
        loop_begin: NodeId,
        loop_frequency: f64,
        exit_sum: f64,
    ) {
        let graph = self.graph;
        let loop_blocks = self
            .block_for(loop_begin)
            .and_then(|header| self.blocks[header.0].loop_id)
            .map(|id| self.loops[id.0].blocks.as_slice())
            .unwrap_or_default();

        let mut sink_sum = 0.0;
        let mut sinks_visited = true;
        for &block in loop_blocks {
            let block = &self.blocks[block.0];
            if graph.kind(block.end).is_control_sink() {
                sink_sum += block.relative_frequency;
            }
            if block.relative_frequency == UNVISITED {
                sinks_visited = false;
            }
        }

        if sinks_visited {
            'blocks: for &id in loop_blocks {
                let block = &self.blocks[id.0];
                if block.loop_header || self.is_dominator_tree_loop_exit(id, true) {
                    continue;
                }
                for &successor in &block.successors {
                    if self.is_dominator_tree_loop_exit(successor, true)
                        || self.blocks[successor.0].loop_header
                    {
                        continue 'blocks;
                    }
                }
                if block.successors.is_empty() {
                    continue;
                }
                let successor_sum: f64 = block
                    .successors
                    .iter()
                    .map(|successor| self.blocks[successor.0].relative_frequency)
                    .sum();
                if successor_sum < block.relative_frequency - FREQUENCY_DELTA {
                    log::warn!(
                        "Successors must add up for block {} with begin {}, self {} successors {}",
                        id,
                        block.begin,
                        block.relative_frequency,
                        successor_sum
                    );
                }
            }
        }

        let end_sum: f64 = graph
            .loop_ends(loop_begin)
            .iter()
            .map(|&end| self.frequency_of(end))
            .sum();
        let end_based_frequency = if end_sum == 1.0 {
            MAX_RELATIVE_FREQUENCY
        } else {
            1.0 / (1.0 - end_sum)
        };

        for &id in loop_blocks {
            let block = &self.blocks[id.0];
            if !block.loop_header || block.begin == loop_begin {
                continue;
            }
            let inner_exit_sum: f64 = graph
                .loop_exits(block.begin)
                .iter()
                .map(|&exit| self.frequency_of(exit))
                .sum();
            let entering = block
                .first_predecessor()
                .map_or(0.0, |predecessor| self.blocks[predecessor.0].relative_frequency);
            if (entering - inner_exit_sum).abs() > FREQUENCY_DELTA {
                log::warn!(
                    "Frequencies of inner loop {} diverge: entered with {}, exited with {}",
                    block.begin,
                    entering,
                    inner_exit_sum
                );
            }
        }

        let has_exits = !graph.loop_exits(loop_begin).is_empty();
        if has_exits
            && (end_based_frequency - loop_frequency).abs()
                > graph.options().loop_exit_vs_loop_end_frequency_diff
        {
            log::warn!(
                "Frequency divergence for loop {}, exit based {:.4}, end based {:.4}, exit sum {:.2}, end sum {:.2}, sink sum {:.2}",
                loop_begin,
                loop_frequency,
                end_based_frequency,
                exit_sum,
                end_sum,
                sink_sum
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::StructuredGraph, test, CfgOptions};

    fn b(index: usize) -> BlockId {
        BlockId::new(index)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_bounds() {
        assert_eq!(MIN_RELATIVE_FREQUENCY, 2f64.powi(-500));
        assert_eq!(MAX_RELATIVE_FREQUENCY, 2f64.powi(500));
        assert_eq!(multiply_relative_frequencies(0.0, 5.0), MIN_RELATIVE_FREQUENCY);
        assert_eq!(multiply_relative_frequencies3(0.5, 0.5, 8.0), 2.0);
    }

    #[test]
    fn test_multiply3_clamps_each_product() {
        // MAX * MAX saturates before the third factor is applied.
        assert_eq!(
            multiply_relative_frequencies3(
                MAX_RELATIVE_FREQUENCY,
                MAX_RELATIVE_FREQUENCY,
                MIN_RELATIVE_FREQUENCY
            ),
            1.0
        );
        assert_eq!(
            multiply_relative_frequencies3(
                MIN_RELATIVE_FREQUENCY,
                MIN_RELATIVE_FREQUENCY,
                MAX_RELATIVE_FREQUENCY
            ),
            1.0
        );
    }

    #[test]
    fn test_diamond_frequencies() {
        let fixture = test::diamond(0.3);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert_close(cfg.block(b(0)).relative_frequency(), 1.0);
        assert_close(cfg.block(b(1)).relative_frequency(), 0.3);
        assert_close(cfg.block(b(2)).relative_frequency(), 0.7);
        assert_close(cfg.block(b(3)).relative_frequency(), 1.0);
    }

    #[test]
    fn test_simple_loop_frequencies() {
        let fixture = test::simple_loop(0.9);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        assert_close(cfg.local_loop_frequency(fixture.header).unwrap(), 10.0);
        assert_close(cfg.block(b(1)).relative_frequency(), 10.0);
        assert_close(cfg.block(b(2)).relative_frequency(), 9.0);
        assert_close(cfg.block(b(3)).relative_frequency(), 1.0);
    }

    #[test]
    fn test_nested_loop_frequencies() {
        let fixture = test::nested_loops(0.9, 0.8);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        assert_close(cfg.local_loop_frequency(fixture.inner_header).unwrap(), 5.0);
        assert_close(cfg.local_loop_frequency(fixture.outer_header).unwrap(), 10.0);

        let expected = [1.0, 10.0, 9.0, 45.0, 36.0, 9.0, 1.0];
        for (index, frequency) in expected.into_iter().enumerate() {
            assert_close(cfg.block(b(index)).relative_frequency(), frequency);
        }
    }

    #[test]
    fn test_loop_end_frequencies() {
        let mut fixture = test::simple_loop(0.75);
        fixture.graph.set_options(CfgOptions {
            use_loop_end_frequencies: true,
            ..CfgOptions::default()
        });
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert_close(cfg.local_loop_frequency(fixture.header).unwrap(), 4.0);
        assert_close(cfg.block(b(1)).relative_frequency(), 4.0);
    }

    #[test]
    fn test_endless_loop_uses_max_frequency() {
        let mut fixture = test::simple_loop(1.0);
        fixture.graph.set_options(CfgOptions {
            use_loop_end_frequencies: true,
            ..CfgOptions::default()
        });
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert_eq!(
            cfg.local_loop_frequency(fixture.header),
            Some(MAX_RELATIVE_FREQUENCY)
        );
        assert_eq!(cfg.block(b(1)).relative_frequency(), MAX_RELATIVE_FREQUENCY);
    }

    #[test]
    fn test_never_taken_exit_is_clamped() {
        let fixture = test::simple_loop(1.0);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert_eq!(
            cfg.local_loop_frequency(fixture.header),
            Some(MAX_RELATIVE_FREQUENCY)
        );
        assert!(cfg
            .blocks()
            .iter()
            .all(|block| block.relative_frequency() >= MIN_RELATIVE_FREQUENCY));
    }

    #[test]
    fn test_profile_sources() {
        let mut fixture = test::diamond(0.3);
        fixture
            .graph
            .set_profile_source(fixture.split, ProfileSource::Profiled)
            .unwrap();
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert_eq!(cfg.block(b(0)).frequency_source(), ProfileSource::Unknown);
        assert_eq!(cfg.block(b(1)).frequency_source(), ProfileSource::Profiled);
        assert_eq!(cfg.block(b(3)).frequency_source(), ProfileSource::Profiled);
    }

    #[test]
    fn test_loop_frequency_source() {
        let mut fixture = test::simple_loop(0.9);
        let split = fixture.graph.get(fixture.header).next().unwrap();
        fixture
            .graph
            .set_profile_source(split, ProfileSource::Injected)
            .unwrap();
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        assert_eq!(
            cfg.local_loop_frequency_source(fixture.header),
            Some(ProfileSource::Injected)
        );
        assert_eq!(cfg.local_loop_frequency(fixture.exit), None);
    }

    #[test]
    fn test_update_cached_local_loop_frequency() {
        let fixture = test::simple_loop(0.9);
        let mut cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        cfg.update_cached_local_loop_frequency(fixture.header, |data| data.scale_frequency(0.5))
            .unwrap();
        assert_close(cfg.local_loop_frequency(fixture.header).unwrap(), 5.0);

        let err = cfg
            .update_cached_local_loop_frequency(fixture.exit, |data| data)
            .unwrap_err();
        assert!(matches!(err, crate::Error::NotComputed(_)));
    }

    #[test]
    fn test_dump_option_runs_checks() {
        let mut fixture = test::nested_loops(0.9, 0.8);
        fixture.graph.set_options(CfgOptions {
            dump_end_versus_exit_loop_frequencies: true,
            loop_exit_vs_loop_end_frequency_diff: 0.0,
            ..CfgOptions::default()
        });
        let cfg = ControlFlowGraph::builder(&fixture.graph)
            .frequencies(true)
            .build()
            .unwrap();
        assert_close(cfg.block(b(3)).relative_frequency(), 45.0);
        assert!(!cfg.loops().is_empty());
    }

    #[test]
    fn test_switch_frequencies() {
        let mut graph = StructuredGraph::new();
        let cases: Vec<_> = (0..3).map(|_| graph.add_begin()).collect();
        let switch = graph
            .add_switch(cases.clone(), vec![0.5, 0.25, 0.25])
            .unwrap();
        graph.set_next(graph.start(), switch).unwrap();
        let merge = graph.add_merge();
        for &case in &cases {
            let end = graph.add_end(merge).unwrap();
            graph.set_next(case, end).unwrap();
        }
        let ret = graph.add_return();
        graph.set_next(merge, ret).unwrap();

        let cfg = ControlFlowGraph::compute_all(&graph).unwrap();
        let frequencies: Vec<_> = cases
            .iter()
            .map(|&case| cfg.block(cfg.block_for(case).unwrap()).relative_frequency())
            .collect();
        assert_eq!(frequencies, vec![0.5, 0.25, 0.25]);
        assert_close(
            cfg.block(cfg.block_for(merge).unwrap()).relative_frequency(),
            1.0,
        );
    }
}
