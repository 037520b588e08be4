//! Memory kill queries for blocks and loops.
//!
//! A memory access may only move across a block if the block cannot overwrite the accessed
//! location. These queries summarize the declared kills of the nodes of a block, of the blocks
//! between a block and its dominator, and of whole loops. All results are memoized on first
//! use and dropped whenever analyses are added to the graph.

use crate::{
    analysis::cfg::{BlockId, BuildConfiguration, ControlFlowGraph, LocationSet, LoopId},
    ir::{Kills, LocationIdentity},
    Error, Result,
};

impl ControlFlowGraph<'_> {
    /// The locations overwritten by the nodes of `block`.
    pub fn kill_locations(&self, block: BlockId) -> &LocationSet {
        let cell = &self.blocks[block.0].kill_locations;
        if let Some(set) = cell.get() {
            return set;
        }
        let mut result = LocationSet::new();
        for node in self.block_nodes(block) {
            match self.graph.get(node).kills() {
                Kills::None => {}
                Kills::Single(location) => result.add(location.clone()),
                Kills::Multi(locations) => {
                    for location in locations {
                        result.add(location.clone());
                    }
                }
            }
            if result.is_any() {
                break;
            }
        }
        cell.get_or_init(|| result)
    }

    /// Returns `true` if a node of `block` may overwrite `location`.
    ///
    /// Immutable locations are never killed.
    #[must_use]
    pub fn can_kill(&self, block: BlockId, location: &LocationIdentity) -> bool {
        !location.is_immutable() && self.kill_locations(block).contains(location)
    }

    /// The locations possibly overwritten on any path from the dominator of `block` to `block`,
    /// excluding both blocks themselves.
    ///
    /// For a loop header this is everything the loop kills, since the back edges are such paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotComputed`] if dominators, or loops of a graph with loops, were not
    /// computed.
    pub fn kill_locations_between_this_and_dominator(
        &self,
        block: BlockId,
    ) -> Result<&LocationSet> {
        if !self.config.contains(BuildConfiguration::DOMINATORS) {
            return Err(Error::NotComputed("Dominators"));
        }
        if self.graph.has_loops() && !self.config.contains(BuildConfiguration::LOOPS) {
            return Err(Error::NotComputed("Loops"));
        }
        Ok(self.between_this_and_dominator(block))
    }

    /// Returns `true` if `location` may be overwritten between the dominator of `block` and
    /// `block`.
    ///
    /// # Errors
    ///
    /// See [`kill_locations_between_this_and_dominator`](Self::kill_locations_between_this_and_dominator).
    pub fn can_kill_between_this_and_dominator(
        &self,
        block: BlockId,
        location: &LocationIdentity,
    ) -> Result<bool> {
        if location.is_immutable() {
            return Ok(false);
        }
        Ok(self
            .kill_locations_between_this_and_dominator(block)?
            .contains(location))
    }

    fn between_this_and_dominator(&self, block: BlockId) -> &LocationSet {
        let current = &self.blocks[block.0];
        if let Some(set) = current.kill_locations_between_this_and_dominator.get() {
            return set;
        }

        let mut result = LocationSet::new();
        let stop = current.dominator;
        if current.loop_header {
            if let Some(id) = current.loop_id {
                result.add_all(self.loop_kill_locations(id));
            }
        } else {
            for &predecessor in &current.predecessors {
                if Some(predecessor) == stop {
                    continue;
                }
                result.add_all(self.kill_locations(predecessor));
                if result.is_any() {
                    break;
                }
                self.calc_kill_locations_between(predecessor, stop, &mut result);
                if result.is_any() {
                    break;
                }
            }
        }
        current
            .kill_locations_between_this_and_dominator
            .get_or_init(|| result)
    }

    /// Adds the kills on the dominator tree path from `block` up to `stop`, exclusive.
    fn calc_kill_locations_between(
        &self,
        block: BlockId,
        stop: Option<BlockId>,
        result: &mut LocationSet,
    ) {
        let mut current = block;
        while Some(current) != stop && !result.is_any() {
            result.add_all(self.between_this_and_dominator(current));
            let dominator = self.blocks[current.0].dominator;
            match dominator {
                Some(dominator) if Some(dominator) != stop => {
                    result.add_all(self.kill_locations(dominator));
                    current = dominator;
                }
                _ => break,
            }
        }
    }

    /// The locations overwritten anywhere in the loop, nested loops included.
    pub fn loop_kill_locations(&self, id: LoopId) -> &LocationSet {
        let current = &self.loops[id.0];
        if let Some(set) = current.kill_locations.get() {
            return set;
        }

        let mut result = LocationSet::new();
        for &block in &current.blocks {
            if self.blocks[block.0].loop_id == Some(id) {
                result.add_all(self.kill_locations(block));
                if result.is_any() {
                    break;
                }
            }
        }
        for &child in &current.children {
            if result.is_any() {
                break;
            }
            result.add_all(self.loop_kill_locations(child));
        }
        current.kill_locations.get_or_init(|| result)
    }

    /// Returns `true` if the loop may overwrite `location`.
    #[must_use]
    pub fn loop_can_kill(&self, id: LoopId, location: &LocationIdentity) -> bool {
        !location.is_immutable() && self.loop_kill_locations(id).contains(location)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::cfg::{BlockId, ControlFlowGraph, LoopId},
        ir::{Kills, LocationIdentity, StructuredGraph},
        test, Error,
    };

    fn b(index: usize) -> BlockId {
        BlockId::new(index)
    }

    fn loc(name: &str) -> LocationIdentity {
        LocationIdentity::mutable(name)
    }

    /// Diamond whose then branch kills `x`, else branch kills `y` and `z`, and whose merge kills
    /// an immutable location.
    fn killing_diamond() -> StructuredGraph {
        let mut fixture = test::diamond(0.5);
        let graph = &mut fixture.graph;
        let then_end = graph.get(fixture.then_begin).next().unwrap();
        graph.set_kills(then_end, Kills::Single(loc("x"))).unwrap();
        let else_end = graph.get(fixture.else_begin).next().unwrap();
        graph
            .set_kills(else_end, Kills::Multi(vec![loc("y"), loc("z")]))
            .unwrap();
        graph
            .set_kills(fixture.merge, Kills::Single(LocationIdentity::immutable("final")))
            .unwrap();
        fixture.graph
    }

    #[test]
    fn test_block_kill_locations() {
        let graph = killing_diamond();
        let cfg = ControlFlowGraph::compute_all(&graph).unwrap();

        assert!(cfg.kill_locations(b(0)).is_empty());
        assert_eq!(cfg.kill_locations(b(1)).to_vec(), vec![loc("x")]);
        assert_eq!(cfg.kill_locations(b(2)).to_vec(), vec![loc("y"), loc("z")]);
        assert!(cfg.kill_locations(b(3)).is_empty());

        assert!(cfg.can_kill(b(1), &loc("x")));
        assert!(!cfg.can_kill(b(1), &loc("y")));
        assert!(!cfg.can_kill(b(3), &LocationIdentity::immutable("final")));
    }

    #[test]
    fn test_between_merge_and_dominator() {
        let graph = killing_diamond();
        let cfg = ControlFlowGraph::compute_all(&graph).unwrap();

        let between = cfg.kill_locations_between_this_and_dominator(b(3)).unwrap();
        assert_eq!(between.to_vec(), vec![loc("x"), loc("y"), loc("z")]);
        assert!(cfg
            .can_kill_between_this_and_dominator(b(3), &loc("z"))
            .unwrap());
        assert!(!cfg
            .can_kill_between_this_and_dominator(b(3), &loc("w"))
            .unwrap());

        // The dominator is the only predecessor of the branches.
        assert!(cfg
            .kill_locations_between_this_and_dominator(b(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_any_short_circuits() {
        let mut fixture = test::diamond(0.5);
        let then_end = fixture.graph.get(fixture.then_begin).next().unwrap();
        fixture
            .graph
            .set_kills(then_end, Kills::Single(LocationIdentity::any()))
            .unwrap();
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        assert!(cfg.kill_locations(b(1)).is_any());
        let between = cfg.kill_locations_between_this_and_dominator(b(3)).unwrap();
        assert!(between.is_any());
        assert!(cfg
            .can_kill_between_this_and_dominator(b(3), &loc("anything"))
            .unwrap());
    }

    #[test]
    fn test_loop_kill_locations() {
        let fixture = test::simple_loop(0.9);
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        let id = LoopId::new(0);

        assert_eq!(cfg.loop_kill_locations(id).to_vec(), vec![loc("field")]);
        assert!(cfg.loop_can_kill(id, &loc("field")));
        assert!(!cfg.loop_can_kill(id, &loc("other")));

        // The header sees every kill of its loop between itself and the entry.
        assert!(cfg
            .can_kill_between_this_and_dominator(b(1), &loc("field"))
            .unwrap());
        assert!(!cfg
            .can_kill_between_this_and_dominator(b(3), &loc("field"))
            .unwrap());
    }

    #[test]
    fn test_nested_loop_kills_propagate_to_parent() {
        let mut fixture = test::nested_loops(0.5, 0.5);
        let inner_back_edge = fixture.graph.loop_ends(fixture.inner_header)[0];
        fixture
            .graph
            .set_kills(inner_back_edge, Kills::Single(loc("inner")))
            .unwrap();
        let cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();

        let (outer, inner) = (LoopId::new(0), LoopId::new(1));
        assert_eq!(cfg.loop_kill_locations(inner).to_vec(), vec![loc("inner")]);
        assert_eq!(cfg.loop_kill_locations(outer).to_vec(), vec![loc("inner")]);
        assert!(cfg.kill_locations(b(5)).is_empty());

        let inner_location = loc("inner");
        assert!(cfg
            .can_kill_between_this_and_dominator(b(1), &inner_location)
            .unwrap());
        assert!(cfg
            .can_kill_between_this_and_dominator(b(3), &inner_location)
            .unwrap());
        assert!(!cfg
            .can_kill_between_this_and_dominator(b(5), &inner_location)
            .unwrap());
    }

    #[test]
    fn test_requires_dominators() {
        let graph = killing_diamond();
        let cfg = ControlFlowGraph::builder(&graph)
            .frequencies(true)
            .build()
            .unwrap();
        assert!(matches!(
            cfg.kill_locations_between_this_and_dominator(b(3)),
            Err(Error::NotComputed(_))
        ));
        assert!(cfg.can_kill(b(1), &loc("x")));

        let fixture = test::simple_loop(0.9);
        let cfg = ControlFlowGraph::builder(&fixture.graph)
            .dominators(true)
            .build()
            .unwrap();
        assert!(matches!(
            cfg.can_kill_between_this_and_dominator(b(1), &loc("field")),
            Err(Error::NotComputed("Loops"))
        ));
    }
}
