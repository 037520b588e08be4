//! Structural self checks of a built control flow graph.
//!
//! [`ControlFlowGraph::verify`] runs after every build when [`crate::CfgOptions::verify`] is
//! set. It checks the relations the analyses rely on and reports the first violation as
//! [`crate::Error::MalformedGraph`].

use crate::{
    analysis::cfg::{BlockId, BuildConfiguration, ControlFlowGraph},
    Result,
};

impl ControlFlowGraph<'_> {
    /// Checks the block structure and every analysis the graph was built with.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedGraph`] naming the first block or loop that violates
    /// an invariant.
    pub fn verify(&self) -> Result<()> {
        self.verify_edges()?;
        if self.config.contains(BuildConfiguration::DOMINATORS) {
            self.verify_dominators()?;
        }
        if self.config.contains(BuildConfiguration::LOOPS) {
            self.verify_loops()?;
        }
        if self.config.contains(BuildConfiguration::POSTDOMINATORS) {
            self.verify_postdominators()?;
        }
        Ok(())
    }

    fn verify_edges(&self) -> Result<()> {
        for (index, block) in self.blocks.iter().enumerate() {
            let id = BlockId(index);
            if block.id != id {
                return Err(malformed_graph!("{} is stored at index {}", block.id, index));
            }
            if self.node_to_block[block.begin.index()] != Some(id)
                || self.node_to_block[block.end.index()] != Some(id)
            {
                return Err(malformed_graph!("Boundary nodes of {} map to another block", id));
            }
            for &successor in &block.successors {
                if !self.blocks[successor.0].predecessors.contains(&id) {
                    return Err(malformed_graph!(
                        "{} is a successor of {} but not the other way round",
                        successor,
                        id
                    ));
                }
            }
            for &predecessor in &block.predecessors {
                if !self.blocks[predecessor.0].successors.contains(&id) {
                    return Err(malformed_graph!(
                        "{} is a predecessor of {} but not the other way round",
                        predecessor,
                        id
                    ));
                }
                let back_edge = block.loop_header && self.blocks[predecessor.0].loop_end;
                if predecessor >= id && !back_edge {
                    return Err(malformed_graph!(
                        "{} precedes {} but comes later in reverse post order",
                        predecessor,
                        id
                    ));
                }
            }
        }
        Ok(())
    }

    fn verify_dominators(&self) -> Result<()> {
        for (index, block) in self.blocks.iter().enumerate().skip(1) {
            let id = BlockId(index);
            let Some(dominator) = block.dominator else {
                return Err(malformed_graph!("{} has no dominator", id));
            };
            if dominator >= id {
                return Err(malformed_graph!("{} is dominated by later {}", id, dominator));
            }
            if block.dominator_depth != self.blocks[dominator.0].dominator_depth + 1 {
                return Err(malformed_graph!("Dominator depth of {} is inconsistent", id));
            }
            for &predecessor in &block.predecessors {
                if !self.dominates(dominator, predecessor) {
                    return Err(malformed_graph!(
                        "{} does not dominate {}, a predecessor of {}",
                        dominator,
                        predecessor,
                        id
                    ));
                }
            }
        }
        Ok(())
    }

    fn verify_loops(&self) -> Result<()> {
        for (index, current) in self.loops.iter().enumerate() {
            let header = &self.blocks[current.header.0];
            if !header.loop_header || header.loop_id != Some(current.id) {
                return Err(malformed_graph!(
                    "{} is not the header of {}",
                    current.header,
                    current.id
                ));
            }
            if let Some(parent) = current.parent {
                if parent.0 >= index || !self.loops[parent.0].children.contains(&current.id) {
                    return Err(malformed_graph!(
                        "{} is not properly nested in {}",
                        current.id,
                        parent
                    ));
                }
            }
            for &block in &current.blocks {
                if !self.loop_contains(current.id, block) {
                    return Err(malformed_graph!("{} is listed in {} but not inside it", block, current.id));
                }
            }
            for &exit in &current.loop_exits {
                if self.loop_contains(current.id, exit) {
                    return Err(malformed_graph!("Exit {} of {} lies inside the loop", exit, current.id));
                }
            }
        }
        Ok(())
    }

    fn verify_postdominators(&self) -> Result<()> {
        for (index, block) in self.blocks.iter().enumerate() {
            if let Some(postdominator) = block.postdominator {
                if postdominator.0 <= index {
                    return Err(malformed_graph!(
                        "{} is postdominated by earlier {}",
                        BlockId(index),
                        postdominator
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::cfg::{BlockId, ControlFlowGraph},
        ir::GuardsStage,
        test, Error,
    };

    #[test]
    fn test_fixtures_verify() {
        let graphs = [
            test::diamond(0.5).graph,
            test::simple_loop(0.9).graph,
            test::nested_loops(0.9, 0.8).graph,
            test::deopt_loop(GuardsStage::FloatingGuards).graph,
            test::deopt_loop(GuardsStage::AfterFsa).graph,
        ];
        for graph in &graphs {
            let cfg = ControlFlowGraph::compute_all(graph).unwrap();
            cfg.verify().unwrap();
        }
    }

    #[test]
    fn test_broken_dominator_detected() {
        let fixture = test::diamond(0.5);
        let mut cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        cfg.blocks[3].dominator = Some(BlockId(1));
        assert!(matches!(cfg.verify(), Err(Error::MalformedGraph { .. })));
    }

    #[test]
    fn test_broken_edge_detected() {
        let fixture = test::diamond(0.5);
        let mut cfg = ControlFlowGraph::compute_all(&fixture.graph).unwrap();
        cfg.blocks[3].predecessors.pop();
        assert!(matches!(cfg.verify(), Err(Error::MalformedGraph { .. })));
    }
}
