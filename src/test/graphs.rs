use crate::ir::{GuardsStage, Kills, LocationIdentity, NodeId, StructuredGraph};

pub struct Diamond {
    pub graph: StructuredGraph,
    pub split: NodeId,
    pub then_begin: NodeId,
    pub else_begin: NodeId,
    pub merge: NodeId,
}

/// `start -> if(p) -> {then, else} -> merge -> return`
///
/// Blocks: B0 start, B1 then, B2 else, B3 merge.
pub fn diamond(true_probability: f64) -> Diamond {
    let mut graph = StructuredGraph::new();
    let then_begin = graph.add_begin();
    let else_begin = graph.add_begin();
    let split = graph
        .add_if(then_begin, else_begin, true_probability)
        .unwrap();
    graph.set_next(graph.start(), split).unwrap();

    let merge = graph.add_merge();
    let then_end = graph.add_end(merge).unwrap();
    let else_end = graph.add_end(merge).unwrap();
    graph.set_next(then_begin, then_end).unwrap();
    graph.set_next(else_begin, else_end).unwrap();

    let ret = graph.add_return();
    graph.set_next(merge, ret).unwrap();

    Diamond {
        graph,
        split,
        then_begin,
        else_begin,
        merge,
    }
}

pub struct SimpleLoop {
    pub graph: StructuredGraph,
    pub header: NodeId,
    pub body: NodeId,
    pub body_kill: NodeId,
    pub exit: NodeId,
}

/// `start -> loop { if(p) body -> back edge else exit } -> return`
///
/// The body kills the location `field`.
///
/// Blocks: B0 start, B1 header, B2 body, B3 exit.
pub fn simple_loop(continue_probability: f64) -> SimpleLoop {
    let mut graph = StructuredGraph::new();
    let header = graph.add_loop_begin();
    let entry = graph.add_end(header).unwrap();
    graph.set_next(graph.start(), entry).unwrap();

    let body = graph.add_begin();
    let exit = graph.add_loop_exit(header).unwrap();
    let split = graph.add_if(body, exit, continue_probability).unwrap();
    graph.set_next(header, split).unwrap();

    let body_kill = graph.add_memory_kill(Kills::Single(LocationIdentity::mutable("field")));
    let back_edge = graph.add_loop_end(header).unwrap();
    graph.chain(&[body, body_kill, back_edge]).unwrap();

    let ret = graph.add_return();
    graph.set_next(exit, ret).unwrap();

    SimpleLoop {
        graph,
        header,
        body,
        body_kill,
        exit,
    }
}

pub struct NestedLoops {
    pub graph: StructuredGraph,
    pub outer_header: NodeId,
    pub inner_header: NodeId,
    pub inner_exit: NodeId,
    pub outer_exit: NodeId,
}

/// An inner loop whose exit is the back edge of the outer loop.
///
/// Blocks: B0 start, B1 outer header, B2 outer body, B3 inner header, B4 inner body,
/// B5 inner exit (ends with the outer back edge), B6 outer exit.
pub fn nested_loops(outer_probability: f64, inner_probability: f64) -> NestedLoops {
    let mut graph = StructuredGraph::new();
    let outer_header = graph.add_loop_begin();
    let entry = graph.add_end(outer_header).unwrap();
    graph.set_next(graph.start(), entry).unwrap();

    let outer_body = graph.add_begin();
    let outer_exit = graph.add_loop_exit(outer_header).unwrap();
    let outer_if = graph
        .add_if(outer_body, outer_exit, outer_probability)
        .unwrap();
    graph.set_next(outer_header, outer_if).unwrap();

    let inner_header = graph.add_loop_begin();
    let inner_entry = graph.add_end(inner_header).unwrap();
    graph.set_next(outer_body, inner_entry).unwrap();

    let inner_body = graph.add_begin();
    let inner_exit = graph.add_loop_exit(inner_header).unwrap();
    let inner_if = graph
        .add_if(inner_body, inner_exit, inner_probability)
        .unwrap();
    graph.set_next(inner_header, inner_if).unwrap();

    let inner_back_edge = graph.add_loop_end(inner_header).unwrap();
    graph.set_next(inner_body, inner_back_edge).unwrap();

    let outer_back_edge = graph.add_loop_end(outer_header).unwrap();
    graph.set_next(inner_exit, outer_back_edge).unwrap();

    let ret = graph.add_return();
    graph.set_next(outer_exit, ret).unwrap();

    NestedLoops {
        graph,
        outer_header,
        inner_header,
        inner_exit,
        outer_exit,
    }
}

pub struct DeoptLoop {
    pub graph: StructuredGraph,
    pub header: NodeId,
    pub deopt_begin: NodeId,
    pub exit: NodeId,
}

/// A loop whose body may leave through a deoptimization instead of a loop exit.
///
/// Blocks: B0 start, B1 header, B2 body, B3 back edge, B4 deoptimization, B5 exit.
pub fn deopt_loop(stage: GuardsStage) -> DeoptLoop {
    let mut graph = StructuredGraph::new();
    graph.set_guards_stage(stage);
    let header = graph.add_loop_begin();
    let entry = graph.add_end(header).unwrap();
    graph.set_next(graph.start(), entry).unwrap();

    let body = graph.add_begin();
    let exit = graph.add_loop_exit(header).unwrap();
    let loop_if = graph.add_if(body, exit, 0.9).unwrap();
    graph.set_next(header, loop_if).unwrap();

    let continue_begin = graph.add_begin();
    let deopt_begin = graph.add_begin();
    let guard = graph.add_if(continue_begin, deopt_begin, 0.99).unwrap();
    graph.set_next(body, guard).unwrap();

    let back_edge = graph.add_loop_end(header).unwrap();
    graph.set_next(continue_begin, back_edge).unwrap();
    let deopt = graph.add_deoptimize();
    graph.set_next(deopt_begin, deopt).unwrap();

    let ret = graph.add_return();
    graph.set_next(exit, ret).unwrap();

    DeoptLoop {
        graph,
        header,
        deopt_begin,
        exit,
    }
}
