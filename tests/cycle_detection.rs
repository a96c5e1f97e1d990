//! The plan builder runs the destructive-simulation cycle check once,
//! after traversal, and rejects a cyclic dependency graph before any
//! action is ever dispatched.

mod support;

use kiln::core::plan::PlanBuilder;
use kiln::ops::StdOp;
use kiln::Error;

use support::{GraphOracle, TestComponent};

#[test]
fn mutually_dependent_actions_are_rejected() {
    let oracle = GraphOracle::new()
        .depends_on(StdOp::Compile, "a", vec![(StdOp::Compile, "b")])
        .depends_on(StdOp::Compile, "b", vec![(StdOp::Compile, "a")]);

    let dir = tempfile::tempdir().unwrap();
    let err = PlanBuilder::new(&oracle, dir.path())
        .build(StdOp::Compile, TestComponent("a".into()))
        .unwrap_err();

    assert!(matches!(err, Error::CycleDetected(_)));
}

#[test]
fn a_longer_cycle_through_a_shared_dependency_is_also_rejected() {
    let oracle = GraphOracle::new()
        .depends_on(StdOp::Compile, "a", vec![(StdOp::Compile, "b")])
        .depends_on(StdOp::Compile, "b", vec![(StdOp::Compile, "c")])
        .depends_on(StdOp::Compile, "c", vec![(StdOp::Compile, "a")]);

    let dir = tempfile::tempdir().unwrap();
    let err = PlanBuilder::new(&oracle, dir.path())
        .build(StdOp::Compile, TestComponent("a".into()))
        .unwrap_err();

    assert!(matches!(err, Error::CycleDetected(_)));
}

#[test]
fn a_diamond_is_not_mistaken_for_a_cycle() {
    let oracle = GraphOracle::new()
        .depends_on(
            StdOp::Compile,
            "root",
            vec![(StdOp::Compile, "a"), (StdOp::Compile, "b")],
        )
        .depends_on(StdOp::Compile, "a", vec![(StdOp::Compile, "leaf")])
        .depends_on(StdOp::Compile, "b", vec![(StdOp::Compile, "leaf")]);

    let dir = tempfile::tempdir().unwrap();
    assert!(PlanBuilder::new(&oracle, dir.path())
        .build(StdOp::Compile, TestComponent("root".into()))
        .is_ok());
}
