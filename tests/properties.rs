//! Property tests for the invariants in spec.md §8 that hold across
//! arbitrary plan shapes: every action performed exactly once, the
//! plan fully drains, and (since the test process can never fork) the
//! call order is a valid topological order of the dependency graph.

mod support;

use std::collections::HashMap;

use proptest::prelude::*;

use kiln::core::plan::PlanBuilder;
use kiln::exec::pool::PreforkGc;
use kiln::exec::scheduler::Scheduler;
use kiln::ops::StdOp;
use kiln::shell::Shell;

use support::{GraphOracle, RecordingPerformer, TestComponent};

fn gc() -> PreforkGc {
    PreforkGc {
        reserve_ratio: 1.0,
        heap_usage_ratio: Box::new(|| 0.0),
        collect: Box::new(|| {}),
    }
}

fn node_name(i: usize) -> String {
    format!("n{i}")
}

/// A random forest: node `i` (for `i > 0`) depends on some earlier
/// node `prereq_of[i]`, which makes the graph acyclic by construction
/// while still exercising shared dependencies and varying fan-out.
/// Returns `prereq_of`, mapping each dependent node to its single
/// prerequisite (which must run first).
fn random_forest(n: usize, choices: &[usize]) -> (GraphOracle, HashMap<usize, usize>) {
    let mut oracle = GraphOracle::new();
    let mut prereq_of = HashMap::new();
    let names: Vec<String> = (0..n).map(node_name).collect();
    for i in 1..n {
        let prereq = choices[i - 1] % i;
        prereq_of.insert(i, prereq);
        oracle = oracle.depends_on(
            StdOp::Compile,
            &names[i],
            vec![(StdOp::Compile, names[prereq].as_str())],
        );
    }
    (oracle, prereq_of)
}

proptest! {
    #[test]
    fn every_action_runs_exactly_once_and_the_plan_fully_drains(
        n in 2usize..12,
        seeds in prop::collection::vec(0usize..100, 11),
    ) {
        let (oracle, _parents) = random_forest(n, &seeds[..n - 1]);
        let dir = tempfile::tempdir().unwrap();
        let plan = PlanBuilder::new(&oracle, dir.path())
            .build(StdOp::Compile, TestComponent(node_name(n - 1)))
            .unwrap();

        let performer = RecordingPerformer::new();
        let shell = Shell::new(true);
        let summary = Scheduler::new(plan, &performer, &shell, 1, gc())
            .execute()
            .unwrap();

        prop_assert_eq!(summary.completed, n);
        let calls = performer.call_order();
        prop_assert_eq!(calls.len(), n);

        let mut seen = std::collections::HashSet::new();
        for call in &calls {
            prop_assert!(seen.insert(call.path.to_string()), "action performed twice");
        }
    }

    #[test]
    fn fallback_order_respects_every_prerequisite_edge(
        n in 2usize..12,
        seeds in prop::collection::vec(0usize..100, 11),
    ) {
        let (oracle, prereq_of) = random_forest(n, &seeds[..n - 1]);
        let dir = tempfile::tempdir().unwrap();
        let plan = PlanBuilder::new(&oracle, dir.path())
            .build(StdOp::Compile, TestComponent(node_name(n - 1)))
            .unwrap();

        let performer = RecordingPerformer::new();
        let shell = Shell::new(true);
        Scheduler::new(plan, &performer, &shell, 1, gc())
            .execute()
            .unwrap();

        let calls = performer.call_order();
        let position: HashMap<String, usize> = calls
            .iter()
            .enumerate()
            .map(|(idx, k)| (k.path.to_string(), idx))
            .collect();

        for (dependent, prereq) in &prereq_of {
            let dependent_pos = position[&node_name(*dependent)];
            let prereq_pos = position[&node_name(*prereq)];
            prop_assert!(prereq_pos < dependent_pos, "dependency ran after its dependent");
        }
    }
}
