//! Shared scaffolding for the scenario tests: a small in-memory
//! dependency oracle and a performer that records the order it was
//! called in, so a test can assert on both the plan produced and the
//! history the scheduler actually walked.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use kiln::core::action::{Component, ComponentPath};
use kiln::core::plan::DependencyOracle;
use kiln::exec::pool::Performer;
use kiln::ops::StdOp;
use kiln::{ActionKey, Operation};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestComponent(pub String);

impl Component for TestComponent {
    fn path(&self) -> ComponentPath {
        ComponentPath::new(self.0.split('/'))
    }
}

pub fn action(op: StdOp, name: &str) -> (StdOp, TestComponent) {
    (op, TestComponent(name.to_string()))
}

pub fn key(op: StdOp, name: &str) -> ActionKey<StdOp> {
    ActionKey::new(op, ComponentPath::new(name.split('/')))
}

/// A fixed dependency table: `deps[(op, component)]` lists that
/// action's prerequisites. Unlisted actions have none.
#[derive(Default)]
pub struct GraphOracle {
    pub deps: HashMap<(StdOp, String), Vec<(StdOp, String)>>,
    pub already_done: HashSet<(StdOp, String)>,
}

impl GraphOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends_on(mut self, op: StdOp, name: &str, deps: Vec<(StdOp, &str)>) -> Self {
        self.deps.insert(
            (op, name.to_string()),
            deps.into_iter().map(|(o, n)| (o, n.to_string())).collect(),
        );
        self
    }

    pub fn mark_already_done(mut self, op: StdOp, name: &str) -> Self {
        self.already_done.insert((op, name.to_string()));
        self
    }
}

impl DependencyOracle<StdOp, TestComponent> for GraphOracle {
    fn prerequisites(
        &self,
        op: &StdOp,
        component: &TestComponent,
    ) -> anyhow::Result<Vec<(StdOp, TestComponent)>> {
        Ok(self
            .deps
            .get(&(*op, component.0.clone()))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(o, n)| (o, TestComponent(n)))
            .collect())
    }

    fn needed_in_image(&self, op: &StdOp, _component: &TestComponent) -> bool {
        op.needed_in_image()
    }

    fn already_done(&self, op: &StdOp, component: &TestComponent) -> bool {
        self.already_done.contains(&(*op, component.0.clone()))
    }
}

/// Records every action it was asked to perform, in call order, and
/// fails the ones named in `fail`.
#[derive(Default)]
pub struct RecordingPerformer {
    pub calls: Mutex<Vec<ActionKey<StdOp>>>,
    pub fail: HashSet<(StdOp, String)>,
}

impl RecordingPerformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, op: StdOp, name: &str) -> Self {
        self.fail.insert((op, name.to_string()));
        self
    }

    pub fn call_order(&self) -> Vec<ActionKey<StdOp>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Performer<StdOp, TestComponent> for RecordingPerformer {
    fn perform(
        &self,
        op: &StdOp,
        component: &TestComponent,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        self.calls
            .lock()
            .unwrap()
            .push(ActionKey::new(*op, component.path()));
        if self.fail.contains(&(*op, component.0.clone())) {
            anyhow::bail!("simulated failure performing {}:{}", op.tag(), component.0);
        }
        Ok(Some(serde_json::json!({ "ran": component.0 })))
    }
}
