//! Plan builder (C3): depth-first, memoized traversal from a root
//! request, consulting a dependency oracle, populating the graph (C2)
//! and the ready queue.

use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};

use crate::core::action::{ActionKey, Component, ComponentPath, Operation};
use crate::core::graph::DependencyGraph;
use crate::error::Error;
use crate::exec::resultfile;

/// External collaborator queried by the plan builder. Pure from the
/// core's point of view; may cache internally.
pub trait DependencyOracle<Op: Operation, C: Component>: Send + Sync {
    fn prerequisites(&self, op: &Op, component: &C) -> anyhow::Result<Vec<(Op, C)>>;
    fn needed_in_image(&self, op: &Op, component: &C) -> bool;
    fn already_done(&self, op: &Op, component: &C) -> bool;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ActionRecord<Op: Operation, C: Component> {
    pub key: ActionKey<Op>,
    pub component: C,
    pub status: Status,
    pub result_file: PathBuf,
    pub background_ok: bool,
    pub needed_in_image: bool,
    pub already_done_at_plan_time: bool,
}

/// Two-tier FIFO: needed-in-image actions that aren't already done go
/// to the tail (normal priority); everything else (already-done
/// actions, and anything not needed in the image) cuts to the front,
/// since discharging them is cheap and frees successors sooner.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Priority {
    Front,
    Back,
}

pub fn classify_priority(needed_in_image: bool, already_done: bool) -> Priority {
    if needed_in_image && !already_done {
        Priority::Back
    } else {
        Priority::Front
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReadyQueue<Op: Operation> {
    queue: std::collections::VecDeque<ActionKey<Op>>,
}

impl<Op: Operation> ReadyQueue<Op> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: ActionKey<Op>, priority: Priority) {
        match priority {
            Priority::Front => self.queue.push_front(key),
            Priority::Back => self.queue.push_back(key),
        }
    }

    pub fn dequeue(&mut self) -> Option<ActionKey<Op>> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// The finished product of plan construction: the dependency graph,
/// the ready queue seeded from it, and the append-only discovery-order
/// log of every action in the plan.
pub struct Plan<Op: Operation, C: Component> {
    pub graph: DependencyGraph<Op>,
    pub ready: ReadyQueue<Op>,
    pub records: IndexMap<ActionKey<Op>, ActionRecord<Op, C>>,
    pub all_actions: Vec<ActionKey<Op>>,
}

impl<Op: Operation, C: Component> Plan<Op, C> {
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty() && self.ready.is_empty()
    }

    /// Diagnostic dump used by the CLI's `--dry-run` and by the
    /// fatal-error summary required in spec.md §7.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        for key in &self.all_actions {
            let record = &self.records[key];
            let remaining = self
                .graph
                .remaining_children(key)
                .map(|set| set.len())
                .unwrap_or(0);
            out.push_str(&format!(
                "{key}  status={:?}  remaining_deps={remaining}\n",
                record.status
            ));
        }
        out
    }
}

pub struct PlanBuilder<'o, Op: Operation, C: Component> {
    oracle: &'o dyn DependencyOracle<Op, C>,
    result_dir: PathBuf,
    visited: IndexSet<ActionKey<Op>>,
    graph: DependencyGraph<Op>,
    ready: ReadyQueue<Op>,
    records: IndexMap<ActionKey<Op>, ActionRecord<Op, C>>,
    all_actions: Vec<ActionKey<Op>>,
}

impl<'o, Op: Operation, C: Component> PlanBuilder<'o, Op, C> {
    pub fn new(oracle: &'o dyn DependencyOracle<Op, C>, result_dir: impl AsRef<Path>) -> Self {
        PlanBuilder {
            oracle,
            result_dir: result_dir.as_ref().to_path_buf(),
            visited: IndexSet::new(),
            graph: DependencyGraph::new(),
            ready: ReadyQueue::new(),
            records: IndexMap::new(),
            all_actions: Vec::new(),
        }
    }

    /// Builds the plan rooted at `(op, component)`. Runs
    /// `check_acyclic` exactly once, after the whole traversal
    /// completes, on a clone of the graph.
    pub fn build(mut self, op: Op, component: C) -> Result<Plan<Op, C>, Error> {
        self.visit(op, component)?;
        self.graph.check_acyclic()?;
        Ok(Plan {
            graph: self.graph,
            ready: self.ready,
            records: self.records,
            all_actions: self.all_actions,
        })
    }

    fn visit(&mut self, op: Op, component: C) -> Result<(), Error> {
        let key = ActionKey::new(op.clone(), component.path());
        if self.visited.contains(&key) {
            return Ok(());
        }
        self.visited.insert(key.clone());

        let prereqs = self
            .oracle
            .prerequisites(&op, &component)
            .map_err(Error::OracleError)?;

        for (pre_op, pre_component) in prereqs.clone() {
            self.visit(pre_op, pre_component)?;
        }

        self.graph.register(key.clone());
        for (pre_op, pre_component) in &prereqs {
            let pre_key = ActionKey::new(pre_op.clone(), pre_component.path());
            self.graph.record_edge(Some(&key), pre_key);
        }

        let needed_in_image = self.oracle.needed_in_image(&op, &component);
        let already_done = self.oracle.already_done(&op, &component);
        let background_ok = op.can_run_in_background() && !needed_in_image && !already_done;
        let result_file = resultfile::path_for(&self.result_dir, &key);

        let ready_now = self.graph.is_ready(&key);
        let status = if ready_now {
            Status::Ready
        } else {
            Status::Pending
        };

        self.records.insert(
            key.clone(),
            ActionRecord {
                key: key.clone(),
                component,
                status,
                result_file,
                background_ok,
                needed_in_image,
                already_done_at_plan_time: already_done,
            },
        );
        self.all_actions.push(key.clone());

        if ready_now {
            self.ready
                .enqueue(key, classify_priority(needed_in_image, already_done));
        }

        Ok(())
    }
}

/// Builds a plan directly from a recorded action sequence (no oracle
/// traversal): action `i` gains a single synthetic prerequisite on
/// action `i - 1`, so execution order is pinned to file order
/// regardless of background/foreground classification. Used by the
/// breadcrumb replay driver (C6).
pub fn plan_from_sequence<Op: Operation, C: Component>(
    sequence: Vec<(ActionKey<Op>, C)>,
    result_dir: impl AsRef<Path>,
    needed_in_image: impl Fn(&Op, &C) -> bool,
    already_done: impl Fn(&Op, &C) -> bool,
) -> Plan<Op, C> {
    let result_dir = result_dir.as_ref();
    let mut graph = DependencyGraph::new();
    let mut records = IndexMap::new();
    let mut all_actions = Vec::new();
    let mut ready = ReadyQueue::new();

    let mut previous: Option<ActionKey<Op>> = None;
    for (key, component) in sequence {
        graph.register(key.clone());
        if let Some(prev) = &previous {
            graph.record_edge(Some(&key), prev.clone());
        }
        let needed = needed_in_image(&key.op, &component);
        let done = already_done(&key.op, &component);
        let background_ok = key.op.can_run_in_background() && !needed && !done;
        let result_file = resultfile::path_for(result_dir, &key);
        let ready_now = graph.is_ready(&key);
        records.insert(
            key.clone(),
            ActionRecord {
                key: key.clone(),
                component,
                status: if ready_now {
                    Status::Ready
                } else {
                    Status::Pending
                },
                result_file,
                background_ok,
                needed_in_image: needed,
                already_done_at_plan_time: done,
            },
        );
        all_actions.push(key.clone());
        if ready_now {
            ready.enqueue(key.clone(), classify_priority(needed, done));
        }
        previous = Some(key);
    }

    Plan {
        graph,
        ready,
        records,
        all_actions,
    }
}
