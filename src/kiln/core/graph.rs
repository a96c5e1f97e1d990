//! Dependency graph (C2): bidirectional parent <-> child maps over
//! action keys, and the one-time cycle check run before execution.

use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;

use crate::core::action::{ActionKey, Operation};
use crate::error::Error;

/// `children[parent]` is the set of actions `parent` is still waiting
/// on; `parents[child]` is the set of actions still waiting on `child`.
/// Both maps hold an entry (possibly empty) for every action whose
/// status is `Pending`, `Ready`, or `Running`; an action is ready iff
/// its `children` entry is empty or absent (invariant 3).
#[derive(Clone, Debug)]
pub struct DependencyGraph<Op: Operation> {
    children: IndexMap<ActionKey<Op>, IndexSet<ActionKey<Op>>>,
    parents: IndexMap<ActionKey<Op>, IndexSet<ActionKey<Op>>>,
}

impl<Op: Operation> Default for DependencyGraph<Op> {
    fn default() -> Self {
        DependencyGraph {
            children: IndexMap::new(),
            parents: IndexMap::new(),
        }
    }
}

impl<Op: Operation> DependencyGraph<Op> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives `key` an entry in both maps if it doesn't have one yet.
    /// Idempotent.
    pub fn register(&mut self, key: ActionKey<Op>) {
        self.children.entry(key.clone()).or_default();
        self.parents.entry(key).or_default();
    }

    /// Ensures `child` is registered. If `parent` is given, adds the
    /// symmetric edge `child ∈ children[parent] ⇔ parent ∈ parents[child]`.
    /// Idempotent.
    pub fn record_edge(&mut self, parent: Option<&ActionKey<Op>>, child: ActionKey<Op>) {
        self.register(child.clone());
        if let Some(parent) = parent {
            self.register(parent.clone());
            self.children
                .get_mut(parent)
                .expect("just registered")
                .insert(child.clone());
            self.parents
                .get_mut(&child)
                .expect("just registered")
                .insert(parent.clone());
        }
    }

    /// True iff `key`'s children entry is empty or absent.
    pub fn is_ready(&self, key: &ActionKey<Op>) -> bool {
        self.children.get(key).map_or(true, |set| set.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.parents.is_empty()
    }

    /// Marks `key` done: for every parent waiting on it, removes the
    /// edge and reports any parent whose children set just became
    /// empty as newly ready. For every child `key` was still waiting
    /// on (normally none, for an action reached through the ready
    /// queue — but an already-done action may bypass that), removes
    /// the reverse edge and reports any such child left with no other
    /// waiter as orphaned. Finally erases `key`'s own entries.
    pub fn mark_done(&mut self, key: &ActionKey<Op>) -> (Vec<ActionKey<Op>>, Vec<ActionKey<Op>>) {
        let mut newly_ready = Vec::new();
        if let Some(parents_of_key) = self.parents.get(key).cloned() {
            for parent in parents_of_key {
                if let Some(set) = self.children.get_mut(&parent) {
                    set.shift_remove(key);
                    if set.is_empty() {
                        self.children.shift_remove(&parent);
                        newly_ready.push(parent);
                    }
                }
            }
        }

        let mut orphaned = Vec::new();
        if let Some(children_of_key) = self.children.get(key).cloned() {
            for child in children_of_key {
                if let Some(set) = self.parents.get_mut(&child) {
                    set.shift_remove(key);
                    if set.is_empty() {
                        self.parents.shift_remove(&child);
                        orphaned.push(child);
                    }
                }
            }
        }

        self.children.shift_remove(key);
        self.parents.shift_remove(key);

        (newly_ready, orphaned)
    }

    /// All currently-live action keys, in the order they were first
    /// registered (diagnostic use only; not the scheduling order).
    pub fn live_keys(&self) -> impl Iterator<Item = &ActionKey<Op>> {
        self.children.keys()
    }

    pub fn remaining_children(&self, key: &ActionKey<Op>) -> Option<&IndexSet<ActionKey<Op>>> {
        self.children.get(key)
    }

    /// Runs once, at plan-construction time, on a clone of the live
    /// graph: pops ready keys and calls `mark_done` until the clone
    /// drains or gets stuck. A stuck clone means the live graph has a
    /// cycle.
    pub fn check_acyclic(&self) -> Result<(), Error> {
        let mut sim = self.clone();
        let mut ready: VecDeque<ActionKey<Op>> = sim
            .children
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(key, _)| key.clone())
            .collect();

        while let Some(key) = ready.pop_front() {
            let (newly_ready, _orphaned) = sim.mark_done(&key);
            ready.extend(newly_ready);
        }

        if sim.is_empty() {
            Ok(())
        } else {
            let mut lines: Vec<String> = sim
                .children
                .iter()
                .map(|(key, deps)| {
                    let waiting_on: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
                    format!("  {key} still waiting on: [{}]", waiting_on.join(", "))
                })
                .collect();
            lines.sort();
            Err(Error::CycleDetected(lines.join("\n")))
        }
    }
}
