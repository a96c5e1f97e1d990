//! Worker pool (C4): runs `Performer::perform` in a forked child
//! process and hands its outcome back to the coordinator through a
//! result file (spec.md §4.4).

use crate::core::action::{ActionKey, Component, Operation};

/// What a worker reported, reconstructed from its exit status and
/// result file (or synthesized, in the dropped-`SIGCHLD` case).
pub struct Outcome<Op: Operation, C: Component> {
    pub key: ActionKey<Op>,
    pub component: C,
    pub result: anyhow::Result<Option<serde_json::Value>>,
}

/// The external collaborator that actually does an action's work
/// (spec.md §6). Called from inside the forked child; its side effects
/// never touch the coordinator's own memory unless `Op::needed_in_image`
/// says otherwise, in which case the scheduler never hands it to a
/// worker in the first place.
pub trait Performer<Op: Operation, C: Component>: Send + Sync {
    /// Executes the action's real work. Called from inside a forked
    /// worker, and from the coordinator itself for anything that can't
    /// background (spec.md §6).
    fn perform(&self, op: &Op, component: &C) -> anyhow::Result<Option<serde_json::Value>>;

    /// Coordinator-only variant used for the one synchronous retry the
    /// scheduler's cleanup policy runs after a failure; an interactive
    /// embedding can override this to present restart options the way
    /// the original Lisp system's condition system did, in place of
    /// just trying again. Defaults to `perform`.
    fn perform_with_restarts(
        &self,
        op: &Op,
        component: &C,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        self.perform(op, component)
    }

    /// Updates whatever persistent state store backs
    /// `DependencyOracle::already_done`. Called by the scheduler once
    /// an action is confirmed done; a no-op unless an embedding
    /// actually keeps such a store.
    fn mark_operation_done(&self, _op: &Op, _component: &C) {}

    /// Human-readable label for progress lines and logs.
    fn operation_description(&self, op: &Op, component: &C) -> String {
        format!("{}:{}", op.tag(), component.path())
    }
}

impl<Op: Operation, C: Component, P: Performer<Op, C> + ?Sized> Performer<Op, C> for &P {
    fn perform(&self, op: &Op, component: &C) -> anyhow::Result<Option<serde_json::Value>> {
        (**self).perform(op, component)
    }

    fn perform_with_restarts(
        &self,
        op: &Op,
        component: &C,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        (**self).perform_with_restarts(op, component)
    }

    fn mark_operation_done(&self, op: &Op, component: &C) {
        (**self).mark_operation_done(op, component)
    }

    fn operation_description(&self, op: &Op, component: &C) -> String {
        (**self).operation_description(op, component)
    }
}

/// Invoked before every fork if the heap usage ratio it's paired with
/// exceeds `prefork_allocation_reserve_ratio`. `kiln` has no managed
/// heap of its own; this is a seam for an embedding application that
/// does (mirroring the original system's own GC, run from the same
/// pre-fork hook for the same copy-on-write reasons).
pub struct PreforkGc {
    pub reserve_ratio: f64,
    pub heap_usage_ratio: Box<dyn Fn() -> f64 + Send + Sync>,
    pub collect: Box<dyn Fn() + Send + Sync>,
}

impl PreforkGc {
    pub fn maybe_run(&self) {
        if (self.heap_usage_ratio)() >= self.reserve_ratio {
            (self.collect)();
        }
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::Pool;

#[cfg(not(unix))]
mod unsupported;
#[cfg(not(unix))]
pub use unsupported::Pool;

/// Shared pre-fork hygiene: flush stdout/stderr (and the `tracing`
/// writer, by flushing stdout/stderr which is where it's configured to
/// write) so buffered bytes aren't duplicated into a child's
/// copy-on-write memory and emitted twice.
pub(crate) fn flush_stdio() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

