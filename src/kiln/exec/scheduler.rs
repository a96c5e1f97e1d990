//! Scheduler (C5): drains a plan's ready queue, dispatching each action
//! to a forked worker when it's safe and profitable to do so and
//! running it inline otherwise, draining the graph as workers report
//! back. Mirrors the old cargo job queue's own control flow: schedule
//! everything that's ready, then block for one piece of work to finish,
//! then repeat, and on the first failure let whatever's still running
//! drain before giving up.

use tracing::{debug, warn};

use crate::core::action::{ActionKey, Component, Operation};
use crate::core::plan::{Plan, Status};
use crate::error::Error;
use crate::exec::pool::{Outcome, Performer, Pool, PreforkGc};
use crate::shell::{DispatchMode, Intent, Shell};

/// What ran, and how it went.
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
}

pub struct Scheduler<'a, Op: Operation, C: Component, P: Performer<Op, C>> {
    plan: Plan<Op, C>,
    pool: Pool<Op, C>,
    performer: &'a P,
    shell: &'a Shell,
    gc: PreforkGc,
    max_forks: usize,
}

impl<'a, Op: Operation, C: Component, P: Performer<Op, C>> Scheduler<'a, Op, C, P> {
    pub fn new(
        plan: Plan<Op, C>,
        performer: &'a P,
        shell: &'a Shell,
        max_forks: usize,
        gc: PreforkGc,
    ) -> Self {
        Scheduler {
            plan,
            pool: Pool::new(),
            performer,
            shell,
            gc,
            max_forks,
        }
    }

    /// Drains the plan. A failed action is retried once, synchronously,
    /// in the coordinator (the cleanup policy below) before it's
    /// treated as a real failure. On the first action that fails both
    /// tries, every worker already dispatched is allowed to finish
    /// (their results are discarded) before the error is returned;
    /// nothing new is dispatched once that happens.
    pub fn execute(mut self) -> Result<Summary, Error> {
        if !Pool::<Op, C>::can_fork() {
            self.shell
                .warn("forking is unsafe in this process; running the whole plan inline");
        }

        let mut completed = 0usize;
        let mut first_failure: Option<Error> = None;

        loop {
            if first_failure.is_none() {
                self.dispatch_ready(&mut completed, &mut first_failure)?;
            }

            if self.pool.is_empty() {
                if self.plan.ready.is_empty() {
                    break;
                }
                if first_failure.is_some() {
                    break;
                }
                continue;
            }

            for outcome in self.pool.reap_blocking() {
                self.finish(outcome, &mut completed, &mut first_failure);
            }

            if first_failure.is_some() && self.pool.is_empty() {
                break;
            }
        }

        if let Some(err) = first_failure {
            return Err(err);
        }
        Ok(Summary {
            completed,
            failed: 0,
        })
    }

    /// Saturation branch (spec.md §4.5): once `max_forks` workers are
    /// already outstanding, dispatch stops entirely and control returns
    /// to `execute()`'s reap loop — it does not keep draining the ready
    /// queue by falling the next background-eligible action through to
    /// an inline run. A record's `background_ok` is a cached
    /// classification (spec.md §3); whether an action forks or runs
    /// inline is decided from that and from `Pool::can_fork()` alone,
    /// never from how many workers happen to be outstanding right now.
    fn dispatch_ready(
        &mut self,
        completed: &mut usize,
        first_failure: &mut Option<Error>,
    ) -> Result<(), Error> {
        while self.pool.outstanding() < self.max_forks {
            let Some(key) = self.plan.ready.dequeue() else {
                break;
            };
            let record = self
                .plan
                .records
                .get_mut(&key)
                .expect("ready key always has a record");
            record.status = Status::Running;
            let description = self.performer.operation_description(&key.op, &record.component);
            let intent = if record.already_done_at_plan_time {
                Intent::Skip
            } else {
                Intent::Try
            };
            let background_ok = record.background_ok;
            let result_file = record.result_file.clone();
            let component = record.component.clone();

            let can_background = background_ok && Pool::<Op, C>::can_fork();

            if can_background {
                debug!(action = %key, "dispatching to worker pool");
                self.shell
                    .will(&description, intent, DispatchMode::Background);
                match self.pool.fork_worker(
                    key.clone(),
                    component,
                    result_file,
                    self.performer,
                    &self.gc,
                ) {
                    Ok(()) => continue,
                    Err(Error::ForkUnsafe) => {
                        // Lost the race (another thread appeared): fall
                        // through to an inline run below instead of
                        // failing the whole build over a scheduling
                        // hazard.
                        debug!(action = %key, "fork became unsafe mid-dispatch, running inline");
                    }
                    Err(e) => return Err(e),
                }
            }

            debug!(action = %key, "running inline");
            self.shell.will(&description, intent, DispatchMode::Foreground);
            let component = self.plan.records[&key].component.clone();
            let outcome = Outcome {
                key: key.clone(),
                component: component.clone(),
                result: self.performer.perform(&key.op, &component),
            };
            self.finish(outcome, completed, first_failure);
            if first_failure.is_some() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Cleanup policy (spec.md §4.5): whichever path an action ran on,
    /// a failure is retried once synchronously in the coordinator
    /// before it's believed — that surfaces the failure with full
    /// in-image context instead of whatever a terminated child could
    /// report. Only a failure that survives the retry counts.
    fn finish(
        &mut self,
        outcome: Outcome<Op, C>,
        completed: &mut usize,
        first_failure: &mut Option<Error>,
    ) {
        let Outcome {
            key,
            component,
            result,
        } = outcome;

        let result = match result {
            Ok(value) => Ok(value),
            Err(cause) => {
                // A worker-crash cause is preserved through to this
                // decision point rather than flattened on arrival, so
                // the retry is logged for what it actually is.
                match cause.downcast_ref::<Error>() {
                    Some(Error::WorkerCrashed { reason }) => {
                        warn!(action = %key, %reason, "worker crashed, retrying inline");
                        self.shell.warn(&format!(
                            "{key} worker crashed ({reason}), retrying in foreground"
                        ));
                    }
                    _ => {
                        warn!(action = %key, %cause, "action failed, retrying inline");
                        self.shell.warn(&format!(
                            "{key} failed ({cause}), retrying in foreground"
                        ));
                    }
                }
                self.performer.perform_with_restarts(&key.op, &component)
            }
        };

        match result {
            Ok(_) => {
                *completed += 1;
                self.performer.mark_operation_done(&key.op, &component);
                let (newly_ready, _orphaned) = self.plan.graph.mark_done(&key);
                if let Some(record) = self.plan.records.get_mut(&key) {
                    record.status = Status::Done;
                }
                for ready_key in newly_ready {
                    let record = &self.plan.records[&ready_key];
                    let priority = crate::core::plan::classify_priority(
                        record.needed_in_image,
                        record.already_done_at_plan_time,
                    );
                    self.plan.ready.enqueue(ready_key.clone(), priority);
                    self.plan.records.get_mut(&ready_key).unwrap().status = Status::Ready;
                }
                let outstanding = self.plan.ready.len() + self.pool.outstanding();
                let description = self.performer.operation_description(&key.op, &component);
                self.shell.done(outstanding, &description);
            }
            Err(cause) => {
                if let Some(record) = self.plan.records.get_mut(&key) {
                    record.status = Status::Failed;
                }
                if first_failure.is_none() {
                    warn!(action = %key, %cause, "action failed after retry, aborting build");
                    self.shell.warn(&format!(
                        "{key} failed after retry, letting outstanding work drain: {cause}"
                    ));
                    *first_failure = Some(Error::ActionFailed {
                        description: key.to_string(),
                        cause,
                    });
                }
            }
        }
    }
}
