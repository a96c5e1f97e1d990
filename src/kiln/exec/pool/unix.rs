//! The real backend: `fork` a copy of the running image, run
//! `Performer::perform` in the child, hand the outcome back through a
//! result file, `waitpid` in the parent. Grounded in the fork/wait
//! split every process-pool build tool in this family uses: the parent
//! never blocks on the child's actual work, only on its exit.

use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::core::action::{ActionKey, Component, Operation};
use crate::error::Error;
use crate::exec::resultfile;

use super::{Outcome, Performer, PreforkGc};

struct PendingWorker<Op: Operation, C: Component> {
    key: ActionKey<Op>,
    component: C,
    result_file: PathBuf,
}

/// One live worker slot per outstanding fork. `workers` is keyed by pid
/// so `reap_blocking` can match a `waitpid` result straight back to the
/// action it belongs to.
pub struct Pool<Op: Operation, C: Component> {
    workers: IndexMap<libc::pid_t, PendingWorker<Op, C>>,
}

impl<Op: Operation, C: Component> Default for Pool<Op, C> {
    fn default() -> Self {
        Pool {
            workers: IndexMap::new(),
        }
    }
}

impl<Op: Operation, C: Component> Pool<Op, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Forking is only safe from a single-threaded process: a thread
    /// other than the one calling `fork` simply vanishes in the child,
    /// taking any lock it held with it. Linux exposes the live thread
    /// count through `/proc/self/status`; anywhere else we can't check
    /// cheaply, so we trust the caller.
    pub fn can_fork() -> bool {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_to_string("/proc/self/status")
                .ok()
                .and_then(|contents| {
                    contents
                        .lines()
                        .find_map(|line| line.strip_prefix("Threads:"))
                        .and_then(|value| value.trim().parse::<u32>().ok())
                })
                .map(|threads| threads == 1)
                .unwrap_or(true)
        }
        #[cfg(not(target_os = "linux"))]
        {
            true
        }
    }

    /// Forks a worker that performs `(key.op, component)` and writes its
    /// outcome to `result_file`. Returns `Error::ForkUnsafe` without
    /// forking if more than one thread is live.
    pub fn fork_worker<P: Performer<Op, C>>(
        &mut self,
        key: ActionKey<Op>,
        component: C,
        result_file: PathBuf,
        performer: &P,
        gc: &PreforkGc,
    ) -> Result<(), Error> {
        if !Self::can_fork() {
            return Err(Error::ForkUnsafe);
        }

        gc.maybe_run();
        super::flush_stdio();

        // The child inherits whatever disposition SIGCHLD has in the
        // parent; reset it to default so the child's own descendants
        // (if `perform` spawns any) reap normally rather than inheriting
        // a handler tuned for our worker bookkeeping.
        unsafe {
            libc::signal(libc::SIGCHLD, libc::SIG_DFL);
        }

        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(Error::IoError(std::io::Error::last_os_error())),
            0 => {
                // Child: run to completion and exit. Never return,
                // never unwind across the fork boundary.
                child_main(&key, &component, &result_file, performer);
                unsafe { libc::_exit(0) }
            }
            pid => {
                trace!(%pid, action = %key, "forked worker");
                self.workers.insert(
                    pid,
                    PendingWorker {
                        key,
                        component,
                        result_file,
                    },
                );
                Ok(())
            }
        }
    }

    /// Blocks for the next worker to exit, classifies its status, and
    /// returns its outcome. On a dropped `SIGCHLD` (`waitpid` reports
    /// `ECHILD` despite workers still outstanding) every outstanding
    /// worker is synthesized as failed, per the fallback decided for
    /// this condition: the coordinator cannot tell which of them
    /// actually finished, so none of their results can be trusted.
    pub fn reap_blocking(&mut self) -> Vec<Outcome<Op, C>> {
        loop {
            if self.workers.is_empty() {
                return Vec::new();
            }

            let mut status: i32 = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, 0) };

            if pid == -1 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ECHILD) {
                    warn!(
                        outstanding = self.workers.len(),
                        "dropped SIGCHLD: treating all outstanding workers as failed"
                    );
                    return self
                        .workers
                        .drain(..)
                        .map(|(_, worker)| Outcome {
                            key: worker.key,
                            component: worker.component,
                            result: Err(anyhow::Error::new(Error::WorkerCrashed {
                                reason: "lost track of worker process (dropped SIGCHLD)".into(),
                            })),
                        })
                        .collect();
                }
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                // Some other, unexpected waitpid failure: nothing useful
                // to report yet, try again.
                continue;
            }

            if let Some(worker) = self.workers.shift_remove(&pid) {
                return vec![classify_exit(status, worker)];
            }
            // Reaped a pid we aren't tracking (shouldn't happen, since
            // we're the only caller of fork in this process); keep
            // waiting for one of ours.
        }
    }
}

fn child_main<Op: Operation, C: Component, P: Performer<Op, C>>(
    key: &ActionKey<Op>,
    component: &C,
    result_file: &std::path::Path,
    performer: &P,
) {
    unsafe {
        libc::setsid();
    }
    let record = match performer.perform(&key.op, component) {
        Ok(result) => resultfile::ResultRecord::success(result),
        Err(cause) => resultfile::ResultRecord::failure(cause.to_string()),
    };
    // A write failure here can't be reported anywhere useful; the
    // parent will see a clean exit with an unreadable result file and
    // fail the action accordingly.
    let _ = resultfile::write(result_file, &record);
    super::flush_stdio();
}

/// Classifies a reaped worker's exit. A nonzero exit, a signal kill, or
/// an unreadable result file is a crash — the worker never got to
/// report anything, as distinct from a worker that ran to completion
/// and reported its own failure through the result file. `Error::
/// WorkerCrashed` carries that distinction to the scheduler rather than
/// collapsing both cases into the same opaque cause.
fn classify_exit<Op: Operation, C: Component>(
    status: i32,
    worker: PendingWorker<Op, C>,
) -> Outcome<Op, C> {
    let result = if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
        match resultfile::read(&worker.result_file) {
            Ok(record) => match record.condition {
                Some(condition) => Err(anyhow::anyhow!(condition)),
                None => Ok(record.result),
            },
            Err(e) => Err(anyhow::Error::new(Error::WorkerCrashed {
                reason: format!("exited cleanly but its result file was unreadable: {e}"),
            })),
        }
    } else if libc::WIFSIGNALED(status) {
        Err(anyhow::Error::new(Error::WorkerCrashed {
            reason: format!("killed by signal {}", libc::WTERMSIG(status)),
        }))
    } else {
        Err(anyhow::Error::new(Error::WorkerCrashed {
            reason: format!("exited with status {}", libc::WEXITSTATUS(status)),
        }))
    };
    Outcome {
        key: worker.key,
        component: worker.component,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_has_no_outstanding_workers() {
        let pool = Pool::<crate::ops::StdOp, TestComponent>::new();
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.is_empty());
    }

    #[derive(Clone, Debug)]
    struct TestComponent;

    impl Component for TestComponent {
        fn path(&self) -> crate::core::action::ComponentPath {
            crate::core::action::ComponentPath::new(["test"])
        }
    }
}
