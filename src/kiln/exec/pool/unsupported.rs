//! The backend used wherever `fork` isn't available. A worker contract
//! built on "the child is a copy-on-write snapshot of the parent's live
//! memory" has no faithful equivalent in a fresh spawned process, so
//! rather than fake it with a process-spawn backend that silently
//! drops shared in-image state, this backend always reports forking as
//! unsafe and lets the scheduler's inline fallback carry the build.

use std::path::PathBuf;

use crate::core::action::{ActionKey, Component, Operation};
use crate::error::Error;

use super::{Outcome, Performer, PreforkGc};

pub struct Pool<Op: Operation, C: Component> {
    _marker: std::marker::PhantomData<(Op, C)>,
}

impl<Op: Operation, C: Component> Default for Pool<Op, C> {
    fn default() -> Self {
        Pool {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<Op: Operation, C: Component> Pool<Op, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        0
    }

    pub fn is_empty(&self) -> bool {
        true
    }

    pub fn can_fork() -> bool {
        false
    }

    pub fn fork_worker<P: Performer<Op, C>>(
        &mut self,
        _key: ActionKey<Op>,
        _component: C,
        _result_file: PathBuf,
        _performer: &P,
        _gc: &PreforkGc,
    ) -> Result<(), Error> {
        Err(Error::ForkUnsafe)
    }

    pub fn reap_blocking(&mut self) -> Vec<Outcome<Op, C>> {
        Vec::new()
    }
}
