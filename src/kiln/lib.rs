//! `kiln`: a parallel build executor. Given an action graph discovered
//! through a `DependencyOracle` and performed through a `Performer`,
//! schedules background-safe work onto forked workers, runs anything
//! that must touch the coordinator's own state inline, and can record
//! or replay the exact sequence of actions a build walked.

pub mod breadcrumbs;
pub mod config;
pub mod core;
pub mod error;
pub mod exec;
pub mod ops;
pub mod shell;

pub use breadcrumbs::{ComponentResolver, Recorder, RecordingPerformer};
pub use core::action::{ActionKey, Component, ComponentPath, Operation};
pub use core::plan::{DependencyOracle, Plan, PlanBuilder};
pub use error::Error;
pub use exec::pool::Performer;
pub use exec::scheduler::{Scheduler, Summary};
