//! Action identity (C1).
//!
//! An action is a `(operation, component)` pair. This module gives that
//! pair a canonical, hashable key, plus the reify/from_reified round trip
//! the breadcrumb replay driver needs.

use std::fmt;
use std::hash::Hash;

/// A canonical path to a buildable component: a sequence of names from
/// the root system. Equality and ordering are purely structural — the
/// caller (the dependency oracle / component type) is responsible for
/// normalizing paths so that equal components produce equal paths.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct ComponentPath(pub Vec<String>);

impl ComponentPath {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ComponentPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ComponentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl<S: Into<String>> FromIterator<S> for ComponentPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ComponentPath(iter.into_iter().map(Into::into).collect())
    }
}

/// The operation-kind capability table from spec.md §3: each kind knows
/// whether it must run in the live image, and whether it is safe to run
/// in a forked worker. `tag`/`from_tag` are the round trip `reify` and
/// `from_reified` need for breadcrumbs, independent of however the
/// concrete enum is laid out.
pub trait Operation: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static {
    /// Stable, breadcrumb-safe identifier for this operation kind.
    fn tag(&self) -> &'static str;

    /// Inverse of `tag`, used by the breadcrumb replay driver.
    fn from_tag(tag: &str) -> Option<Self>
    where
        Self: Sized;

    /// Must this operation's effects persist in the coordinator's own
    /// memory (e.g. loading a compiled artifact)?
    fn needed_in_image(&self) -> bool;

    /// Is it safe to perform this operation in a forked worker?
    fn can_run_in_background(&self) -> bool;
}

/// A buildable unit. Equality is defined by `path()` alone; whatever
/// metadata the performer collaborator needs is opaque to the core.
pub trait Component: Clone + fmt::Debug + Send + Sync + 'static {
    fn path(&self) -> ComponentPath;
}

/// `(OperationKind, ComponentPath)`. Value-typed and hashable: two
/// actions with equal keys denote the same action.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ActionKey<Op: Operation> {
    pub op: Op,
    pub path: ComponentPath,
}

impl<Op: Operation> ActionKey<Op> {
    pub fn new(op: Op, path: ComponentPath) -> Self {
        ActionKey { op, path }
    }

    /// `reify(key) -> (kind_tag, path)`, for log/breadcrumb emission.
    pub fn reify(&self) -> (&'static str, &[String]) {
        (self.op.tag(), self.path.segments())
    }

    /// Inverse of `reify`, used by the replay driver.
    pub fn from_reified(kind_tag: &str, path: ComponentPath) -> Option<Self> {
        Op::from_tag(kind_tag).map(|op| ActionKey { op, path })
    }
}

impl<Op: Operation> fmt::Display for ActionKey<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op.tag(), self.path)
    }
}
