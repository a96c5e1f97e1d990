//! Breadcrumb log (C6): an append-only record of the exact action
//! sequence a build performed, and a replay driver that forces a later
//! build to walk that same sequence in that same order. Exists for the
//! parallel build's own non-determinism: two runs over an unchanged
//! dependency graph can interleave background and foreground work
//! differently; breadcrumbs pin a run down so a flaky failure can be
//! reproduced deterministically.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::core::action::{ActionKey, Component, ComponentPath, Operation};
use crate::core::plan::{plan_from_sequence, Plan};
use crate::exec::pool::Performer;

/// Leading comment line every breadcrumb log opens with, per the file
/// format's header requirement.
const HEADER: &str = ";; Breadcrumbs";

/// The system-name token every record carries as its second element,
/// ahead of the action's own path components. `kiln` is only ever one
/// build system writing its own log, so this is a constant rather than
/// a per-record lookup; a log from a future, different build system
/// would carry a different name and `read_sequence` would refuse it.
const SYSTEM_NAME: &str = "kiln";

pub struct Recorder {
    file: File,
}

impl Recorder {
    /// Opens `path` for writing, truncating whatever was there and
    /// creating it if absent, then writes the header line. A breadcrumb
    /// log is a record of one run's own sequence; reusing a path across
    /// runs must start that sequence over; it must never accumulate.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path)?;
        writeln!(file, "{HEADER}")?;
        file.flush()?;
        Ok(Recorder { file })
    }

    pub fn record<Op: Operation>(&mut self, key: &ActionKey<Op>) -> std::io::Result<()> {
        let (tag, segments) = key.reify();
        writeln!(self.file, "{}", encode_record(tag, segments))?;
        self.file.flush()
    }
}

/// One line per action: `(<kind-tag> <system-name> <path-component>*)`.
/// Each component is written as a quoted token so a `/` or space inside
/// one can't be mistaken for a token boundary.
fn encode_record(tag: &str, segments: &[String]) -> String {
    let mut out = format!("({tag} {SYSTEM_NAME}");
    for segment in segments {
        out.push(' ');
        out.push_str(&quote(segment));
    }
    out.push(')');
    out
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Splits a parenthesized record's interior into its whitespace- or
/// quote-delimited tokens.
fn tokenize(inner: &str) -> anyhow::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut token = String::new();
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(escaped) = chars.next() {
                            token.push(escaped);
                        }
                    }
                    Some('"') => break,
                    Some(c) => token.push(c),
                    None => return Err(anyhow::anyhow!("unterminated quoted token: {inner:?}")),
                }
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }
    Ok(tokens)
}

fn parse_record(line: &str, lineno: usize) -> anyhow::Result<(String, ComponentPath)> {
    let inner = line
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| anyhow::anyhow!("malformed breadcrumb at line {lineno}: {line:?}"))?;
    let mut tokens = tokenize(inner)?.into_iter();
    let tag = tokens
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty breadcrumb record at line {lineno}"))?;
    let system = tokens.next().ok_or_else(|| {
        anyhow::anyhow!("breadcrumb at line {lineno} is missing its system name: {line:?}")
    })?;
    if system != SYSTEM_NAME {
        return Err(anyhow::anyhow!(
            "breadcrumb at line {lineno} names system {system:?}, expected {SYSTEM_NAME:?}"
        ));
    }
    Ok((tag, ComponentPath(tokens.collect())))
}

pub fn read_sequence<Op: Operation>(path: &Path) -> anyhow::Result<Vec<ActionKey<Op>>> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines().enumerate();

    match lines.next() {
        Some((_, header)) => {
            let header = header?;
            if header.trim() != HEADER {
                return Err(anyhow::anyhow!(
                    "breadcrumb log is missing its {HEADER:?} header, found {header:?} instead"
                ));
            }
        }
        None => return Err(anyhow::anyhow!("breadcrumb log is empty, expected {HEADER:?} header")),
    }

    let mut out = Vec::new();
    for (lineno, line) in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (tag, path) = parse_record(line, lineno + 1)?;
        let key = ActionKey::from_reified(&tag, path).ok_or_else(|| {
            anyhow::anyhow!("unknown operation tag {tag:?} at line {}", lineno + 1)
        })?;
        out.push(key);
    }
    Ok(out)
}

/// Wraps a `Performer`, appending every action it completes
/// successfully to a breadcrumb log. A failed action is never
/// recorded: it never becomes part of the sequence a later replay is
/// supposed to reproduce.
pub struct RecordingPerformer<Op: Operation, C: Component, P: Performer<Op, C>> {
    inner: P,
    recorder: Mutex<Recorder>,
    _marker: std::marker::PhantomData<(Op, C)>,
}

impl<Op: Operation, C: Component, P: Performer<Op, C>> RecordingPerformer<Op, C, P> {
    pub fn new(inner: P, recorder: Recorder) -> Self {
        RecordingPerformer {
            inner,
            recorder: Mutex::new(recorder),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<Op: Operation, C: Component, P: Performer<Op, C>> Performer<Op, C>
    for RecordingPerformer<Op, C, P>
{
    fn perform(&self, op: &Op, component: &C) -> anyhow::Result<Option<serde_json::Value>> {
        let result = self.inner.perform(op, component)?;
        let key = ActionKey::new(op.clone(), component.path());
        if let Ok(mut recorder) = self.recorder.lock() {
            let _ = recorder.record(&key);
        }
        Ok(result)
    }
}

/// Resolves a breadcrumb's bare `(tag, path)` back into a full
/// component, the data the recorded run had but the log itself
/// doesn't carry. An embedding application supplies this; `kiln`'s demo
/// binary implements it by re-reading the same manifest the original
/// run used.
pub trait ComponentResolver<C: Component>: Send + Sync {
    fn resolve(&self, path: &ComponentPath) -> anyhow::Result<C>;
}

/// Builds a plan that walks `path`'s recorded sequence exactly,
/// ignoring whatever `already_done` status those actions might have
/// now: a replay exists to re-run history, not to skip it.
pub fn replay_plan<Op: Operation, C: Component, R: ComponentResolver<C>>(
    path: &Path,
    resolver: &R,
    result_dir: impl AsRef<Path>,
) -> anyhow::Result<Plan<Op, C>> {
    let keys = read_sequence::<Op>(path)?;
    let mut sequence = Vec::with_capacity(keys.len());
    for key in keys {
        let component = resolver.resolve(&key.path)?;
        sequence.push((key, component));
    }
    Ok(plan_from_sequence(
        sequence,
        result_dir,
        |op, _component| op.needed_in_image(),
        |_op, _component| false,
    ))
}

/// Compares a recorded sequence against the sequence a run actually
/// walked, returning a description of the first point of divergence.
pub fn diff<Op: Operation>(
    recorded: &[ActionKey<Op>],
    actual: &[ActionKey<Op>],
) -> Option<String> {
    for (i, (r, a)) in recorded.iter().zip(actual.iter()).enumerate() {
        if r != a {
            return Some(format!("step {i}: recorded {r}, actual {a}"));
        }
    }
    if recorded.len() != actual.len() {
        return Some(format!(
            "recorded {} steps, actual {} steps",
            recorded.len(),
            actual.len()
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::StdOp;

    fn key(op: StdOp, name: &str) -> ActionKey<StdOp> {
        ActionKey::new(op, ComponentPath::new([name]))
    }

    #[test]
    fn recorded_sequence_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crumbs.log");
        let mut recorder = Recorder::create(&path).unwrap();
        recorder.record(&key(StdOp::Compile, "a/b")).unwrap();
        recorder.record(&key(StdOp::Load, "c")).unwrap();

        let sequence = read_sequence::<StdOp>(&path).unwrap();
        assert_eq!(sequence, vec![key(StdOp::Compile, "a/b"), key(StdOp::Load, "c")]);
    }

    #[test]
    fn diff_reports_first_mismatch() {
        let recorded = vec![key(StdOp::Compile, "a"), key(StdOp::Load, "b")];
        let actual = vec![key(StdOp::Compile, "a"), key(StdOp::Load, "x")];
        let report = diff(&recorded, &actual).unwrap();
        assert!(report.contains("step 1"));
    }

    #[test]
    fn diff_reports_length_mismatch_when_prefix_matches() {
        let recorded = vec![key(StdOp::Compile, "a"), key(StdOp::Load, "b")];
        let actual = vec![key(StdOp::Compile, "a")];
        let report = diff(&recorded, &actual).unwrap();
        assert!(report.contains("recorded 2 steps"));
    }

    #[test]
    fn identical_sequences_have_no_diff() {
        let recorded = vec![key(StdOp::Compile, "a")];
        assert!(diff(&recorded, &recorded).is_none());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crumbs.log");
        std::fs::write(&path, format!("{HEADER}\n(bogus kiln \"a\" \"b\")\n")).unwrap();
        assert!(read_sequence::<StdOp>(&path).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crumbs.log");
        std::fs::write(&path, "(compile kiln \"a\")\n").unwrap();
        assert!(read_sequence::<StdOp>(&path).is_err());
    }

    #[test]
    fn reusing_a_path_truncates_the_prior_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crumbs.log");
        let mut recorder = Recorder::create(&path).unwrap();
        recorder.record(&key(StdOp::Compile, "a")).unwrap();
        recorder.record(&key(StdOp::Compile, "b")).unwrap();
        drop(recorder);

        let mut recorder = Recorder::create(&path).unwrap();
        recorder.record(&key(StdOp::Load, "c")).unwrap();
        drop(recorder);

        let sequence = read_sequence::<StdOp>(&path).unwrap();
        assert_eq!(sequence, vec![key(StdOp::Load, "c")]);
    }
}
