//! Result file format (spec.md §6):
//!
//! ```text
//! (:process-done [:result <opaque>] [:condition <string>])
//! ```
//!
//! One record per file. `<opaque>` is a compact JSON value (the payload
//! is opaque to the core; JSON just gives it a concrete, parseable
//! shape). Absent `:condition` means success.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::action::{ActionKey, Operation};

#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    pub result: Option<serde_json::Value>,
    pub condition: Option<String>,
}

impl ResultRecord {
    pub fn success(result: Option<serde_json::Value>) -> Self {
        ResultRecord {
            result,
            condition: None,
        }
    }

    pub fn failure(condition: impl Into<String>) -> Self {
        ResultRecord {
            result: None,
            condition: Some(condition.into()),
        }
    }
}

/// `<canonical-output-dir>/<component-file-name>.<kind>.process-result`
pub fn path_for<Op: Operation>(result_dir: &Path, key: &ActionKey<Op>) -> PathBuf {
    let (tag, path) = key.reify();
    let file_name = path.join("__");
    result_dir.join(format!("{file_name}.{tag}.process-result"))
}

pub fn write(path: &Path, record: &ResultRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::from("(:process-done");
    if let Some(result) = &record.result {
        out.push_str(" :result ");
        out.push_str(&serde_json::to_string(result).expect("json values always serialize"));
    }
    if let Some(condition) = &record.condition {
        out.push_str(" :condition ");
        out.push_str(&quote(condition));
    }
    out.push_str(")\n");

    let mut file = fs::File::create(path)?;
    file.write_all(out.as_bytes())?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

#[derive(Debug)]
pub enum ReadError {
    Io(std::io::Error),
    Malformed(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "could not read result file: {e}"),
            ReadError::Malformed(msg) => write!(f, "invalid result file: {msg}"),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}

pub fn read(path: &Path) -> Result<ResultRecord, ReadError> {
    let text = fs::read_to_string(path)?;
    parse(text.trim())
}

fn parse(text: &str) -> Result<ResultRecord, ReadError> {
    let text = text
        .strip_prefix("(:process-done")
        .ok_or_else(|| ReadError::Malformed("missing (:process-done header".into()))?;
    let text = text
        .strip_suffix(')')
        .ok_or_else(|| ReadError::Malformed("missing closing paren".into()))?;

    let mut result = None;
    let mut condition = None;
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix(":result") {
            let tail = tail.trim_start();
            let (value, tail) = take_json_token(tail)?;
            result = Some(value);
            rest = tail.trim_start();
        } else if let Some(tail) = rest.strip_prefix(":condition") {
            let tail = tail.trim_start();
            let (value, tail) = take_quoted(tail)?;
            condition = Some(value);
            rest = tail.trim_start();
        } else {
            return Err(ReadError::Malformed(format!(
                "unexpected token in result record: {rest:?}"
            )));
        }
    }

    Ok(ResultRecord { result, condition })
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Reads one quoted, backslash-escaped string starting at `s`.
/// Returns the unescaped value and the remainder of `s` after the
/// closing quote.
fn take_quoted(s: &str) -> Result<(String, &str), ReadError> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return Err(ReadError::Malformed("expected a quoted string".into())),
    }
    let mut value = String::new();
    let mut escaped = false;
    for (idx, c) in chars {
        if escaped {
            match c {
                'n' => value.push('\n'),
                other => value.push(other),
            }
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return Ok((value, &s[idx + 1..])),
            other => value.push(other),
        }
    }
    Err(ReadError::Malformed("unterminated quoted string".into()))
}

/// Reads one JSON token (string, object, array, or bare literal)
/// starting at `s`, returning the parsed value and the unconsumed
/// remainder.
fn take_json_token(s: &str) -> Result<(serde_json::Value, &str), ReadError> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return Err(ReadError::Malformed("expected a :result value".into()));
    }
    let end = match bytes[0] {
        b'"' => scan_json_string(s)?,
        b'{' | b'[' => scan_json_bracketed(s)?,
        _ => s
            .find(|c: char| c.is_whitespace() || c == ')')
            .unwrap_or(s.len()),
    };
    let (token, rest) = s.split_at(end);
    let value = serde_json::from_str(token)
        .map_err(|e| ReadError::Malformed(format!("invalid JSON in :result: {e}")))?;
    Ok((value, rest))
}

fn scan_json_string(s: &str) -> Result<usize, ReadError> {
    let mut escaped = false;
    for (idx, c) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return Ok(idx + 1),
            _ => {}
        }
    }
    Err(ReadError::Malformed("unterminated JSON string in :result".into()))
}

fn scan_json_bracketed(s: &str) -> Result<usize, ReadError> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(idx + 1);
                }
            }
            _ => {}
        }
    }
    Err(ReadError::Malformed(
        "unterminated JSON object/array in :result".into(),
    ))
}
