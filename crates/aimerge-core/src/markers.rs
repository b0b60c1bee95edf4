//! Merge-conflict marker parsing.
//!
//! A single forward pass over the document's lines segments 2-way
//! (`<<<<<<<` / `=======` / `>>>>>>>`) and 3-way (diff3 style, with a
//! `|||||||` base section) conflict blocks into [`Conflict`] records.
//! Parsing never fails: malformed or unterminated blocks are dropped.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// One detected merge-conflict region. Line indices are 0-based and
/// inclusive, and are only valid against the text they were parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub start_line: usize,
    pub end_line: usize,
    pub current_start: usize,
    /// Less than `current_start` when the "ours" section is empty.
    pub current_end: usize,
    pub incoming_start: usize,
    /// Less than `incoming_start` when the "theirs" section is empty.
    pub incoming_end: usize,
    pub separator_line: usize,
    /// Index of the `|||||||` line for 3-way conflicts.
    pub base_marker_line: Option<usize>,
    pub current_content: String,
    pub incoming_content: String,
    pub base_content: Option<String>,
    pub file_path: PathBuf,
}

impl Conflict {
    /// Whether `line` falls inside `[start_line, end_line]`.
    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    pub fn is_three_way(&self) -> bool {
        self.base_marker_line.is_some()
    }
}

fn start_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<{7}\s+\S.*$").expect("valid start marker pattern"))
}

fn base_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\|{7}\s+\S.*$").expect("valid base marker pattern"))
}

fn separator_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^={7}$").expect("valid separator pattern"))
}

fn end_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^>{7}\s+\S.*$").expect("valid end marker pattern"))
}

pub fn is_start_marker(line: &str) -> bool {
    start_marker().is_match(line)
}

pub fn is_end_marker(line: &str) -> bool {
    end_marker().is_match(line)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InCurrent,
    InBase,
    InIncoming,
}

/// Accumulates one block between its start marker and end marker.
#[derive(Default)]
struct OpenBlock {
    start_line: usize,
    base_marker_line: Option<usize>,
    separator_line: usize,
    current: Vec<String>,
    base: Vec<String>,
    incoming: Vec<String>,
}

impl OpenBlock {
    fn finish(self, end_line: usize, file_path: &Path) -> Conflict {
        Conflict {
            start_line: self.start_line,
            end_line,
            current_start: self.start_line + 1,
            current_end: self.separator_line - 1,
            incoming_start: self.separator_line + 1,
            incoming_end: end_line - 1,
            separator_line: self.separator_line,
            base_marker_line: self.base_marker_line,
            current_content: self.current.join("\n"),
            incoming_content: self.incoming.join("\n"),
            base_content: self.base_marker_line.map(|_| self.base.join("\n")),
            file_path: file_path.to_path_buf(),
        }
    }
}

/// Detect every well-formed conflict block in `text`, top to bottom.
///
/// A start marker seen inside an open block abandons that block and opens
/// a new one, since markers cannot nest. An end marker before any
/// separator drops the block. Blocks still open at end of input are
/// never emitted.
pub fn detect(text: &str, file_path: &Path) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let mut state = State::Outside;
    let mut block = OpenBlock::default();

    for (index, line) in text.lines().enumerate() {
        if start_marker().is_match(line) {
            if state != State::Outside {
                tracing::debug!(
                    file = %file_path.display(),
                    abandoned = block.start_line,
                    line = index,
                    "Start marker inside an open conflict; restarting block"
                );
            }
            block = OpenBlock {
                start_line: index,
                ..Default::default()
            };
            state = State::InCurrent;
            continue;
        }

        match state {
            State::Outside => {}
            State::InCurrent | State::InBase if base_marker().is_match(line) => {
                if block.base_marker_line.is_none() {
                    block.base_marker_line = Some(index);
                    state = State::InBase;
                } else {
                    push_content(&mut block, state, line);
                }
            }
            State::InCurrent | State::InBase if separator_marker().is_match(line) => {
                block.separator_line = index;
                state = State::InIncoming;
            }
            State::InCurrent | State::InBase if end_marker().is_match(line) => {
                tracing::debug!(
                    file = %file_path.display(),
                    start = block.start_line,
                    line = index,
                    "End marker without separator; dropping block"
                );
                state = State::Outside;
            }
            State::InIncoming if end_marker().is_match(line) => {
                let finished = std::mem::take(&mut block);
                conflicts.push(finished.finish(index, file_path));
                state = State::Outside;
            }
            _ => push_content(&mut block, state, line),
        }
    }

    if state != State::Outside {
        tracing::debug!(
            file = %file_path.display(),
            start = block.start_line,
            "Unterminated conflict block ignored"
        );
    }

    conflicts
}

fn push_content(block: &mut OpenBlock, state: State, line: &str) {
    match state {
        State::InCurrent => block.current.push(line.to_string()),
        State::InBase => block.base.push(line.to_string()),
        State::InIncoming => block.incoming.push(line.to_string()),
        State::Outside => {}
    }
}

/// Cheap existence probe: a start marker, a separator and an end marker
/// each appear somewhere. Their order and nesting are not checked.
pub fn has_conflicts(text: &str) -> bool {
    let mut start = false;
    let mut separator = false;
    let mut end = false;
    for line in text.lines() {
        start |= start_marker().is_match(line);
        separator |= separator_marker().is_match(line);
        end |= end_marker().is_match(line);
        if start && separator && end {
            return true;
        }
    }
    false
}

/// The first conflict whose span contains `line`.
pub fn conflict_at(conflicts: &[Conflict], line: usize) -> Option<&Conflict> {
    conflicts.iter().find(|c| c.contains_line(line))
}

/// Up to `n` lines before and after the conflict, framed so the two
/// segments can be told apart.
pub fn extract_context(text: &str, conflict: &Conflict, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let before_start = conflict.start_line.saturating_sub(n);
    let before_end = conflict.start_line.min(lines.len());
    let after_start = (conflict.end_line + 1).min(lines.len());
    let after_end = conflict.end_line.saturating_add(n).saturating_add(1).min(lines.len());

    let before = lines[before_start.min(before_end)..before_end].join("\n");
    let after = lines[after_start..after_end.max(after_start)].join("\n");

    format!(
        "--- Context before conflict ---\n{}\n--- Context after conflict ---\n{}",
        before, after
    )
}
