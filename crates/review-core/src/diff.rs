//! Line-level diff model for document revisions.
//!
//! A `DiffResult` is a complete, ordered view of a comparison: concatenating
//! every chunk's lines reproduces the whole document with each line marked
//! added, deleted or unchanged. Renderers build unified, split or inline
//! views from it without re-deriving alignment.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, DiffTag, TextDiff};
use std::borrow::Cow;

/// Classification of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineType {
    Add,
    Delete,
    Normal,
}

/// A single line in a diff chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub line_type: DiffLineType,
    pub content: String,
    /// 1-based line number in the `from` revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line_number: Option<usize>,
    /// 1-based line number in the `to` revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line_number: Option<usize>,
}

impl DiffLine {
    pub fn is_change(&self) -> bool {
        self.line_type != DiffLineType::Normal
    }
}

/// An ordered run of lines: either all unchanged, or one change group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffChunk {
    pub lines: Vec<DiffLine>,
}

impl DiffChunk {
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(DiffLine::is_change)
    }

    /// Format this chunk as unified diff body text.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            let prefix = match line.line_type {
                DiffLineType::Add => "+",
                DiffLineType::Delete => "-",
                DiffLineType::Normal => " ",
            };
            text.push_str(prefix);
            text.push_str(&line.content);
            text.push('\n');
        }
        text
    }
}

/// One row of a side-by-side view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRow<'a> {
    pub left: Option<&'a DiffLine>,
    pub right: Option<&'a DiffLine>,
}

/// Full comparison between two revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub chunks: Vec<DiffChunk>,
    pub additions: usize,
    pub deletions: usize,
    /// Number of change groups (not lines)
    pub changes: usize,
}

impl DiffResult {
    /// Build a result from chunks, counting additions and deletions.
    pub fn new(chunks: Vec<DiffChunk>, changes: usize) -> Self {
        let mut additions = 0;
        let mut deletions = 0;
        for line in chunks.iter().flat_map(|c| c.lines.iter()) {
            match line.line_type {
                DiffLineType::Add => additions += 1,
                DiffLineType::Delete => deletions += 1,
                DiffLineType::Normal => {}
            }
        }
        Self {
            chunks,
            additions,
            deletions,
            changes,
        }
    }

    /// Every line of the comparison, in order.
    pub fn lines(&self) -> impl Iterator<Item = &DiffLine> {
        self.chunks.iter().flat_map(|c| c.lines.iter())
    }

    pub fn has_changes(&self) -> bool {
        has_diff_changes(self)
    }

    /// Pair lines for a side-by-side view.
    ///
    /// Unchanged lines appear on both sides. Within a change group, deleted
    /// lines fill the left column and added lines the right, top-aligned.
    pub fn split_rows(&self) -> Vec<SplitRow<'_>> {
        let mut rows = Vec::new();
        for chunk in &self.chunks {
            if !chunk.has_changes() {
                rows.extend(chunk.lines.iter().map(|line| SplitRow {
                    left: Some(line),
                    right: Some(line),
                }));
                continue;
            }

            let deleted: Vec<&DiffLine> = chunk
                .lines
                .iter()
                .filter(|l| l.line_type == DiffLineType::Delete)
                .collect();
            let added: Vec<&DiffLine> = chunk
                .lines
                .iter()
                .filter(|l| l.line_type == DiffLineType::Add)
                .collect();

            for i in 0..deleted.len().max(added.len()) {
                rows.push(SplitRow {
                    left: deleted.get(i).copied(),
                    right: added.get(i).copied(),
                });
            }
        }
        rows
    }

    /// Format the whole comparison as unified diff body text.
    pub fn to_unified(&self) -> String {
        self.chunks.iter().map(DiffChunk::to_text).collect()
    }
}

/// True iff at least one line was added or deleted.
pub fn has_diff_changes(diff: &DiffResult) -> bool {
    diff.lines().any(DiffLine::is_change)
}

/// Compare two texts line by line.
///
/// A missing trailing newline is not treated as a change; every other
/// difference is reported. Identical inputs produce only `Normal` lines.
pub fn compute_line_diff(old: &str, new: &str) -> DiffResult {
    let old = with_final_newline(old);
    let new = with_final_newline(new);
    let diff = TextDiff::from_lines(&*old, &*new);

    let mut chunks: Vec<DiffChunk> = Vec::new();
    let mut current = DiffChunk::default();
    let mut current_is_change = false;
    let mut changes = 0;

    for op in diff.ops() {
        let is_change = op.tag() != DiffTag::Equal;
        if is_change != current_is_change && !current.lines.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if is_change && (!current_is_change || current.lines.is_empty()) {
            changes += 1;
        }
        current_is_change = is_change;

        for change in diff.iter_changes(op) {
            let line_type = match change.tag() {
                ChangeTag::Equal => DiffLineType::Normal,
                ChangeTag::Delete => DiffLineType::Delete,
                ChangeTag::Insert => DiffLineType::Add,
            };
            current.lines.push(DiffLine {
                line_type,
                content: strip_line_ending(change.value()).to_string(),
                old_line_number: change.old_index().map(|i| i + 1),
                new_line_number: change.new_index().map(|i| i + 1),
            });
        }
    }
    if !current.lines.is_empty() {
        chunks.push(current);
    }

    DiffResult::new(chunks, changes)
}

fn with_final_newline(text: &str) -> Cow<'_, str> {
    if text.is_empty() || text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{}\n", text))
    }
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_has_no_changes() {
        let text = "# Title\n\nBody line\n";
        let diff = compute_line_diff(text, text);
        assert_eq!(diff.additions, 0);
        assert_eq!(diff.deletions, 0);
        assert_eq!(diff.changes, 0);
        assert!(!has_diff_changes(&diff));
        assert!(diff.lines().all(|l| l.line_type == DiffLineType::Normal));
        assert_eq!(diff.lines().count(), 3);
    }

    #[test]
    fn test_empty_texts() {
        let diff = compute_line_diff("", "");
        assert!(diff.chunks.is_empty());
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_single_addition() {
        let diff = compute_line_diff("a\nb\n", "a\nb\nc\n");
        assert_eq!(diff.additions, 1);
        assert_eq!(diff.deletions, 0);
        assert_eq!(diff.changes, 1);
        assert!(diff.has_changes());

        let added: Vec<_> = diff
            .lines()
            .filter(|l| l.line_type == DiffLineType::Add)
            .collect();
        assert_eq!(added[0].content, "c");
        assert_eq!(added[0].new_line_number, Some(3));
        assert_eq!(added[0].old_line_number, None);
    }

    #[test]
    fn test_chunks_reconstruct_both_sides() {
        let old = "one\ntwo\nthree\nfour\n";
        let new = "one\n2\nthree\nfour\nfive\n";
        let diff = compute_line_diff(old, new);

        let rebuilt_old: Vec<&str> = diff
            .lines()
            .filter(|l| l.line_type != DiffLineType::Add)
            .map(|l| l.content.as_str())
            .collect();
        let rebuilt_new: Vec<&str> = diff
            .lines()
            .filter(|l| l.line_type != DiffLineType::Delete)
            .map(|l| l.content.as_str())
            .collect();

        assert_eq!(rebuilt_old, vec!["one", "two", "three", "four"]);
        assert_eq!(rebuilt_new, vec!["one", "2", "three", "four", "five"]);
        assert_eq!(diff.changes, 2);
    }

    #[test]
    fn test_chunks_alternate_between_normal_and_changes() {
        let diff = compute_line_diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(diff.chunks.len(), 3);
        assert!(!diff.chunks[0].has_changes());
        assert!(diff.chunks[1].has_changes());
        assert!(!diff.chunks[2].has_changes());

        // Within a replacement, deletions come first.
        let kinds: Vec<_> = diff.chunks[1].lines.iter().map(|l| l.line_type).collect();
        assert_eq!(kinds, vec![DiffLineType::Delete, DiffLineType::Add]);
    }

    #[test]
    fn test_missing_final_newline_is_not_a_change() {
        let diff = compute_line_diff("a\nb", "a\nb\n");
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_split_rows_pair_changes() {
        let diff = compute_line_diff("a\nb\nc\n", "a\nB\nB2\nc\n");
        let rows = diff.split_rows();
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[1].left.map(|l| l.content.as_str()), Some("b"));
        assert_eq!(rows[1].right.map(|l| l.content.as_str()), Some("B"));
        assert!(rows[2].left.is_none());
        assert_eq!(rows[2].right.map(|l| l.content.as_str()), Some("B2"));
    }

    #[test]
    fn test_unified_text() {
        let diff = compute_line_diff("a\nb\n", "a\nc\n");
        assert_eq!(diff.to_unified(), " a\n-b\n+c\n");
    }

    #[test]
    fn test_json_shape() {
        let line = DiffLine {
            line_type: DiffLineType::Add,
            content: "x".into(),
            old_line_number: None,
            new_line_number: Some(4),
        };
        let json = serde_json::to_string(&line).unwrap();
        assert_eq!(json, r#"{"type":"add","content":"x","newLineNumber":4}"#);
    }
}
