//! Anchoring review comments to text.
//!
//! Comments carry the character offsets they were created with. Offsets are
//! never rewritten; instead every render re-derives spans from the current
//! content, falling back to a search for the selected text when the stored
//! offsets no longer fit. A comment whose text cannot be found simply has no
//! span for that render.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#ffeb3b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentKind {
    General,
    Selection,
}

/// A persisted review comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommentKind,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    /// Character offset. Signed so that degraded records still deserialize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_color: Option<String>,
}

impl Comment {
    pub fn general(comment: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: CommentKind::General,
            comment: comment.into(),
            timestamp: Utc::now(),
            selected_text: None,
            start_offset: None,
            end_offset: None,
            highlight_color: None,
        }
    }

    pub fn selection(
        comment: impl Into<String>,
        selected_text: impl Into<String>,
        start: usize,
        end: usize,
        highlight_color: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: CommentKind::Selection,
            comment: comment.into(),
            timestamp: Utc::now(),
            selected_text: Some(selected_text.into()),
            start_offset: Some(start as i64),
            end_offset: Some(end as i64),
            highlight_color,
        }
    }

    fn color(&self) -> &str {
        self.highlight_color
            .as_deref()
            .unwrap_or(DEFAULT_HIGHLIGHT_COLOR)
    }

    /// Stored offsets, if they describe a non-empty range inside `char_len`.
    fn stored_range(&self, char_len: usize) -> Option<(usize, usize)> {
        let start = usize::try_from(self.start_offset?).ok()?;
        let end = usize::try_from(self.end_offset?).ok()?;
        (start < end && end <= char_len).then_some((start, end))
    }
}

/// A comment anchored to a character range of the current content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub color: String,
    pub comment_id: String,
}

/// Derive the spans to highlight in `content`, ordered by start offset.
pub fn to_spans(comments: &[Comment], content: &str) -> Vec<AnnotationSpan> {
    let char_len = content.chars().count();
    let mut spans: Vec<AnnotationSpan> = comments
        .iter()
        .filter(|c| c.kind == CommentKind::Selection)
        .filter_map(|c| {
            let (start, end) = anchor(c, content, char_len)?;
            Some(AnnotationSpan {
                start,
                end,
                text: slice_chars(content, start, end),
                color: c.color().to_string(),
                comment_id: c.id.clone(),
            })
        })
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}

fn anchor(comment: &Comment, content: &str, char_len: usize) -> Option<(usize, usize)> {
    if let Some(range) = comment.stored_range(char_len) {
        return Some(range);
    }

    let Some(needle) = comment.selected_text.as_deref().filter(|t| !t.is_empty()) else {
        debug!("Comment {} has no usable anchor", comment.id);
        return None;
    };
    match content.find(needle) {
        Some(byte_idx) => {
            let start = content[..byte_idx].chars().count();
            Some((start, start + needle.chars().count()))
        }
        None => {
            debug!("Comment {} lost its anchor", comment.id);
            None
        }
    }
}

fn slice_chars(content: &str, start: usize, end: usize) -> String {
    content.chars().skip(start).take(end - start).collect()
}

/// What the renderer reports about a highlighted run the user clicked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedHighlight {
    /// Identity attribute written by the renderer, when present.
    pub comment_id: Option<String>,
    /// Color as the renderer reports it (any CSS hex or rgb() form).
    pub color: Option<String>,
    pub text: String,
}

/// Map a clicked highlight back to its comment.
///
/// Lookup goes by the `comment_id` attribute when the renderer carries one,
/// then by color, then by text containment against each span.
pub fn find_comment_for_highlight<'a>(
    comments: &'a [Comment],
    content: &str,
    highlight: &RenderedHighlight,
) -> Option<&'a Comment> {
    if let Some(id) = &highlight.comment_id {
        return comments.iter().find(|c| &c.id == id);
    }

    let spans = to_spans(comments, content);
    let by_id = |span: &AnnotationSpan| comments.iter().find(|c| c.id == span.comment_id);

    if let Some(wanted) = highlight.color.as_deref().and_then(parse_rgb) {
        if let Some(span) = spans.iter().find(|s| parse_rgb(&s.color) == Some(wanted)) {
            return by_id(span);
        }
    }

    let rendered = highlight.text.trim();
    if rendered.is_empty() {
        return None;
    }
    spans
        .iter()
        .find(|s| s.text.contains(rendered) || rendered.contains(s.text.as_str()))
        .and_then(by_id)
}

/// Normalise a CSS color to an RGB triple; alpha is ignored.
fn parse_rgb(color: &str) -> Option<(u8, u8, u8)> {
    let color = color.trim().to_ascii_lowercase();

    if let Some(hex) = color.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        return match digits.len() {
            3 | 4 => Some((digits[0] * 17, digits[1] * 17, digits[2] * 17)),
            6 | 8 => Some((
                digits[0] * 16 + digits[1],
                digits[2] * 16 + digits[3],
                digits[4] * 16 + digits[5],
            )),
            _ => None,
        };
    }

    let args = color
        .strip_prefix("rgba(")
        .or_else(|| color.strip_prefix("rgb("))?
        .strip_suffix(')')?;
    let mut channels = args
        .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0).round() as u8));
    Some((channels.next()??, channels.next()??, channels.next()??))
}

/// The comments attached to one review, with their edit lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentList {
    comments: Vec<Comment>,
}

impl CommentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_comments(comments: Vec<Comment>) -> Self {
        Self { comments }
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    pub fn add_general(&mut self, comment: impl Into<String>) -> &Comment {
        self.push(Comment::general(comment))
    }

    pub fn add_selection(
        &mut self,
        comment: impl Into<String>,
        selected_text: impl Into<String>,
        start: usize,
        end: usize,
        highlight_color: Option<String>,
    ) -> &Comment {
        self.push(Comment::selection(
            comment,
            selected_text,
            start,
            end,
            highlight_color,
        ))
    }

    fn push(&mut self, comment: Comment) -> &Comment {
        let idx = self.comments.len();
        self.comments.push(comment);
        &self.comments[idx]
    }

    /// Update text and color in place. Offsets are left as created.
    pub fn edit(
        &mut self,
        id: &str,
        comment: impl Into<String>,
        highlight_color: Option<String>,
    ) -> bool {
        let Some(existing) = self.comments.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        existing.comment = comment.into();
        existing.highlight_color = highlight_color;
        existing.timestamp = Utc::now();
        true
    }

    pub fn delete(&mut self, index: usize) -> Option<Comment> {
        (index < self.comments.len()).then(|| self.comments.remove(index))
    }

    pub fn spans(&self, content: &str) -> Vec<AnnotationSpan> {
        to_spans(&self.comments, content)
    }

    pub fn comment_for_highlight(
        &self,
        content: &str,
        highlight: &RenderedHighlight,
    ) -> Option<&Comment> {
        find_comment_for_highlight(&self.comments, content, highlight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degraded(selected: &str) -> Comment {
        Comment {
            id: format!("c-{}", selected),
            kind: CommentKind::Selection,
            comment: "note".into(),
            timestamp: Utc::now(),
            selected_text: Some(selected.into()),
            start_offset: None,
            end_offset: None,
            highlight_color: None,
        }
    }

    #[test]
    fn test_recovers_missing_offsets() {
        let spans = to_spans(&[degraded("foo")], "bar foo baz");
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (4, 7));
        assert_eq!(spans[0].text, "foo");
        assert_eq!(spans[0].color, DEFAULT_HIGHLIGHT_COLOR);
    }

    #[test]
    fn test_lost_anchor_is_excluded() {
        let spans = to_spans(&[degraded("zzz")], "bar foo baz");
        assert!(spans.is_empty());
    }

    #[test]
    fn test_valid_offsets_used_directly() {
        let comment = Comment::selection("c", "stale text", 0, 3, Some("#ff0000".into()));
        let spans = to_spans(&[comment], "bar foo baz");
        assert_eq!((spans[0].start, spans[0].end), (0, 3));
        assert_eq!(spans[0].text, "bar");
    }

    #[test]
    fn test_invalid_offsets_fall_back_to_search() {
        let mut inverted = degraded("baz");
        inverted.start_offset = Some(9);
        inverted.end_offset = Some(2);
        let mut negative = degraded("bar");
        negative.start_offset = Some(-1);
        negative.end_offset = Some(3);
        let mut past_end = degraded("foo");
        past_end.start_offset = Some(4);
        past_end.end_offset = Some(40);

        let spans = to_spans(&[inverted, negative, past_end], "bar foo baz");
        let ranges: Vec<_> = spans.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 3), (4, 7), (8, 11)]);
    }

    #[test]
    fn test_offsets_count_characters() {
        let content = "héllo wörld";
        let spans = to_spans(&[degraded("wörld")], content);
        assert_eq!((spans[0].start, spans[0].end), (6, 11));

        let comment = Comment::selection("c", "wörld", 6, 11, None);
        let spans = to_spans(&[comment], content);
        assert_eq!(spans[0].text, "wörld");
    }

    #[test]
    fn test_general_and_empty_never_anchor() {
        let general = Comment::general("overall looks good");
        let empty = degraded("");
        assert!(to_spans(&[general, empty], "anything").is_empty());
    }

    #[test]
    fn test_lookup_prefers_identity() {
        let a = Comment::selection("a", "bar", 0, 3, Some("#ff0000".into()));
        let b = Comment::selection("b", "foo", 4, 7, Some("#ff0000".into()));
        let comments = vec![a, b.clone()];

        let highlight = RenderedHighlight {
            comment_id: Some(b.id.clone()),
            color: Some("#ff0000".into()),
            text: "bar".into(),
        };
        let found = find_comment_for_highlight(&comments, "bar foo baz", &highlight).unwrap();
        assert_eq!(found.id, b.id);
    }

    #[test]
    fn test_lookup_by_normalised_color() {
        let a = Comment::selection("a", "bar", 0, 3, Some("#FFEB3B".into()));
        let b = Comment::selection("b", "foo", 4, 7, Some("#4caf50".into()));
        let comments = vec![a, b.clone()];

        let highlight = RenderedHighlight {
            comment_id: None,
            color: Some("rgba(76, 175, 80, 0.4)".into()),
            text: "unrelated".into(),
        };
        let found = find_comment_for_highlight(&comments, "bar foo baz", &highlight).unwrap();
        assert_eq!(found.id, b.id);
    }

    #[test]
    fn test_lookup_falls_back_to_text() {
        let a = Comment::selection("a", "bar", 0, 3, None);
        let b = Comment::selection("b", "foo", 4, 7, None);
        let comments = vec![a, b.clone()];

        let highlight = RenderedHighlight {
            comment_id: None,
            color: Some("transparent".into()),
            text: " foo ".into(),
        };
        let found = find_comment_for_highlight(&comments, "bar foo baz", &highlight).unwrap();
        assert_eq!(found.id, b.id);
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_rgb("#fff"), Some((255, 255, 255)));
        assert_eq!(parse_rgb("#ffeb3b80"), Some((255, 235, 59)));
        assert_eq!(parse_rgb("rgb(255 235 59 / 50%)"), Some((255, 235, 59)));
        assert_eq!(parse_rgb("RGB(1,2,3)"), Some((1, 2, 3)));
        assert_eq!(parse_rgb("yellow"), None);
        assert_eq!(parse_rgb("#ggg"), None);
    }

    #[test]
    fn test_comment_list_lifecycle() {
        let mut list = CommentList::new();
        list.add_general("first pass");
        let id = list
            .add_selection("typo", "foo", 4, 7, None)
            .id
            .clone();
        assert_eq!(list.len(), 2);

        let before = list.get(&id).unwrap().timestamp;
        assert!(list.edit(&id, "not a typo", Some("#00ff00".into())));
        let edited = list.get(&id).unwrap();
        assert_eq!(edited.comment, "not a typo");
        assert_eq!(edited.highlight_color.as_deref(), Some("#00ff00"));
        assert_eq!((edited.start_offset, edited.end_offset), (Some(4), Some(7)));
        assert!(edited.timestamp >= before);
        assert!(!list.edit("missing", "x", None));

        assert_eq!(list.spans("bar foo baz").len(), 1);

        let removed = list.delete(0).unwrap();
        assert_eq!(removed.kind, CommentKind::General);
        assert!(list.delete(5).is_none());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_comment_json_shape() {
        let json = r##"[{"id":"1","type":"selection","comment":"x","timestamp":"2025-03-01T10:00:00Z","selectedText":"foo","startOffset":4,"endOffset":7,"highlightColor":"#ffeb3b"}]"##;
        let list: CommentList = serde_json::from_str(json).unwrap();
        assert_eq!(list.comments()[0].kind, CommentKind::Selection);
        assert_eq!(list.comments()[0].start_offset, Some(4));

        let general = Comment::general("hi");
        let value = serde_json::to_value(&general).unwrap();
        assert_eq!(value["type"], "general");
        assert!(value.get("selectedText").is_none());
    }
}
