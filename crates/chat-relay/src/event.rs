//! Downstream protocol events.
//!
//! Events are a closed set of variants; wire tags and text lines only exist
//! at the serialization boundary (`tag`/`lines`).

use tracing::error;

use crate::model::{ChatCompletionBase, Usage};

pub const TAG_HEAD: &str = "head";
pub const TAG_ROLE: &str = "role";
pub const TAG_COT_END: &str = "cotEnd";
pub const TAG_FINISH: &str = "finish";
pub const TAG_USAGE: &str = "usage";
pub const TAG_ERROR: &str = "error";

/// One unit of the downstream protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// Response metadata, sent first.
    Head(ChatCompletionBase),
    Role(String),
    /// Untyped delta before `CotEnd`.
    Reasoning(String),
    /// Phase boundary between reasoning and content.
    CotEnd,
    /// Untyped delta after `CotEnd`.
    Content(String),
    Finish(String),
    Usage(Usage),
    /// Human-readable failure, possibly multi-line.
    Error(String),
}

impl RelayEvent {
    /// Wire tag; `None` for untyped deltas.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Self::Head(_) => Some(TAG_HEAD),
            Self::Role(_) => Some(TAG_ROLE),
            Self::Reasoning(_) | Self::Content(_) => None,
            Self::CotEnd => Some(TAG_COT_END),
            Self::Finish(_) => Some(TAG_FINISH),
            Self::Usage(_) => Some(TAG_USAGE),
            Self::Error(_) => Some(TAG_ERROR),
        }
    }

    /// Wire payload lines. No line contains a line break.
    ///
    /// A JSON payload that fails to serialize degrades into an error event.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Head(base) => json_line(base),
            Self::Usage(usage) => json_line(usage),
            Self::Role(text) | Self::Finish(text) => vec![text.clone()],
            Self::Reasoning(text) | Self::Content(text) | Self::Error(text) => split_lines(text),
            Self::CotEnd => Vec::new(),
        }
    }
}

/// Splits a delta on `\n`. A single line break becomes two lines so that
/// `join_lines(split_lines(s)) == s` for every `s`.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_owned).collect()
}

pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n")
}

fn json_line<T: serde::Serialize + std::fmt::Debug>(item: &T) -> Vec<String> {
    // serde_json escapes line breaks, one line is always enough.
    match serde_json::to_string(item) {
        Ok(line) => vec![line],
        Err(err) => {
            error!(error = %err, item = ?item, "failed to encode relay event payload");
            split_lines(&format!("encode {item:?} to JSON: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_then_join_is_identity() {
        for text in ["", "a", "\n", "a\nb", "a\n\nb\n", "\n\n", "tail\r\n"] {
            assert_eq!(join_lines(&split_lines(text)), text, "input {text:?}");
        }
    }

    #[test]
    fn single_line_break_becomes_two_empty_lines() {
        assert_eq!(split_lines("\n"), vec!["", ""]);
    }

    #[test]
    fn json_payloads_are_single_line() {
        let base = ChatCompletionBase {
            id: "line1\nline2".into(),
            created: 19,
            model: "m".into(),
            system_fingerprint: String::new(),
        };
        let lines = RelayEvent::Head(base).lines();
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains('\n'));
        assert!(lines[0].contains(r#""id":"line1\nline2""#));
    }

    #[test]
    fn tags_match_wire_protocol() {
        assert_eq!(RelayEvent::CotEnd.tag(), Some("cotEnd"));
        assert_eq!(RelayEvent::CotEnd.lines(), Vec::<String>::new());
        assert_eq!(RelayEvent::Reasoning("x".into()).tag(), None);
        assert_eq!(RelayEvent::Content("x".into()).tag(), None);
        assert_eq!(RelayEvent::Finish("stop".into()).lines(), vec!["stop"]);
        assert_eq!(RelayEvent::Error("a\nb".into()).lines(), vec!["a", "b"]);
    }
}
