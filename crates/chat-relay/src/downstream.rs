//! Downstream wire format, both directions.
//!
//! `render` writes a `RelayEvent` as server-sent-event text; the
//! `DownstreamDecoder` is the consumer-side mirror that turns that text back
//! into events.

use crate::errors::RelayError;
use crate::event::{
    RelayEvent, TAG_COT_END, TAG_ERROR, TAG_FINISH, TAG_HEAD, TAG_ROLE, TAG_USAGE, join_lines,
};
use crate::frame::FrameDecoder;

/// Encodes one event: optional `event:` line, one `data:` line per payload
/// line, then a blank line.
pub fn render(event: &RelayEvent) -> String {
    let mut out = String::new();
    if let Some(tag) = event.tag() {
        out.push_str("event: ");
        out.push_str(tag);
        out.push('\n');
    }
    for line in event.lines() {
        out.push_str("data: ");
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Consumer-side decoder.
///
/// Untyped events are reasoning until `cotEnd` has been seen and content
/// afterwards.
#[derive(Debug, Default)]
pub struct DownstreamDecoder {
    frames: FrameDecoder,
    cot_ended: bool,
}

impl DownstreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds received bytes and returns every completed event.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<RelayEvent>, RelayError> {
        let mut events = Vec::new();
        for frame in self.frames.push_chunk(chunk) {
            if let Some(event) = self.decode_frame(&frame)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Decodes a trailing frame left without a blank-line terminator.
    pub fn finish(&mut self) -> Result<Option<RelayEvent>, RelayError> {
        match self.frames.finish() {
            Some(frame) => self.decode_frame(&frame),
            None => Ok(None),
        }
    }

    fn decode_frame(&mut self, frame: &str) -> Result<Option<RelayEvent>, RelayError> {
        let mut tag: Option<&str> = None;
        let mut lines: Vec<&str> = Vec::new();
        for line in frame.split('\n') {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event: ") {
                tag = Some(value);
            } else if let Some(value) = line.strip_prefix("data: ") {
                lines.push(value);
            } else if line == "data:" {
                lines.push("");
            } else {
                return Err(RelayError::Format {
                    frame: line.to_string(),
                });
            }
        }
        if tag.is_none() && lines.is_empty() {
            return Ok(None);
        }
        let data = join_lines(&lines);
        self.to_event(tag, data).map(Some)
    }

    fn to_event(&mut self, tag: Option<&str>, data: String) -> Result<RelayEvent, RelayError> {
        let event = match tag {
            None | Some("") if self.cot_ended => RelayEvent::Content(data),
            None | Some("") => RelayEvent::Reasoning(data),
            Some(TAG_HEAD) => {
                RelayEvent::Head(serde_json::from_str(&data).map_err(|e| RelayError::decode(&e))?)
            }
            Some(TAG_ROLE) => RelayEvent::Role(data),
            Some(TAG_COT_END) => {
                self.cot_ended = true;
                RelayEvent::CotEnd
            }
            Some(TAG_FINISH) => RelayEvent::Finish(data),
            Some(TAG_USAGE) => {
                RelayEvent::Usage(serde_json::from_str(&data).map_err(|e| RelayError::decode(&e))?)
            }
            Some(TAG_ERROR) => RelayEvent::Error(data),
            Some(other) => {
                return Err(RelayError::Format {
                    frame: format!("event: {other}"),
                });
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatCompletionBase, Usage};

    fn sample() -> Vec<RelayEvent> {
        vec![
            RelayEvent::Head(ChatCompletionBase {
                id: "c1".into(),
                created: 7,
                model: "deepseek-reasoner".into(),
                system_fingerprint: "fp".into(),
            }),
            RelayEvent::Role("assistant".into()),
            RelayEvent::Reasoning("first\n\nsecond".into()),
            RelayEvent::CotEnd,
            RelayEvent::Content("\n".into()),
            RelayEvent::Content("done".into()),
            RelayEvent::Finish("stop".into()),
            RelayEvent::Usage(Usage {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4,
                ..Usage::default()
            }),
        ]
    }

    #[test]
    fn renders_typed_and_untyped_events() {
        assert_eq!(render(&RelayEvent::CotEnd), "event: cotEnd\n\n");
        assert_eq!(
            render(&RelayEvent::Reasoning("a\nb".into())),
            "data: a\ndata: b\n\n"
        );
        assert_eq!(
            render(&RelayEvent::Content("\n".into())),
            "data: \ndata: \n\n"
        );
        assert_eq!(
            render(&RelayEvent::Finish("stop".into())),
            "event: finish\ndata: stop\n\n"
        );
    }

    #[test]
    fn decoder_mirrors_renderer() {
        let events = sample();
        let wire: String = events.iter().map(render).collect();
        let mut decoder = DownstreamDecoder::new();
        // Byte-at-a-time delivery exercises frame reassembly.
        let mut decoded = Vec::new();
        for byte in wire.as_bytes() {
            decoded.extend(decoder.push_chunk(std::slice::from_ref(byte)).expect("decode"));
        }
        assert_eq!(decoder.finish().expect("finish"), None);
        assert_eq!(decoded, events);
    }

    #[test]
    fn comments_are_skipped_and_unknown_tags_rejected() {
        let mut decoder = DownstreamDecoder::new();
        let events = decoder
            .push_chunk(b": keep-alive\n\nevent: error\ndata: boom\n\n")
            .expect("decode");
        assert_eq!(events, vec![RelayEvent::Error("boom".into())]);
        let err = decoder
            .push_chunk(b"event: surprise\ndata: x\n\n")
            .expect_err("unknown tag");
        assert!(matches!(err, RelayError::Format { .. }));
    }
}
