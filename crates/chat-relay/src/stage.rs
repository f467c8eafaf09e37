//! Re-encodes the chunk sequence into staged downstream events.

use std::fmt;

use tracing::warn;

use crate::errors::RelayError;
use crate::event::RelayEvent;
use crate::model::{Chunk, ChunkChoice};

/// Phase of the downstream protocol. Only ever moves forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    #[default]
    Head = 0,
    Reasoning = 1,
    Content = 2,
    Done = 3,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Head => "head",
            Self::Reasoning => "reasoning",
            Self::Content => "content",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-request state machine `Head -> Reasoning -> Content -> Done`.
///
/// Guarantees `head` comes first, `cotEnd` at most once, and
/// `finish`/`usage` last.
#[derive(Debug, Default)]
pub struct StageEncoder {
    stage: Stage,
}

impl StageEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Translates one chunk into zero or more events.
    pub fn encode(&mut self, chunk: &Chunk) -> Result<Vec<RelayEvent>, RelayError> {
        let choice = chunk.single_choice().map_err(RelayError::Protocol)?;
        let mut events = Vec::new();

        if self.stage == Stage::Head {
            events.push(RelayEvent::Head(chunk.base.clone()));
            events.push(RelayEvent::Role(choice.delta.role.clone()));
            self.stage = Stage::Reasoning;
            if !carries_payload(chunk, choice) {
                return Ok(events);
            }
        }

        if self.stage == Stage::Reasoning {
            let delta = &choice.delta;
            if !delta.content.is_empty() {
                events.push(RelayEvent::CotEnd);
                events.push(RelayEvent::Content(delta.content.clone()));
                self.stage = Stage::Content;
                if chunk.usage.is_none() {
                    return Ok(events);
                }
                self.finish(chunk, choice, &mut events)?;
                return Ok(events);
            }
            if chunk.usage.is_none() {
                events.push(RelayEvent::Reasoning(delta.reasoning_content.clone()));
                return Ok(events);
            }
            // Usage before any content: close the reasoning phase first.
            if !delta.reasoning_content.is_empty() {
                events.push(RelayEvent::Reasoning(delta.reasoning_content.clone()));
            }
            events.push(RelayEvent::CotEnd);
            self.stage = Stage::Content;
            self.finish(chunk, choice, &mut events)?;
            return Ok(events);
        }

        if self.stage == Stage::Content {
            let content = &choice.delta.content;
            if chunk.usage.is_none() {
                events.push(RelayEvent::Content(content.clone()));
                return Ok(events);
            }
            if !content.is_empty() {
                events.push(RelayEvent::Content(content.clone()));
            }
            self.finish(chunk, choice, &mut events)?;
            return Ok(events);
        }

        warn!(id = %chunk.base.id, "chunk received after stream finished, ignored");
        Ok(events)
    }

    fn finish(
        &mut self,
        chunk: &Chunk,
        choice: &ChunkChoice,
        events: &mut Vec<RelayEvent>,
    ) -> Result<(), RelayError> {
        let Some(usage) = &chunk.usage else {
            return Ok(());
        };
        let reason = choice.finish_reason.clone().ok_or_else(|| {
            RelayError::protocol_msg(format!(
                "chunk {} carries usage without finish_reason",
                chunk.base.id
            ))
        })?;
        events.push(RelayEvent::Finish(reason));
        events.push(RelayEvent::Usage(usage.clone()));
        self.stage = Stage::Done;
        Ok(())
    }
}

fn carries_payload(chunk: &Chunk, choice: &ChunkChoice) -> bool {
    !choice.delta.reasoning_content.is_empty()
        || !choice.delta.content.is_empty()
        || chunk.usage.is_some()
}
