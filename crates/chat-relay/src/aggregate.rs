//! Folds streamed chunks into one complete response.

use crate::errors::RelayError;
use crate::model::{ChatCompletion, Choice, Chunk};

/// Accumulator shaped like a non-streamed completion.
///
/// Starts with one empty candidate slot. Owned by a single task for the
/// lifetime of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregator {
    completion: ChatCompletion,
    usage_seen: bool,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            completion: ChatCompletion {
                choices: vec![Choice::default()],
                ..ChatCompletion::default()
            },
            usage_seen: false,
        }
    }

    /// Folds one chunk. A chunk that does not carry exactly one candidate is
    /// rejected before anything is mutated.
    pub fn fold(&mut self, chunk: &Chunk) -> Result<(), RelayError> {
        let delta_choice = chunk.single_choice().map_err(RelayError::Protocol)?;
        let slots = self.completion.choices.len();
        let [answer] = self.completion.choices.as_mut_slice() else {
            return Err(RelayError::protocol_msg(format!(
                "aggregate holds {slots} choices, expected exactly 1"
            )));
        };

        // Base metadata is identical across the stream; copy it once.
        if self.completion.base.id.is_empty() {
            self.completion.base = chunk.base.clone();
        }
        if let Some(usage) = &chunk.usage {
            self.completion.usage = usage.clone();
            self.usage_seen = true;
        }
        if let Some(reason) = &delta_choice.finish_reason {
            answer.finish_reason = reason.clone();
        }

        let delta = &delta_choice.delta;
        answer.message.role.push_str(&delta.role);
        answer.message.content.push_str(&delta.content);
        answer
            .message
            .reasoning_content
            .push_str(&delta.reasoning_content);
        Ok(())
    }

    /// True once a role has been observed.
    pub fn valid(&self) -> bool {
        self.completion
            .answer()
            .is_some_and(|choice| !choice.message.role.is_empty())
    }

    /// True once a chunk carrying usage has been folded in.
    pub fn is_final(&self) -> bool {
        self.usage_seen
    }

    pub fn into_completion(self) -> ChatCompletion {
        self.completion
    }
}
