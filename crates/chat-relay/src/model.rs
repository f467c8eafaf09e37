//! Chat-completion wire types shared by the upstream decoder, the aggregator
//! and the persistence layer.

use serde::{Deserialize, Serialize};

/// Model names understood by the default upstream.
pub const CHAT_MODEL_DEEPSEEK_V3: &str = "deepseek-chat";
pub const CHAT_MODEL_DEEPSEEK_R1: &str = "deepseek-reasoner";

pub const FINISH_REASON_STOP: &str = "stop";
pub const FINISH_REASON_LENGTH: &str = "length";
pub const FINISH_REASON_CONTENT_FILTER: &str = "content_filter";
pub const FINISH_REASON_TOOL_CALLS: &str = "tool_calls";
pub const FINISH_REASON_INSUFFICIENT_SYSTEM_RESOURCE: &str = "insufficient_system_resource";

pub const ROLE_USER: &str = "user";

/// One chat message. In a streamed chunk the same shape carries a delta.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub reasoning_content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            content: content.into(),
            reasoning_content: String::new(),
        }
    }

    /// Copy suitable for replaying as conversation history.
    ///
    /// Reasoning content is never sent back upstream.
    pub fn history_record(&self) -> Self {
        Self {
            role: self.role.clone(),
            content: self.content.clone(),
            reasoning_content: String::new(),
        }
    }
}

/// Response metadata repeated on every chunk of one stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionBase {
    #[serde(default)]
    pub id: String,
    /// Epoch seconds.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub system_fingerprint: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Token accounting reported on the terminal chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: PromptTokensDetails,
    #[serde(default)]
    pub completion_tokens_details: CompletionTokensDetails,
    #[serde(default)]
    pub prompt_cache_hit_tokens: u64,
    #[serde(default)]
    pub prompt_cache_miss_tokens: u64,
}

/// Candidate answer of a streamed chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One incremental unit of a streamed response.
///
/// `choices` has no default: a payload without it is not a chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(flatten)]
    pub base: ChatCompletionBase,
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl Chunk {
    /// Returns the only candidate or a protocol description of the mismatch.
    pub fn single_choice(&self) -> Result<&ChunkChoice, String> {
        match self.choices.as_slice() {
            [choice] => Ok(choice),
            other => Err(format!(
                "chunk {} carries {} choices, expected exactly 1",
                self.base.id,
                other.len()
            )),
        }
    }
}

/// Candidate answer of a complete (non-streamed) response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finish_reason: String,
}

/// Complete response, either received whole or rebuilt from chunks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(flatten)]
    pub base: ChatCompletionBase,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatCompletion {
    /// The single answer, if the response has exactly one.
    pub fn answer(&self) -> Option<&Choice> {
        match self.choices.as_slice() {
            [choice] => Some(choice),
            _ => None,
        }
    }
}

/// Upstream request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub stream: bool,
}

impl ChatRequest {
    pub fn streaming(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: model.into(),
            stream: true,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_decodes_null_fields_as_empty() {
        let chunk: Chunk = serde_json::from_str(
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","system_fingerprint":null,
                "choices":[{"index":0,"delta":{"role":"assistant","content":null,"reasoning_content":""},"finish_reason":null}],
                "usage":null}"#,
        )
        .expect("chunk");
        assert_eq!(chunk.base.id, "c1");
        assert_eq!(chunk.base.system_fingerprint, "");
        let choice = chunk.single_choice().expect("one choice");
        assert_eq!(choice.delta.role, "assistant");
        assert_eq!(choice.delta.content, "");
        assert!(choice.finish_reason.is_none());
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn error_envelope_is_not_a_chunk() {
        let result = serde_json::from_str::<Chunk>(
            r#"{"error":{"message":"boom","type":"x","param":null,"code":"x"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn single_choice_rejects_zero_and_many() {
        let mut chunk = Chunk::default();
        assert!(chunk.single_choice().is_err());
        chunk.choices = vec![ChunkChoice::default(), ChunkChoice::default()];
        let err = chunk.single_choice().expect_err("two choices");
        assert!(err.contains("2 choices"));
    }

    #[test]
    fn history_record_drops_reasoning() {
        let message = Message {
            role: "assistant".into(),
            content: "answer".into(),
            reasoning_content: "thinking".into(),
        };
        let record = message.history_record();
        assert_eq!(record.reasoning_content, "");
        assert_eq!(record.content, "answer");
        let json = serde_json::to_value(&record).expect("json");
        assert!(json.get("reasoning_content").is_none());
    }

    #[test]
    fn streaming_request_sets_stream_flag() {
        let req = ChatRequest::streaming(CHAT_MODEL_DEEPSEEK_R1, vec![Message::user("hi")]);
        let body = serde_json::to_value(&req).expect("json");
        assert_eq!(body.get("stream").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(
            body.get("model").and_then(|v| v.as_str()),
            Some("deepseek-reasoner")
        );
    }
}
