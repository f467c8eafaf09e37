use std::fmt;

use serde::{Deserialize, Serialize};

/// Business-level failure sent in-band by the upstream as
/// `{"error": {"message", "type", "param", "code"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{inner}")]
pub struct UpstreamError {
    #[serde(rename = "error")]
    pub inner: UpstreamErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamErrorBody {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl fmt::Display for UpstreamErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "upstream {kind}: {}", self.message),
            None => write!(f, "upstream error: {}", self.message),
        }
    }
}

impl UpstreamError {
    pub fn message(&self) -> &str {
        &self.inner.message
    }
}

/// Errors returned by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Top-level error type of the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RelayError {
    /// A frame matched neither a data line nor an error envelope.
    #[error("bad format SSE frame {frame:?}")]
    Format { frame: String },
    /// A data line could not be decoded as a chunk.
    #[error("invalid chunk payload: {message}")]
    Decode { message: String },
    /// A payload arrived after the end-of-stream sentinel.
    #[error("extra frame after [DONE] {frame:?}")]
    AfterDone { frame: String },
    /// The upstream broke an assumed contract (for example several choices).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Reading the upstream byte source failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Business error returned by the upstream before streaming started.
    #[error(transparent)]
    Upstream(UpstreamError),
    /// Non-success HTTP status without an error envelope.
    #[error("upstream responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The upstream-facing deadline expired.
    #[error("upstream deadline exceeded")]
    DeadlineExceeded,
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl RelayError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn decode(err: &serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(value: UpstreamError) -> Self {
        RelayError::Upstream(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_captured_error_envelope() {
        let raw = r#"{"error":{"message":"Content Exists Risk","type":"invalid_request_error","param":null,"code":"invalid_request_error"}}"#;
        let err: UpstreamError = serde_json::from_str(raw).expect("envelope");
        assert_eq!(err.message(), "Content Exists Risk");
        assert_eq!(err.inner.kind.as_deref(), Some("invalid_request_error"));
        assert_eq!(err.inner.param, None);
        assert_eq!(err.inner.code.as_deref(), Some("invalid_request_error"));
        assert_eq!(
            err.to_string(),
            "upstream invalid_request_error: Content Exists Risk"
        );
    }

    #[test]
    fn envelope_requires_error_key() {
        assert!(serde_json::from_str::<UpstreamError>(r#"{"message":"x"}"#).is_err());
    }

    #[test]
    fn store_errors_convert_into_relay_errors() {
        let err: RelayError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, RelayError::Store(StoreError::Backend(_))));
    }
}
