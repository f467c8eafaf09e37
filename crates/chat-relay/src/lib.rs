//! Streaming chat-completion relay.
//!
//! Reads an OpenAI-compatible `text/event-stream` answer, folds its deltas
//! into one completion, re-encodes the stream as staged events for a
//! downstream consumer and persists the result once per exchange, even if
//! the consumer leaves early.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_relay::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RelayError> {
//! chat_relay::observability::init_observability();
//!
//! let store = Arc::new(InMemoryExchangeStore::new());
//! let session = store.create_session("demo");
//! let relay = Relay::new(
//!     store,
//!     Arc::new(OpenAiUpstream::from_env()?),
//!     RelayConfig::from_env()?,
//! )?;
//!
//! let (scope, _departure) = RequestScope::new();
//! let mut stream = relay
//!     .start(session, RelayInput::new("Say hello", "deepseek-reasoner"), scope)
//!     .await?;
//! while let Some(frame) = stream.next_frame().await {
//!     print!("{frame}");
//! }
//! let summary = stream.finish().await?;
//! println!("persisted={}", summary.persisted);
//! # Ok(())
//! # }
//! ```

/// Delta folding into a single completion.
pub mod aggregate;
/// Relay and upstream client configuration.
pub mod config;
/// Downstream wire rendering and its consumer-side decoder.
pub mod downstream;
/// Public error types.
pub mod errors;
/// Downstream event model.
pub mod event;
/// Blank-line frame splitting over arbitrary byte chunks.
pub mod frame;
/// Wire model of the OpenAI-compatible chat API.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Token cost estimation.
pub mod pricing;
/// Upstream call contract and the HTTP client.
pub mod provider;
/// Relay entry point, controller task and stream handle.
pub mod relay;
/// Request and upstream cancellation scopes.
pub mod scope;
/// Stage machine turning chunks into downstream events.
pub mod stage;
/// Exchange persistence contract and history building.
pub mod store;
/// Upstream frame parsing and the chunk queue.
pub mod upstream;

pub use aggregate::Aggregator;
pub use config::{OpenAiClientConfig, RelayConfig};
pub use downstream::{DownstreamDecoder, render};
pub use errors::{RelayError, StoreError, UpstreamError};
pub use event::RelayEvent;
pub use frame::FrameDecoder;
pub use model::{ChatCompletion, ChatRequest, Chunk, Message, Usage};
pub use pricing::{Cost, Price};
pub use provider::{ChatUpstream, OpenAiUpstream};
pub use relay::{Relay, RelayInput, RelayStream, RelaySummary};
pub use scope::{DepartureHandle, RequestScope, UpstreamScope};
pub use stage::{Stage, StageEncoder};
pub use store::{ExchangeId, ExchangeRecord, ExchangeStore, InMemoryExchangeStore, SessionId};
pub use upstream::{ChunkParser, ChunkReceiver, UpstreamItem};
