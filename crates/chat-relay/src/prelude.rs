//! Common imports for typical relay usage.
pub use crate::{
    ChatUpstream, DepartureHandle, ExchangeStore, InMemoryExchangeStore, OpenAiClientConfig,
    OpenAiUpstream, Relay, RelayConfig, RelayError, RelayEvent, RelayInput, RelayStream,
    RelaySummary, RequestScope, SessionId,
};
