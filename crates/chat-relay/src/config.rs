use std::time::Duration;

use crate::errors::RelayError;

pub const ENV_API_KEY: &str = "CHAT_RELAY_API_KEY";
pub const ENV_BASE_URL: &str = "CHAT_RELAY_BASE_URL";
pub const ENV_DOWNSTREAM_CAPACITY: &str = "CHAT_RELAY_DOWNSTREAM_CAPACITY";
pub const ENV_UPSTREAM_CAPACITY: &str = "CHAT_RELAY_UPSTREAM_CAPACITY";
pub const ENV_UPSTREAM_TIMEOUT_SECS: &str = "CHAT_RELAY_UPSTREAM_TIMEOUT_SECS";

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// Configuration for the OpenAI-compatible upstream client.
#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Connect timeout. Streaming reads are bounded by the upstream scope
    /// instead.
    pub connect_timeout: Duration,
}

impl OpenAiClientConfig {
    /// Creates a config for the default endpoint with a 10 s connect timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Builds a config from `CHAT_RELAY_API_KEY` and optional
    /// `CHAT_RELAY_BASE_URL`.
    pub fn from_env() -> Result<Self, RelayError> {
        let api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(RelayError::Config(format!(
                "missing {ENV_API_KEY} for upstream client"
            )));
        }
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var(ENV_BASE_URL)
            && !base_url.trim().is_empty()
        {
            config = config.base_url(base_url);
        }
        Ok(config)
    }

    /// Overrides the API base URL, e.g. for a proxy or a local mock server.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the TCP/TLS connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Relay behavior options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Bounded buffer between the relay task and the downstream consumer.
    pub downstream_capacity: usize,
    /// Bounded buffer between the upstream reader and the relay task.
    pub upstream_capacity: usize,
    /// Upper bound on one upstream stream, on top of any request deadline.
    pub upstream_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            downstream_capacity: 64,
            upstream_capacity: 64,
            upstream_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `CHAT_RELAY_*` variables. A timeout of `0`
    /// disables the relay-imposed upstream timeout.
    pub fn from_env() -> Result<Self, RelayError> {
        let mut config = Self::default();
        if let Some(value) = parse_env::<usize>(ENV_DOWNSTREAM_CAPACITY)? {
            config.downstream_capacity = value;
        }
        if let Some(value) = parse_env::<usize>(ENV_UPSTREAM_CAPACITY)? {
            config.upstream_capacity = value;
        }
        if let Some(secs) = parse_env::<u64>(ENV_UPSTREAM_TIMEOUT_SECS)? {
            config.upstream_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero-capacity buffers.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.downstream_capacity == 0 {
            return Err(RelayError::Validation(
                "downstream_capacity must be greater than 0".into(),
            ));
        }
        if self.upstream_capacity == 0 {
            return Err(RelayError::Validation(
                "upstream_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, RelayError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RelayError::Config(format!("invalid value for {key}: {raw:?}"))),
        _ => Ok(None),
    }
}
