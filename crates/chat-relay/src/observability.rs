use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const ENV_OBSERVABILITY: &str = "CHAT_RELAY_OBSERVABILITY";
pub const ENV_LOG_LEVEL: &str = "CHAT_RELAY_LOG_LEVEL";
pub const ENV_JSON_LOG_PATH: &str = "CHAT_RELAY_JSON_LOG_PATH";

const DEFAULT_LOG_FILE: &str = "chat-relay.logs.jsonl";
/// Relay events at `info`, everything else (HTTP client, runtime) at `warn`.
const DEFAULT_FILTER: &str = "warn,chat_relay=info";

static INIT: OnceCell<()> = OnceCell::new();

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    std::env::var(ENV_OBSERVABILITY)
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(true)
}

/// A bare level (`debug`) applies to this crate only; full directives
/// (`chat_relay=trace,reqwest=debug`) are used as given.
fn relay_directive(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains('=') || raw.contains(',') {
        raw.to_string()
    } else {
        format!("warn,chat_relay={raw}")
    }
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var(ENV_LOG_LEVEL)
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(relay_directive(&level))
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize relay logging once per process.
///
/// Environment variables:
/// - `CHAT_RELAY_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `CHAT_RELAY_LOG_LEVEL`: optional override. A bare level applies to `chat_relay` only,
///   a directive list (`chat_relay=debug,reqwest=info`) replaces the whole filter.
/// - `CHAT_RELAY_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file,
///   otherwise they go to stdout in a compact console format.
/// - `RUST_LOG`: fallback filter. Without either, `warn,chat_relay=info` is used.
///
/// Does nothing if another global subscriber is already installed.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var(ENV_JSON_LOG_PATH) {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
