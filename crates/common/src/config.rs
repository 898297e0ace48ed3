use std::str::FromStr;

use tracing::warn;

const DEFAULT_WS_URL: &str = "wss://api.kiwoom.com:10000/api/dostk/websocket";

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Brokerage channel
    pub kiwoom_ws_url: String,
    pub kiwoom_token: String,
    pub auth_timeout_secs: u64,

    // Search
    pub strategy_config_path: String,
    pub cache_ttl_secs: u64,
    pub query_timeout_secs: u64,
    pub search_interval_secs: u64,

    // Performance tracking
    pub performance_window_days: i64,
    pub rebalance_interval_secs: u64,
    pub performance_history_path: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            kiwoom_ws_url: optional_env("KIWOOM_WS_URL")
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            kiwoom_token: required_env("KIWOOM_TOKEN"),
            auth_timeout_secs: parsed_env("AUTH_TIMEOUT_SECS", 10),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            cache_ttl_secs: parsed_env("SEARCH_CACHE_TTL_SECS", 60),
            query_timeout_secs: parsed_env("SEARCH_QUERY_TIMEOUT_SECS", 10),
            search_interval_secs: parsed_env("SEARCH_INTERVAL_SECS", 60),
            performance_window_days: parsed_env("PERFORMANCE_WINDOW_DAYS", 30),
            rebalance_interval_secs: parsed_env("REBALANCE_INTERVAL_SECS", 3600),
            performance_history_path: optional_env("PERFORMANCE_HISTORY_PATH")
                .filter(|p| !p.trim().is_empty()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: FromStr + Copy + std::fmt::Debug>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = ?default, "Unparsable value, using default");
            default
        }),
        None => default,
    }
}
