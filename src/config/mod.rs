//! Runtime configuration: the keys consumed by the core (spec.md §6
//! "Environment / config") plus the YAML loader that resolves them.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_unary_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_streaming_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_pool_health_check_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_session_expiration_minutes() -> i64 {
    30
}

fn default_min_parallel_nodes() -> usize {
    2
}

fn default_max_connections_per_host() -> usize {
    10
}

fn default_max_idle_per_host() -> usize {
    5
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Deployment-wide configuration, loaded once at startup from a YAML file
/// (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Endpoint of the LLM client used by domain agents; the core only
    /// forwards this to agents, never calls it directly.
    #[serde(default)]
    pub llm_endpoint: Option<String>,

    #[serde(default = "default_unary_timeout", with = "humantime_serde_duration")]
    pub unary_timeout: Duration,

    #[serde(default = "default_streaming_timeout", with = "humantime_serde_duration")]
    pub streaming_timeout: Duration,

    #[serde(default = "default_pool_health_check_interval", with = "humantime_serde_duration")]
    pub pool_health_check_interval: Duration,

    /// Max concurrent connections per host (spec.md §4.1, default 10).
    #[serde(default = "default_max_connections_per_host")]
    pub pool_max_connections_per_host: usize,

    /// Max idle keep-alive connections per host (spec.md §4.1, default 5).
    #[serde(default = "default_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle keep-alive timeout (spec.md §4.1, default 30s).
    #[serde(default = "default_pool_idle_timeout", with = "humantime_serde_duration")]
    pub pool_idle_timeout: Duration,

    #[serde(default = "default_session_expiration_minutes")]
    pub session_expiration_minutes: i64,

    #[serde(default = "default_min_parallel_nodes")]
    pub min_parallel_nodes: usize,

    /// Directory of `*.card.json` Agent Card files.
    pub agent_cards_dir: String,

    /// Path to the quality-profile YAML file.
    pub quality_profile_path: String,

    /// Host/port the orchestrator's own HTTP server binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

/// Minimal `Duration <-> String` serde shim so config files can write
/// `30s`/`5m` rather than a raw seconds integer, without pulling in a
/// dedicated humantime dependency purely for this.
mod humantime_serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        format!("{}s", value.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    fn parse(raw: &str) -> Result<Duration, String> {
        let raw = raw.trim();
        if let Some(digits) = raw.strip_suffix("ms") {
            return digits.parse().map(Duration::from_millis).map_err(|e| e.to_string());
        }
        if let Some(digits) = raw.strip_suffix('s') {
            return digits.parse().map(Duration::from_secs).map_err(|e| e.to_string());
        }
        if let Some(digits) = raw.strip_suffix('m') {
            return digits
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|e| e.to_string());
        }
        raw.parse().map(Duration::from_secs).map_err(|e| e.to_string())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_seconds_minutes_and_milliseconds() {
            assert_eq!(parse("30s").unwrap(), Duration::from_secs(30));
            assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
            assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
            assert_eq!(parse("12").unwrap(), Duration::from_secs(12));
        }
    }
}
