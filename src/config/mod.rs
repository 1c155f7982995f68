//! Configuration for the lab-slot watcher.
//!
//! Loaded via figment from defaults + TOML + environment. Duration fields accept both
//! numeric values (interpreted as seconds) and duration strings with units, via the same
//! flexible deserializer the rest of this codebase uses.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Log level for the application's own target, e.g. "debug" -> "warn,labwatch=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Graceful shutdown timeout.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    pub redis_url: String,

    pub http: HttpConfig,
    pub sources: SourcesConfig,
    pub parser: ParserConfig,
    #[serde(default)]
    pub deduplicator: DeduplicatorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_max_connections() -> u32 {
    4
}

/// Adaptive HTTP fetcher tuning: `{timeout, minRate, maxRate, burst, increase, decrease}`.
#[derive(Deserialize, Clone, Debug)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_increase")]
    pub increase: f64,
    #[serde(default = "default_decrease")]
    pub decrease: f64,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_min_rate() -> f64 {
    1.0
}
fn default_max_rate() -> f64 {
    10.0
}
fn default_burst() -> u32 {
    1
}
fn default_increase() -> f64 {
    2.0
}
fn default_decrease() -> f64 {
    0.5
}

/// Upstream endpoints.
#[derive(Deserialize, Clone, Debug)]
pub struct SourcesConfig {
    pub sources_ids_provider: String,
    pub slots_source: String,
    /// Bound on in-flight SourceID fetches per poll cycle.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    50
}

/// Regex-driven slot parsing configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct ParserConfig {
    pub number_pattern: String,
    pub auditorium_pattern: String,
    pub spot_pattern: String,
    pub topic_pattern: String,
    #[serde(default)]
    pub name_prefix: String,
    pub timezone: String,
    pub topic_map: HashMap<String, String>,
    pub type_map: HashMap<String, String>,
    pub default_type: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DeduplicatorConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_dedup_ttl", deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
}

impl Default for DeduplicatorConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            ttl: default_dedup_ttl(),
        }
    }
}

fn default_key_prefix() -> String {
    "labwatch".to_string()
}
fn default_dedup_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Randomized interval bounds for the scheduler's two jobs.
#[derive(Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    #[serde(
        default = "default_refresh_sources_min",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_sources_min: Duration,
    #[serde(
        default = "default_refresh_sources_max",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_sources_max: Duration,
    #[serde(
        default = "default_poll_slots_min",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_slots_min: Duration,
    #[serde(
        default = "default_poll_slots_max",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_slots_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_sources_min: default_refresh_sources_min(),
            refresh_sources_max: default_refresh_sources_max(),
            poll_slots_min: default_poll_slots_min(),
            poll_slots_max: default_poll_slots_max(),
        }
    }
}

fn default_refresh_sources_min() -> Duration {
    Duration::from_secs(12 * 3600)
}
fn default_refresh_sources_max() -> Duration {
    Duration::from_secs(24 * 3600)
}
fn default_poll_slots_min() -> Duration {
    Duration::from_secs(30)
}
fn default_poll_slots_max() -> Duration {
    Duration::from_secs(60)
}

/// Duration parser configured to handle various time units with seconds as default.
///
/// Supports seconds (default), milliseconds and minutes; does not support fractions,
/// exponents or infinity. Whitespace between the number and unit is allowed.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute, TimeUnit::Hour])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Accepts numbers (seconds) and duration strings (`"30s"`, `"2m"`, `"12h"`, `"1500ms"`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "invalid duration '{value}': {e}. examples: '5', '30s', '2m', '12h'"
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "deserialize_duration")]
        d: Duration,
    }

    #[test]
    fn duration_accepts_bare_seconds() {
        let w: Wrapper = serde_json::from_str(r#"{"d": 30}"#).unwrap();
        assert_eq!(w.d, Duration::from_secs(30));
    }

    #[test]
    fn duration_accepts_unit_suffix() {
        let w: Wrapper = serde_json::from_str(r#"{"d": "2m"}"#).unwrap();
        assert_eq!(w.d, Duration::from_secs(120));
    }

    #[test]
    fn duration_accepts_hours() {
        let w: Wrapper = serde_json::from_str(r#"{"d": "12h"}"#).unwrap();
        assert_eq!(w.d, Duration::from_secs(12 * 3600));
    }

    #[test]
    fn duration_rejects_negative() {
        let result: Result<Wrapper, _> = serde_json::from_str(r#"{"d": -1}"#);
        assert!(result.is_err());
    }
}
