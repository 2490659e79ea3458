//! Process-wide configuration, loaded once at startup from the environment
//! (with optional `.env` support) and never hot-reloaded. A restart is the
//! supported mechanism for changing any of this, including the policy.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct RelConfig {
    pub endpoint: String,
    pub key: String,
    pub insecure: bool,
    pub verify_ca: bool,
}

#[derive(Debug, Clone)]
pub struct SqlConfig {
    pub uri: String,
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct EventsConfig {
    /// Explicit topic list. When empty, the subscriber derives `*.<type>`
    /// from every resource type the active policy declares.
    pub topics: Vec<String>,
    pub zed_token_ttl: Duration,
    pub nats_url: String,
    pub stream_name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub policy_path: Option<String>,
    pub rel: RelConfig,
    pub sql: SqlConfig,
    pub events: EventsConfig,
}

/// Raw shape populated field-by-field by `envy_like_from_env`; not exposed
/// outside this module.
#[derive(Debug)]
struct RawEnv {
    namespace: String,
    policy_path: Option<String>,
    rel_endpoint: String,
    rel_key: String,
    rel_insecure: bool,
    rel_verify_ca: bool,
    sql_uri: String,
    sql_max_open: u32,
    sql_max_idle: u32,
    sql_max_lifetime_secs: u64,
    events_topics: String,
    events_zed_token_ttl_secs: u64,
    events_nats_url: String,
    events_stream_name: String,
}

fn default_true() -> bool {
    true
}
fn default_max_open() -> u32 {
    10
}
fn default_max_idle() -> u32 {
    5
}
fn default_max_lifetime_secs() -> u64 {
    30 * 60
}
fn default_zed_token_ttl_secs() -> u64 {
    3600
}
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}
fn default_stream_name() -> String {
    "authzd-events".to_string()
}

impl Config {
    /// Loads configuration from the process environment, optionally seeded
    /// from a `.env` file first (missing `.env` is not an error).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let raw: RawEnv = envy_like_from_env()?;

        if raw.sql_max_lifetime_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SQL_MAX_LIFETIME_SECS",
                value: raw.sql_max_lifetime_secs.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let ttl = Duration::from_secs(raw.events_zed_token_ttl_secs);
        if ttl < Duration::from_secs(3600) || ttl > Duration::from_secs(24 * 3600) {
            return Err(ConfigError::Invalid {
                name: "EVENTS_ZED_TOKEN_TTL_SECS",
                value: raw.events_zed_token_ttl_secs.to_string(),
                reason: "must be between 1 hour and 24 hours".to_string(),
            });
        }

        let topics = raw
            .events_topics
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Config {
            namespace: raw.namespace,
            policy_path: raw.policy_path,
            rel: RelConfig {
                endpoint: raw.rel_endpoint,
                key: raw.rel_key,
                insecure: raw.rel_insecure,
                verify_ca: raw.rel_verify_ca,
            },
            sql: SqlConfig {
                uri: raw.sql_uri,
                max_open: raw.sql_max_open,
                max_idle: raw.sql_max_idle,
                max_lifetime: Duration::from_secs(raw.sql_max_lifetime_secs),
            },
            events: EventsConfig {
                topics,
                zed_token_ttl: ttl,
                nats_url: raw.events_nats_url,
                stream_name: raw.events_stream_name,
            },
        })
    }
}

/// Minimal env-var -> struct binder. We don't pull in the `envy` crate for
/// four required fields and a handful of optional ones; this mirrors the
/// pattern of reading `std::env::var` with fallbacks used throughout the
/// fleet's `main.rs` bootstraps.
fn envy_like_from_env() -> Result<RawEnv, ConfigError> {
    fn required(name: &'static str) -> Result<String, ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::Missing(name))
    }
    fn optional(name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
    fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
        match std::env::var(name) {
            Ok(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name,
                value: v,
                reason: "could not parse".to_string(),
            }),
            Err(_) => Ok(default),
        }
    }

    Ok(RawEnv {
        namespace: required("NAMESPACE")?,
        policy_path: optional("POLICY_PATH"),
        rel_endpoint: required("REL_ENDPOINT")?,
        rel_key: required("REL_KEY")?,
        rel_insecure: parsed("REL_INSECURE", false)?,
        rel_verify_ca: parsed("REL_VERIFY_CA", true)?,
        sql_uri: required("SQL_URI")?,
        sql_max_open: parsed("SQL_MAX_OPEN", default_max_open())?,
        sql_max_idle: parsed("SQL_MAX_IDLE", default_max_idle())?,
        sql_max_lifetime_secs: parsed("SQL_MAX_LIFETIME_SECS", default_max_lifetime_secs())?,
        events_topics: optional("EVENTS_TOPICS").unwrap_or_default(),
        events_zed_token_ttl_secs: parsed(
            "EVENTS_ZED_TOKEN_TTL_SECS",
            default_zed_token_ttl_secs(),
        )?,
        events_nats_url: optional("EVENTS_NATS_URL").unwrap_or_else(default_nats_url),
        events_stream_name: optional("EVENTS_STREAM_NAME").unwrap_or_else(default_stream_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ttl_outside_bounds() {
        std::env::set_var("NAMESPACE", "test");
        std::env::set_var("REL_ENDPOINT", "http://localhost:8443");
        std::env::set_var("REL_KEY", "k");
        std::env::set_var("SQL_URI", "postgres://localhost/test");
        std::env::set_var("EVENTS_ZED_TOKEN_TTL_SECS", "10");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name, .. } if name == "EVENTS_ZED_TOKEN_TTL_SECS"));

        std::env::remove_var("EVENTS_ZED_TOKEN_TTL_SECS");
        std::env::remove_var("NAMESPACE");
        std::env::remove_var("REL_ENDPOINT");
        std::env::remove_var("REL_KEY");
        std::env::remove_var("SQL_URI");
    }
}
