//! Configuration module
//!
//! Worker settings are read from the environment (after loading `.env` if present).
//! Every setting except the database URL has a default.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const DB_MAX_CONNECTIONS: u32 = 5;
const DB_TIMEOUT_SECS: u64 = 30;
const CHANNEL: &str = "feedback_new";
const BATCH_LIMIT: i64 = 100;
const NOTIFY_BATCH_LIMIT: i64 = 50;
const POLL_TIMEOUT_MS: u64 = 5000;
const MAX_BACKOFF_SECS: u64 = 60;
/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_CHANNEL_LEN: usize = 63;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// LISTEN/NOTIFY channel that producers signal on insert.
    pub channel: String,
    /// Batch size for the bootstrap sweep and for timer-driven sweeps.
    pub batch_limit: i64,
    /// Batch size for sweeps triggered by a notification.
    pub notify_batch_limit: i64,
    /// Upper bound on the wait for a notification before a fallback sweep.
    pub poll_timeout_ms: u64,
    /// Cap for the exponential backoff after a failed sweep.
    pub max_backoff_secs: u64,
    pub run_migrations: bool,
    pub environment: String,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("FEEDSENSE_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or(ConfigError::Missing("FEEDSENSE_DATABASE_URL or DATABASE_URL"))?;

        let log_format = match lookup("LOG_FORMAT")
            .unwrap_or_else(|| "compact".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            "compact" | "text" => LogFormat::Compact,
            other => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let config = WorkerConfig {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS)?,
            db_timeout_seconds: parse_or(&lookup, "DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS)?,
            channel: lookup("WORKER_CHANNEL").unwrap_or_else(|| CHANNEL.to_string()),
            batch_limit: parse_or(&lookup, "WORKER_BATCH_LIMIT", BATCH_LIMIT)?,
            notify_batch_limit: parse_or(&lookup, "WORKER_NOTIFY_BATCH_LIMIT", NOTIFY_BATCH_LIMIT)?,
            poll_timeout_ms: parse_or(&lookup, "WORKER_POLL_TIMEOUT_MS", POLL_TIMEOUT_MS)?,
            max_backoff_secs: parse_or(&lookup, "WORKER_MAX_BACKOFF_SECS", MAX_BACKOFF_SECS)?,
            run_migrations: parse_or(&lookup, "WORKER_RUN_MIGRATIONS", true)?,
            environment: lookup("ENVIRONMENT")
                .or_else(|| lookup("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", self.db_max_connections));
        }
        if self.batch_limit <= 0 {
            return Err(invalid("WORKER_BATCH_LIMIT", self.batch_limit));
        }
        if self.notify_batch_limit <= 0 {
            return Err(invalid("WORKER_NOTIFY_BATCH_LIMIT", self.notify_batch_limit));
        }
        if self.poll_timeout_ms == 0 {
            return Err(invalid("WORKER_POLL_TIMEOUT_MS", self.poll_timeout_ms));
        }
        if !is_valid_channel(&self.channel) {
            return Err(invalid("WORKER_CHANNEL", &self.channel));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_seconds)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .to_lowercase()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

/// A plain (unquoted) PostgreSQL identifier: letters, digits, `_` and `$`, not starting with a digit.
fn is_valid_channel(channel: &str) -> bool {
    let mut chars = channel.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    channel.len() <= MAX_CHANNEL_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
