//! Worker configuration and option resolution.
//!
//! 優先順位: 明示的な options → 環境変数 → デフォルト値。
//! poll interval は Worker 構築時に一度だけ解決し、tick ごとに読み直さない。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 30;

/// Environment override for the poll interval (milliseconds).
pub const POLL_INTERVAL_ENV: &str = "POLLBRIDGE_POLL_INTERVAL_MS";
/// Environment override for the bus receive timeout (seconds).
pub const RECEIVE_TIMEOUT_ENV: &str = "POLLBRIDGE_RECEIVE_TIMEOUT_SECS";

/// What to do when a tick fires while the previous cycle is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Start a new cycle on every tick; cycles may overlap.
    #[default]
    Allow,
    /// Skip the tick if the previous cycle has not settled yet.
    Skip,
}

/// Partial, user-supplied options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// `Some(false)` turns peek-lock (and therefore the delete) off.
    pub non_repeatable: Option<bool>,
    pub overlap: Option<OverlapPolicy>,
}

/// Options passed through to every `receive_one` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub peek_lock: bool,
    pub timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            peek_lock: true,
            timeout: Duration::from_secs(DEFAULT_RECEIVE_TIMEOUT_SECS),
        }
    }
}

/// Resolve receive options against the process environment.
pub fn get_options(options: &WorkerOptions) -> Result<ReceiveOptions, ConfigError> {
    resolve_receive_options(options, env_lookup)
}

/// Same as [`get_options`] with an injectable environment lookup.
pub fn resolve_receive_options<F>(
    options: &WorkerOptions,
    lookup: F,
) -> Result<ReceiveOptions, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let timeout_secs =
        parse_env_u64(&lookup, RECEIVE_TIMEOUT_ENV)?.unwrap_or(DEFAULT_RECEIVE_TIMEOUT_SECS);

    Ok(ReceiveOptions {
        peek_lock: options.non_repeatable.unwrap_or(true),
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// Immutable configuration of one worker (one topic/subscriber pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    topic: String,
    subscriber: String,
    receive: ReceiveOptions,
    poll_interval: Duration,
    overlap: OverlapPolicy,
}

impl WorkerConfig {
    /// Resolve a config from `options` and the process environment.
    pub fn from_env(
        topic: impl Into<String>,
        subscriber: impl Into<String>,
        options: &WorkerOptions,
    ) -> Result<Self, ConfigError> {
        Self::resolve_with(topic, subscriber, options, env_lookup)
    }

    /// Resolve a config with an injectable environment lookup.
    pub fn resolve_with<F>(
        topic: impl Into<String>,
        subscriber: impl Into<String>,
        options: &WorkerOptions,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let topic = topic.into();
        let subscriber = subscriber.into();
        if topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if subscriber.trim().is_empty() {
            return Err(ConfigError::EmptySubscriber);
        }

        let receive = resolve_receive_options(options, &lookup)?;
        let poll_ms = parse_env_u64(&lookup, POLL_INTERVAL_ENV)?.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        Ok(Self {
            topic,
            subscriber,
            receive,
            poll_interval: Duration::from_millis(poll_ms),
            overlap: options.overlap.unwrap_or_default(),
        })
    }

    /// Override the poll interval after resolution.
    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        self.poll_interval = interval;
        Ok(self)
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive.timeout = timeout;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn peek_lock(&self) -> bool {
        self.receive.peek_lock
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        self.receive
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn overlap(&self) -> OverlapPolicy {
        self.overlap
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_env_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    // 空文字は「未設定」と同じ扱い
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { key, value: raw })
}
