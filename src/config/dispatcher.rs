//! Dispatcher configuration structures.

use std::env::VarError;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable names read by [`DispatcherConfig::from_env`].
pub mod env {
    /// Master on/off switch.
    pub const ENABLED: &str = "TASK_DISPATCH_ENABLED";
    /// Verbose logging.
    pub const DEBUG: &str = "TASK_DISPATCH_DEBUG";
    /// Queue capacity.
    pub const MAX_QUEUE_SIZE: &str = "TASK_DISPATCH_MAX_QUEUE_SIZE";
    /// Alert watermark.
    pub const THRESHOLD_SIZE: &str = "TASK_DISPATCH_THRESHOLD_SIZE";
    /// Attempts per envelope.
    pub const MAX_TRIES: &str = "TASK_DISPATCH_MAX_TRIES";
    /// Sleep between attempts, milliseconds.
    pub const RETRY_BACKOFF_MS: &str = "TASK_DISPATCH_RETRY_BACKOFF_MS";
    /// Consumer poll timeout, milliseconds.
    pub const POLL_INTERVAL_MS: &str = "TASK_DISPATCH_POLL_INTERVAL_MS";
}

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100_000;
/// Default alert watermark.
pub const DEFAULT_THRESHOLD_SIZE: usize = 10_000;
/// Default attempts per envelope.
pub const DEFAULT_MAX_TRIES: u32 = 10;
/// Default fixed backoff between attempts.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;
/// Default consumer poll timeout.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Bounded retry with a fixed sleep between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per envelope, including the first.
    pub max_tries: u32,
    /// Sleep between attempts, milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Sleep between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Dispatcher configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// When false, `enqueue` is a no-op and no consumer thread is started.
    pub enabled: bool,
    /// Per-envelope debug logging.
    pub debug: bool,
    /// Queue capacity.
    pub max_queue_size: usize,
    /// Queue size above which a (debounced) alert is raised.
    pub threshold_size: usize,
    /// How long the consumer waits on an empty queue before re-checking its
    /// running flag, milliseconds.
    pub poll_interval_ms: u64,
    /// Retry policy for transient backend failures.
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            threshold_size: DEFAULT_THRESHOLD_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// Defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the master switch.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set debug logging.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the alert watermark.
    #[must_use]
    pub const fn with_threshold_size(mut self, size: usize) -> Self {
        self.threshold_size = size;
        self
    }

    /// Set the consumer poll timeout.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = saturating_millis(interval);
        self
    }

    /// Set the attempts per envelope.
    #[must_use]
    pub const fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.retry.max_tries = max_tries;
        self
    }

    /// Set the fixed backoff between attempts.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry.backoff_ms = saturating_millis(backoff);
        self
    }

    /// Consumer poll timeout.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be greater than 0".into());
        }
        if self.retry.max_tries == 0 {
            return Err("retry.max_tries must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from a variable lookup, starting from defaults.
    ///
    /// Unset variables keep their default; set but unparsable ones are errors.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending variable, or a validation error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::try_from_lookup(|key| Ok(lookup(key)))
    }

    /// Like [`DispatcherConfig::from_lookup`] for lookups that can fail on
    /// their own, such as a variable holding bytes that are not UTF-8.
    ///
    /// # Errors
    ///
    /// Returns the lookup's error, a message naming a variable whose value
    /// does not parse, or a validation error.
    pub fn try_from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Result<Option<String>, String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup(env::ENABLED)? {
            cfg.enabled = parse_bool(env::ENABLED, &v)?;
        }
        if let Some(v) = lookup(env::DEBUG)? {
            cfg.debug = parse_bool(env::DEBUG, &v)?;
        }
        if let Some(v) = lookup(env::MAX_QUEUE_SIZE)? {
            cfg.max_queue_size = parse_num(env::MAX_QUEUE_SIZE, &v)?;
        }
        if let Some(v) = lookup(env::THRESHOLD_SIZE)? {
            cfg.threshold_size = parse_num(env::THRESHOLD_SIZE, &v)?;
        }
        if let Some(v) = lookup(env::MAX_TRIES)? {
            cfg.retry.max_tries = parse_num(env::MAX_TRIES, &v)?;
        }
        if let Some(v) = lookup(env::RETRY_BACKOFF_MS)? {
            cfg.retry.backoff_ms = parse_num(env::RETRY_BACKOFF_MS, &v)?;
        }
        if let Some(v) = lookup(env::POLL_INTERVAL_MS)? {
            cfg.poll_interval_ms = parse_num(env::POLL_INTERVAL_MS, &v)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment, loading a `.env`
    /// file first when one exists.
    ///
    /// # Errors
    ///
    /// Fails when a variable is set to an unparsable value or the result does
    /// not validate.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env is normal; only real variables matter.
        let _ = dotenvy::dotenv();
        Self::try_from_lookup(env_var)
            .map_err(anyhow::Error::msg)
            .context("loading dispatcher configuration from environment")
    }

    /// Build configuration from a specific env file layered over the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or the values are invalid.
    pub fn from_env_file(path: impl AsRef<std::path::Path>) -> AppResult<Self> {
        let path = path.as_ref();
        dotenvy::from_path(path)
            .with_context(|| format!("reading env file {}", path.display()))?;
        Self::try_from_lookup(env_var)
            .map_err(anyhow::Error::msg)
            .context("loading dispatcher configuration from env file")
    }
}

/// Whole milliseconds, rounded up to 1 for non-zero sub-millisecond input.
const fn saturating_millis(d: Duration) -> u64 {
    let ms = d.as_millis();
    if ms > u64::MAX as u128 {
        u64::MAX
    } else if ms == 0 && !d.is_zero() {
        1
    } else {
        ms as u64
    }
}

/// Process environment lookup; a value that is not UTF-8 is an error, not
/// "unset".
fn env_var(key: &str) -> Result<Option<String>, String> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(format!("{key}: value is not valid UTF-8")),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("{key}: expected a boolean, got `{other}`")),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{key}: invalid number `{value}`: {e}"))
}
