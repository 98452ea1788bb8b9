//! Service configuration.

use crate::error::{Result, StreamError};
use std::str::FromStr;
use std::time::Duration;

/// Prefix of environment variables read by [`ServiceConfig::from_env`].
pub const ENV_PREFIX: &str = "TAILLOG_";

/// What a close-record means to later appends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Readers treat the close-record as end of stream; writers may continue.
    #[default]
    Advisory,
    /// Appends after a stored close-record fail with `NodeClosed`.
    ///
    /// The check reads the record at the current counter value. While a
    /// close is claimed but its record not yet written, that slot reads as
    /// empty and a racing append still succeeds after the close.
    Terminal,
}

impl FromStr for ClosePolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "advisory" => Ok(ClosePolicy::Advisory),
            "terminal" => Ok(ClosePolicy::Terminal),
            other => Err(StreamError::Config(format!("unknown close policy {other:?}"))),
        }
    }
}

/// Tunables for the registry, append engine, reader and sessions.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Largest accepted payload.
    /// Default: 16MB
    pub max_payload_bytes: usize,

    /// Whether a close-record stops further appends.
    pub close_policy: ClosePolicy,

    /// Random identities tried by `open_node` before giving up.
    pub open_attempts: u32,

    /// Attempts to store a record after its sequence was claimed.
    pub record_write_attempts: u32,

    /// Records kept in the read cache.
    pub record_cache_size: usize,

    /// Frames buffered between a session thread and its consumer.
    pub session_buffer_size: usize,

    /// How long a tailing reader waits for an announced-but-missing record
    /// before skipping it.
    pub gap_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 16 * 1024 * 1024,
            close_policy: ClosePolicy::Advisory,
            open_attempts: 8,
            record_write_attempts: 3,
            record_cache_size: 1024,
            session_buffer_size: 256,
            gap_timeout: Duration::from_secs(2),
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with `TAILLOG_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overlaid with `TAILLOG_*` pairs; other names are ignored.
    ///
    /// Recognized: `MAX_PAYLOAD_BYTES`, `CLOSE_POLICY`, `OPEN_ATTEMPTS`,
    /// `RECORD_WRITE_ATTEMPTS`, `RECORD_CACHE_SIZE`, `SESSION_BUFFER_SIZE`,
    /// `GAP_TIMEOUT_MS`.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (name, value) in vars {
            let Some(name) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "MAX_PAYLOAD_BYTES" => config.max_payload_bytes = parse(name, value)?,
                "CLOSE_POLICY" => config.close_policy = value.parse()?,
                "OPEN_ATTEMPTS" => config.open_attempts = parse(name, value)?,
                "RECORD_WRITE_ATTEMPTS" => config.record_write_attempts = parse(name, value)?,
                "RECORD_CACHE_SIZE" => config.record_cache_size = parse(name, value)?,
                "SESSION_BUFFER_SIZE" => config.session_buffer_size = parse(name, value)?,
                "GAP_TIMEOUT_MS" => {
                    config.gap_timeout = Duration::from_millis(parse(name, value)?)
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.open_attempts == 0 {
            return Err(StreamError::Config("open_attempts must be at least 1".into()));
        }
        if self.record_write_attempts == 0 {
            return Err(StreamError::Config(
                "record_write_attempts must be at least 1".into(),
            ));
        }
        if self.session_buffer_size == 0 {
            return Err(StreamError::Config(
                "session_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StreamError::Config(format!("invalid {ENV_PREFIX}{name}: {value:?}")))
}
