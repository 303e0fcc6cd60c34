//! Configuration management for the client.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use marksync_engine::BATCH_SIZE;

/// Default location of the local snapshot file.
pub const DEFAULT_STATE_PATH: &str = "marksync.json";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote sync service, e.g. `https://sync.example.com`
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Local snapshot file
    pub state_path: PathBuf,
    /// Rows per pull or push request
    pub batch_size: usize,
    /// Period of the timer trigger
    pub sync_interval: Duration,
    /// Per-request timeout, also used for the event stream handshake
    pub request_timeout: Duration,
}

impl Config {
    /// Configuration with defaults for everything but the remote URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            batch_size: BATCH_SIZE,
            sync_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var("MARKSYNC_URL").map_err(|_| ConfigError::MissingUrl)?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(base_url));
        }

        let mut config = Self::new(base_url);
        config.token = env::var("MARKSYNC_TOKEN").ok().filter(|t| !t.is_empty());

        if let Ok(path) = env::var("MARKSYNC_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }

        if let Ok(value) = env::var("MARKSYNC_BATCH_SIZE") {
            config.batch_size = match value.parse() {
                Ok(0) | Err(_) => return Err(ConfigError::Invalid("MARKSYNC_BATCH_SIZE", value)),
                Ok(size) => size,
            };
        }

        if let Ok(value) = env::var("MARKSYNC_INTERVAL_SECS") {
            config.sync_interval = parse_secs("MARKSYNC_INTERVAL_SECS", value)?;
        }

        if let Ok(value) = env::var("MARKSYNC_TIMEOUT_SECS") {
            config.request_timeout = parse_secs("MARKSYNC_TIMEOUT_SECS", value)?;
        }

        Ok(config)
    }
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid(name, value)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MARKSYNC_URL environment variable is required")]
    MissingUrl,

    #[error("MARKSYNC_URL must start with http:// or https://, got {0}")]
    InvalidUrl(String),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
