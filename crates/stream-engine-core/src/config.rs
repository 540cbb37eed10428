use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::retry::RetryPolicy;

/// Named pacing presets for the inter-event delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedPreset {
    Instant,
    Fast,
    #[default]
    Normal,
    Slow,
    /// Explicit delay in milliseconds.
    Custom(u64),
}

impl SpeedPreset {
    pub fn delay(self) -> Duration {
        let ms = match self {
            Self::Instant => 0,
            Self::Fast => 20,
            Self::Normal => 50,
            Self::Slow => 150,
            Self::Custom(ms) => ms,
        };
        Duration::from_millis(ms)
    }
}

impl FromStr for SpeedPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "fast" => Ok(Self::Fast),
            "normal" => Ok(Self::Normal),
            "slow" => Ok(Self::Slow),
            other => other
                .parse::<u64>()
                .map(Self::Custom)
                .map_err(|_| ConfigError::Env {
                    key: "speed".into(),
                    value: s.to_string(),
                }),
        }
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instant => f.write_str("instant"),
            Self::Fast => f.write_str("fast"),
            Self::Normal => f.write_str("normal"),
            Self::Slow => f.write_str("slow"),
            Self::Custom(ms) => write!(f, "{ms}ms"),
        }
    }
}

/// Session behavior options. Callbacks are attached on the session builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub speed: SpeedPreset,
    /// Deadline for pauses whose request does not carry one. `None` waits forever.
    #[serde(default)]
    pub default_pause_timeout_ms: Option<u64>,
    /// Continue with field defaults when a pause deadline elapses.
    #[serde(default)]
    pub resume_on_timeout: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl SessionConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `STREAM_ENGINE_*` environment variables.
    ///
    /// - `STREAM_ENGINE_SPEED`: `instant|fast|normal|slow` or milliseconds.
    /// - `STREAM_ENGINE_PAUSE_TIMEOUT_MS`: default pause deadline.
    /// - `STREAM_ENGINE_RESUME_ON_TIMEOUT`: boolean.
    /// - `STREAM_ENGINE_MAX_RETRIES`: retry budget.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup` (keyed like [`SessionConfig::from_env`]).
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup("STREAM_ENGINE_SPEED") {
            self.speed = raw.parse()?;
        }
        if let Some(raw) = lookup("STREAM_ENGINE_PAUSE_TIMEOUT_MS") {
            self.default_pause_timeout_ms = Some(parse_env("STREAM_ENGINE_PAUSE_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("STREAM_ENGINE_RESUME_ON_TIMEOUT") {
            self.resume_on_timeout = parse_bool(&raw).ok_or_else(|| ConfigError::Env {
                key: "STREAM_ENGINE_RESUME_ON_TIMEOUT".into(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("STREAM_ENGINE_MAX_RETRIES") {
            self.retry.max_retries = parse_env("STREAM_ENGINE_MAX_RETRIES", &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_speed(mut self, speed: SpeedPreset) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_default_pause_timeout_ms(mut self, ms: u64) -> Self {
        self.default_pause_timeout_ms = Some(ms);
        self
    }

    pub fn resume_on_timeout(mut self, resume: bool) -> Self {
        self.resume_on_timeout = resume;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn event_delay(&self) -> Duration {
        self.speed.delay()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate().map_err(ConfigError::Invalid)
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}
