// Service configuration
// Every section has sensible defaults so a partial JSON document is enough

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("HTTP client initialization error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    pub calendar: CalendarConfig,
    pub email: EmailConfig,
    pub token: TokenConfig,
}

// External calendar feeds (Booking.com and other channels)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub fetch_timeout_ms: u64,
    // Offset of the property's local time from UTC, applied to `Z` timestamps
    pub utc_offset_seconds: i32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5000,
            utc_offset_seconds: 0,
        }
    }
}

impl CalendarConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_seconds).ok_or(ConfigError::InvalidValue {
            field: "calendar.utc_offset_seconds",
            reason: format!("{} is out of range", self.utc_offset_seconds),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub sender: String,
    // Comma separated addresses receiving exception reports
    pub developers: String,
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sender: "no-reply@booking.local".to_string(),
            developers: String::new(),
            workers: 2,
            queue_size: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub code_length: usize,
    pub ttl_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            code_length: 32,
            ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl TokenConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

impl BookingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: BookingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calendar.fetch_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "calendar.fetch_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.calendar.utc_offset()?;

        if self.email.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "email.workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.email.queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "email.queue_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.token.ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "token.ttl_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
