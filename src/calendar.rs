// External reservation calendars
// Channels such as Booking.com publish the busy periods of an apartment instance as an iCal feed

use crate::config::{CalendarConfig, ConfigError};
use crate::interval::Interval;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalendarError {
    #[error("Failed to fetch calendar {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Calendar {url} responded with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Calendar fetch timed out after {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Unrecognized calendar format: {0}")]
    Format(String),
}

// A busy period of one apartment instance as published by an external channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub interval: Interval,
    pub source: Option<String>,
    pub summary: Option<String>,
    pub uid: Option<String>,
}

impl Event {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            source: None,
            summary: None,
            uid: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// Collaborator returning the raw text behind a calendar URL
#[async_trait]
pub trait CalendarSource: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<String, CalendarError>;
}

pub struct HttpCalendarSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCalendarSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &CalendarConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.fetch_timeout())?)
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> CalendarError {
        if error.is_timeout() {
            CalendarError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            CalendarError::Fetch {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl CalendarSource for HttpCalendarSource {
    async fn fetch(&self, url: &str) -> Result<String, CalendarError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "calendar source rejected request");
            return Err(CalendarError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Bytes = response.bytes().await.map_err(|e| self.map_error(url, e))?;
        tracing::debug!(url, bytes = body.len(), "fetched calendar");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
