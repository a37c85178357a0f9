//! Error taxonomy shared by the decoding, accumulation and aggregation code.
//! Application edges (startup, MQTT loop) wrap these in `anyhow`.

use thiserror::Error;
use time::Date;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Sensor sample did not carry exactly eight channels.
    #[error("invalid frame: expected 8 channels, got {channels}")]
    InvalidFrame { channels: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A submitted reading or lighting interval that cannot be stored.
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    /// No temperature readings exist for the requested day.
    #[error("no temperature readings for {date}")]
    NoData { date: Date },

    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),
}

impl CoreError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_reading(msg: impl Into<String>) -> Self {
        Self::InvalidReading(msg.into())
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData { .. })
    }
}
