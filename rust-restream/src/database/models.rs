//! Database models.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{ChannelKey, PipelineState, SourceReference};

/// Channel metadata record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Normalized channel key.
    pub key: String,
    pub source: String,
    /// Public playlist address.
    pub playlist: String,
    /// Pipeline state name (STREAMING, FAILED, ...).
    pub status: String,
    pub last_error: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
}

impl ChannelRecord {
    pub fn new(
        key: &ChannelKey,
        source: &SourceReference,
        playlist: impl Into<String>,
        status: PipelineState,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            key: key.to_string(),
            source: source.to_string(),
            playlist: playlist.into(),
            status: status.as_str().to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn state(&self) -> Option<PipelineState> {
        PipelineState::parse(&self.status)
    }
}
