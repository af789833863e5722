//! Point-in-time channel snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelKey, PipelineFailure, PipelineState, SourceReference};

/// A snapshot of a channel and its pipeline, as returned by `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub key: ChannelKey,
    pub source: SourceReference,
    pub state: PipelineState,
    /// Deterministic playlist address, valid before the file exists.
    pub playlist: String,
    pub consecutive_failures: u32,
    /// Number of processes launched for this channel.
    pub restart_count: u32,
    pub last_error: Option<PipelineFailure>,
    /// When the last locator was resolved successfully.
    pub resolved_at: Option<DateTime<Utc>>,
    pub streaming_since: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelStatus {
    pub fn new(key: ChannelKey, source: SourceReference, playlist: String) -> Self {
        Self {
            key,
            source,
            state: PipelineState::Idle,
            playlist,
            consecutive_failures: 0,
            restart_count: 0,
            last_error: None,
            resolved_at: None,
            streaming_since: None,
            pid: None,
            updated_at: Utc::now(),
        }
    }
}
