//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::domain::ChannelStatus;
use crate::manager::ConversionResponse;

/// Body of `POST /api/convert`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub source: String,
}

/// Reply to a conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ConversionResponse> for ConvertResponse {
    fn from(response: ConversionResponse) -> Self {
        match response {
            ConversionResponse::Accepted { playlist } => Self {
                accepted: true,
                playlist: Some(playlist),
                reason: None,
            },
            ConversionResponse::Rejected { reason } => Self {
                accepted: false,
                playlist: None,
                reason: Some(reason),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<ChannelStatus>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub channels: usize,
    pub processes: usize,
}

/// Log filter body for `GET`/`PUT /api/logging`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    pub filter: String,
}
