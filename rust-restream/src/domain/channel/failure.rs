//! Failure taxonomy of the conversion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classes of pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Malformed key or source reference. Rejected synchronously.
    InvalidRequest,
    /// The resolver could not produce a locator.
    ResolutionFailure,
    /// The transcoder failed to launch or died before writing a playlist.
    ProcessStartFailure,
    /// The transcoder exited while streaming.
    ProcessCrash,
    /// The channel's output path is unusable.
    StoreFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ResolutionFailure => "RESOLUTION_FAILURE",
            Self::ProcessStartFailure => "PROCESS_START_FAILURE",
            Self::ProcessCrash => "PROCESS_CRASH",
            Self::StoreFailure => "STORE_FAILURE",
        }
    }

    /// Transient failures are retried with backoff up to the ceiling.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ResolutionFailure | Self::ProcessStartFailure | Self::ProcessCrash
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure recorded as a channel's last error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl PipelineFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(FailureKind::ResolutionFailure.is_transient());
        assert!(FailureKind::ProcessStartFailure.is_transient());
        assert!(FailureKind::ProcessCrash.is_transient());
        assert!(!FailureKind::StoreFailure.is_transient());
        assert!(!FailureKind::InvalidRequest.is_transient());
    }

    #[test]
    fn test_failure_display() {
        let failure = PipelineFailure::new(FailureKind::ResolutionFailure, "source not found");
        assert_eq!(failure.to_string(), "RESOLUTION_FAILURE: source not found");
    }
}
