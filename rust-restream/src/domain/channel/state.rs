//! Channel pipeline state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Pipeline states of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// No process is running for the channel.
    #[default]
    Idle,
    /// The resolver is being asked for a fresh locator.
    Resolving,
    /// A transcoder has been launched and the playlist is awaited.
    Starting,
    /// The transcoder is alive and writing the rolling window.
    Streaming,
    /// The running process is being torn down.
    Stopping,
    /// Retries are exhausted or the store is unusable. Waits for a new request.
    Failed,
}

impl PipelineState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Resolving => "RESOLVING",
            Self::Starting => "STARTING",
            Self::Streaming => "STREAMING",
            Self::Stopping => "STOPPING",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(Self::Idle),
            "RESOLVING" => Some(Self::Resolving),
            "STARTING" => Some(Self::Starting),
            "STREAMING" => Some(Self::Streaming),
            "STOPPING" => Some(Self::Stopping),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if a conversion is in flight (a process may be alive or about to be).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Resolving | Self::Starting | Self::Streaming)
    }

    /// Check if the pipeline is settled and needs an external request to move.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (from, to) if from == &to => true,

            (Idle, Resolving | Stopping) => true,

            // Resolving retries itself after a backoff.
            (Resolving, Starting | Failed | Stopping) => true,

            // An immediate start failure re-resolves.
            (Starting, Streaming | Resolving | Failed | Stopping) => true,

            // A crash re-resolves without an external request.
            (Streaming, Resolving | Failed | Stopping) => true,

            (Stopping, Idle | Resolving) => true,

            (Failed, Resolving | Stopping) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: PipelineState) -> Result<PipelineState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
