//! Transcode process supervision.
//!
//! One external transcoder per channel writes the channel's rolling HLS
//! window. The supervisor launches it, confirms liveness by waiting for the
//! first playlist write, reports its exit, and guarantees that a channel
//! never has two live writers.

mod args;
mod supervisor;

use std::time::Duration;

use chrono::{DateTime, Utc};
use process_utils::ExitKind;
use serde::Serialize;
use thiserror::Error;

use crate::domain::ChannelKey;
use crate::store::StoreError;

pub use args::build_args;
pub use supervisor::{ProcessHandle, TranscodeSupervisor};

/// Lines of transcoder stderr kept for error reporting.
pub const STDERR_TAIL_LINES: usize = 20;

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder exited during startup ({exit}){}", format_tail(.stderr_tail))]
    ExitedDuringStart { exit: ExitKind, stderr_tail: String },

    #[error("transcoder wrote no playlist within {}s", .timeout.as_secs_f32())]
    StartTimeout { timeout: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

fn format_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail)
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessExit {
    #[serde(skip)]
    pub kind: ExitKind,
    /// The process was stopped on request rather than exiting on its own.
    pub requested: bool,
    pub stderr_tail: String,
    pub at: DateTime<Utc>,
}

impl ProcessExit {
    /// Classify the exit for the event stream.
    pub fn event_kind(&self) -> ProcessEventKind {
        if self.requested {
            return ProcessEventKind::Stopped;
        }
        match self.kind {
            ExitKind::Success => ProcessEventKind::ExitedOk,
            ExitKind::Failure(code) => ProcessEventKind::ExitedError(code),
            ExitKind::Terminated => ProcessEventKind::Crashed,
        }
    }

    pub fn describe(&self) -> String {
        format!("{}{}", self.kind, format_tail(&self.stderr_tail))
    }
}

/// Lifecycle event kinds of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "code")]
pub enum ProcessEventKind {
    Started,
    ExitedOk,
    ExitedError(i32),
    Crashed,
    Stopped,
}

/// A lifecycle event published by the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessEvent {
    pub channel: ChannelKey,
    pub process_id: u64,
    pub pid: Option<u32>,
    pub kind: ProcessEventKind,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit(kind: ExitKind, requested: bool) -> ProcessExit {
        ProcessExit {
            kind,
            requested,
            stderr_tail: String::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_exit_classification() {
        assert_eq!(exit(ExitKind::Success, false).event_kind(), ProcessEventKind::ExitedOk);
        assert_eq!(
            exit(ExitKind::Failure(1), false).event_kind(),
            ProcessEventKind::ExitedError(1)
        );
        assert_eq!(exit(ExitKind::Terminated, false).event_kind(), ProcessEventKind::Crashed);
        assert_eq!(exit(ExitKind::Terminated, true).event_kind(), ProcessEventKind::Stopped);
    }

    #[test]
    fn test_error_includes_stderr_tail() {
        let err = SupervisorError::ExitedDuringStart {
            exit: ExitKind::Failure(1),
            stderr_tail: "Connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "transcoder exited during startup (exit 1): Connection refused"
        );
    }
}
