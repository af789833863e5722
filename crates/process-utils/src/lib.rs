//! Small process-related helpers shared across the workspace.

use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    /// Exited with status 0.
    Success,
    /// Exited with a non-zero status code.
    Failure(i32),
    /// Terminated without an exit code (signal on Unix).
    Terminated,
}

impl ExitKind {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Success => Some(0),
            Self::Failure(code) => Some(*code),
            Self::Terminated => None,
        }
    }
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Success,
            Some(code) => Self::Failure(code),
            None => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "exit 0"),
            Self::Failure(code) => write!(f, "exit {}", code),
            Self::Terminated => write!(f, "terminated by signal"),
        }
    }
}

#[cfg(feature = "tokio")]
mod async_process {
    use std::ffi::OsStr;
    use std::process::ExitStatus;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::process::Child;

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd
    }

    /// Ask a child to quit, then force it.
    ///
    /// If the child's stdin is still attached, `q` is written to it (ffmpeg's
    /// interactive quit key) and the pipe is closed. The child then gets `grace`
    /// to exit on its own before it is killed. The exit status is always awaited,
    /// so the process is reaped by the time this returns.
    pub async fn shutdown_child(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
        if let Some(mut stdin) = child.stdin.take() {
            // Broken pipe just means the child already went away.
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                child.kill().await?;
                child.wait().await
            }
        }
    }
}

#[cfg(feature = "tokio")]
pub use async_process::{shutdown_child, tokio_command};
