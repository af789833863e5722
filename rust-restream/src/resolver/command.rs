//! Resolver backed by an external command line tool (yt-dlp by default).

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::{Locator, LocatorResolver, ResolutionError};
use crate::config::{ResolverConfig, SOURCE_PLACEHOLDER};
use crate::domain::SourceReference;

/// Stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 5;

/// Runs the configured tool and takes the first non-empty stdout line as the locator.
pub struct CommandResolver {
    config: ResolverConfig,
}

impl CommandResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, source: &SourceReference) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(SOURCE_PLACEHOLDER, source.as_str()))
            .collect()
    }
}

/// Last `n` non-empty lines of diagnostic output, joined.
fn output_tail(bytes: &[u8], n: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

#[async_trait]
impl LocatorResolver for CommandResolver {
    fn name(&self) -> &str {
        "command"
    }

    async fn resolve(&self, source: &SourceReference) -> Result<Locator, ResolutionError> {
        let args = self.build_args(source);
        debug!(binary = %self.config.binary_path, source = %source, "Resolving locator");

        let mut command = process_utils::tokio_command(&self.config.binary_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                ResolutionError::ResolverUnavailable {
                    reason: format!("cannot run {}: {}", self.config.binary_path, e),
                }
            }
            _ => ResolutionError::ResolverUnavailable {
                reason: format!("failed to spawn {}: {}", self.config.binary_path, e),
            },
        })?;

        // Dropping the output future on timeout kills the child.
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResolutionError::ResolverUnavailable {
                    reason: format!("error waiting for resolver: {}", e),
                });
            }
            Err(_) => {
                warn!(source = %source, timeout_secs = self.config.timeout.as_secs(), "Resolver timed out");
                return Err(ResolutionError::Timeout {
                    timeout: self.config.timeout,
                });
            }
        };

        let stderr_tail = output_tail(&output.stderr, STDERR_TAIL_LINES);
        if !stderr_tail.is_empty() {
            trace!(source = %source, stderr = %stderr_tail, "Resolver diagnostics");
        }

        match output.status.code() {
            Some(0) => {}
            Some(code) => {
                return Err(ResolutionError::NotFound {
                    reason: if stderr_tail.is_empty() {
                        format!("resolver exited with code {}", code)
                    } else {
                        format!("resolver exited with code {}: {}", code, stderr_tail)
                    },
                });
            }
            None => {
                return Err(ResolutionError::ResolverUnavailable {
                    reason: "resolver terminated by signal".to_string(),
                });
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let url = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| ResolutionError::NotFound {
                reason: "resolver produced no locator".to_string(),
            })?;

        debug!(source = %source, "Locator resolved");
        Ok(Locator::new(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_source_placeholder_substitution() {
        let resolver = CommandResolver::new(ResolverConfig::default());
        let source = SourceReference::new("https://example/live1").unwrap();
        let args = resolver.build_args(&source);
        assert_eq!(args.last().map(String::as_str), Some("https://example/live1"));
        assert!(args.contains(&"-g".to_string()));
    }

    #[test]
    fn test_output_tail() {
        assert_eq!(output_tail(b"a\n\nb\nc\n", 2), "b | c");
        assert_eq!(output_tail(b"", 2), "");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let resolver = CommandResolver::new(ResolverConfig {
            binary_path: "/nonexistent/rust-restream-resolver".to_string(),
            ..ResolverConfig::default()
        });
        let source = SourceReference::new("https://example/live1").unwrap();
        let err = resolver.resolve(&source).await.unwrap_err();
        assert!(matches!(err, ResolutionError::ResolverUnavailable { .. }));
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> CommandResolver {
        CommandResolver::new(ResolverConfig {
            binary_path: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "resolver".to_string(), "{source}".to_string()],
            timeout,
            ..ResolverConfig::default()
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_stdout_line_is_locator() {
        let resolver = sh("echo; echo \"$1/index.m3u8\"; echo extra", Duration::from_secs(5));
        let source = SourceReference::new("https://cdn.example/a").unwrap();
        let locator = resolver.resolve(&source).await.unwrap();
        assert_eq!(locator.url, "https://cdn.example/a/index.m3u8");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_classification() {
        let source = SourceReference::new("badref").unwrap();

        let err = sh("echo 'ERROR: unsupported' >&2; exit 1", Duration::from_secs(5))
            .resolve(&source)
            .await
            .unwrap_err();
        match err {
            ResolutionError::NotFound { reason } => assert!(reason.contains("unsupported")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = sh("exit 0", Duration::from_secs(5))
            .resolve(&source)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));

        let err = sh("sleep 5", Duration::from_millis(200))
            .resolve(&source)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Timeout { .. }));
    }
}
