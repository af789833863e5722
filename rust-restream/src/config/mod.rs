//! Environment-driven application configuration.
//!
//! Values come from the process environment (after `dotenvy` has loaded a
//! `.env` file, if any). Every field has a default, and a malformed value
//! falls back to that default with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::server::ApiServerConfig;
use crate::manager::RetryConfig;
use crate::{Error, Result};

/// Placeholder substituted with the source reference in resolver arguments.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Read a non-empty, trimmed environment variable.
pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when absent or invalid.
pub(crate) fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match env_string(name) {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        None => default,
    }
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match env_string(name) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(var = name, value = %raw, "Invalid boolean, using default");
                default
            }
        },
        None => default,
    }
}

/// Segment store layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per channel.
    pub root: PathBuf,
    /// Public path prefix of playlist addresses.
    pub url_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./streams"),
            url_prefix: "/streams".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Some(root) = env_string("OUTPUT_DIR") {
            config.root = PathBuf::from(root);
        }
        if let Some(prefix) = env_string("PLAYLIST_URL_PREFIX") {
            config.url_prefix = normalize_url_prefix(&prefix);
        }
        config
    }
}

/// Absolute URLs (`https://cdn/hls`) are kept as given minus a trailing
/// slash; anything else is treated as a path rooted at `/`.
pub fn normalize_url_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed.trim_start_matches('/'))
    }
}

/// Which resolver implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// Run an external resolver tool.
    #[default]
    Command,
    /// Treat the source reference as the locator.
    Passthrough,
}

impl FromStr for ResolverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "command" => Ok(Self::Command),
            "passthrough" => Ok(Self::Passthrough),
            other => Err(Error::config(format!("unknown resolver kind '{}'", other))),
        }
    }
}

/// External resolver invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub kind: ResolverKind,
    pub binary_path: String,
    /// Arguments; `{source}` is replaced with the source reference.
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            kind: ResolverKind::Command,
            binary_path: "yt-dlp".to_string(),
            args: ["-g", "-f", "best", "--no-warnings", "--no-playlist", SOURCE_PLACEHOLDER]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ResolverConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        config.kind = env_parse("RESOLVER_KIND", config.kind);
        if let Some(path) = env_string("RESOLVER_PATH") {
            config.binary_path = path;
        }
        if let Some(args) = env_string("RESOLVER_ARGS") {
            config.args = args.split_whitespace().map(String::from).collect();
        }
        config.timeout = Duration::from_secs(env_parse(
            "RESOLVER_TIMEOUT_SECS",
            config.timeout.as_secs(),
        ));
        config
    }
}

/// Transcoder invocation and HLS output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub binary_path: String,
    /// Target segment duration in seconds.
    pub segment_duration_secs: u32,
    /// Number of segments advertised by the playlist.
    pub window_size: u32,
    /// Unreferenced segments retained before deletion.
    pub grace_segments: u32,
    /// `copy` or an encoder name.
    pub video_codec: String,
    pub audio_bitrate: String,
    /// Maximum wait for the first playlist write.
    pub start_timeout: Duration,
    /// Maximum wait for a graceful exit before a forced kill.
    pub stop_timeout: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            segment_duration_secs: 10,
            window_size: 3,
            grace_segments: 2,
            video_codec: "copy".to_string(),
            audio_bitrate: "128k".to_string(),
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl TranscoderConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Some(path) = env_string("FFMPEG_PATH") {
            config.binary_path = path;
        }
        config.segment_duration_secs =
            env_parse("HLS_SEGMENT_DURATION_SECS", config.segment_duration_secs);
        config.window_size = env_parse("HLS_WINDOW_SIZE", config.window_size);
        config.grace_segments = env_parse("HLS_GRACE_SEGMENTS", config.grace_segments);
        if let Some(codec) = env_string("TRANSCODE_VIDEO") {
            config.video_codec = codec;
        }
        if let Some(bitrate) = env_string("TRANSCODE_AUDIO_BITRATE") {
            config.audio_bitrate = bitrate;
        }
        config.start_timeout = Duration::from_secs(env_parse(
            "TRANSCODE_START_TIMEOUT_SECS",
            config.start_timeout.as_secs(),
        ));
        config.stop_timeout = Duration::from_secs(env_parse(
            "TRANSCODE_STOP_TIMEOUT_SECS",
            config.stop_timeout.as_secs(),
        ));
        config
    }
}

/// Channel pipeline policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How long a process must stream before its failure counter resets.
    pub healthy_after: Duration,
    /// Capacity of each channel's command mailbox.
    pub mailbox_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            healthy_after: Duration::from_secs(60),
            mailbox_capacity: 32,
        }
    }
}

impl PipelineConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        config.healthy_after = Duration::from_secs(env_parse(
            "PIPELINE_HEALTHY_AFTER_SECS",
            config.healthy_after.as_secs(),
        ));
        config
    }
}

impl RetryConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        config.max_retries = env_parse("RETRY_MAX_RETRIES", config.max_retries);
        config.initial_delay_ms = env_parse("RETRY_INITIAL_DELAY_MS", config.initial_delay_ms);
        config.max_delay_ms = env_parse("RETRY_MAX_DELAY_MS", config.max_delay_ms);
        config.backoff_multiplier =
            env_parse("RETRY_BACKOFF_MULTIPLIER", config.backoff_multiplier);
        config.use_jitter = env_bool("RETRY_JITTER", config.use_jitter);
        config
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite URL of the channel record store. Empty keeps records in memory.
    pub database_url: String,
    pub log_dir: PathBuf,
    pub store: StoreConfig,
    pub resolver: ResolverConfig,
    pub transcoder: TranscoderConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub api: ApiServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:restream.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("./logs"),
            store: StoreConfig::default(),
            resolver: ResolverConfig::default(),
            transcoder: TranscoderConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            api: ApiServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load every section from the environment.
    pub fn from_env_or_default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| Self::default().database_url),
            log_dir: env_string("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
            store: StoreConfig::from_env_or_default(),
            resolver: ResolverConfig::from_env_or_default(),
            transcoder: TranscoderConfig::from_env_or_default(),
            retry: RetryConfig::from_env_or_default(),
            pipeline: PipelineConfig::from_env_or_default(),
            api: ApiServerConfig::from_env_or_default(),
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.transcoder.segment_duration_secs == 0 {
            return Err(Error::config("HLS segment duration must be positive"));
        }
        if self.transcoder.window_size == 0 {
            return Err(Error::config("HLS window size must be positive"));
        }
        if self.transcoder.binary_path.trim().is_empty() {
            return Err(Error::config("transcoder binary path cannot be empty"));
        }
        if self.resolver.kind == ResolverKind::Command {
            if self.resolver.binary_path.trim().is_empty() {
                return Err(Error::config("resolver binary path cannot be empty"));
            }
            if !self.resolver.args.iter().any(|a| a.contains(SOURCE_PLACEHOLDER)) {
                return Err(Error::config(format!(
                    "resolver arguments must contain the {} placeholder",
                    SOURCE_PLACEHOLDER
                )));
            }
        }
        if self.store.root.as_os_str().is_empty() {
            return Err(Error::config("output directory cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.transcoder.segment_duration_secs, 10);
        assert_eq!(config.transcoder.window_size, 3);
        assert_eq!(config.store.url_prefix, "/streams");
        assert_eq!(config.api.port, 12556);
        assert_eq!(config.resolver.args.last().map(String::as_str), Some("{source}"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = AppConfig::default();
        config.transcoder.window_size = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = AppConfig::default();
        config.transcoder.segment_duration_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_source_placeholder() {
        let mut config = AppConfig::default();
        config.resolver.args = vec!["-g".to_string()];
        assert!(config.validate().is_err());

        config.resolver.kind = ResolverKind::Passthrough;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolver_kind_parse() {
        assert_eq!("command".parse::<ResolverKind>().unwrap(), ResolverKind::Command);
        assert_eq!(
            "PASSTHROUGH".parse::<ResolverKind>().unwrap(),
            ResolverKind::Passthrough
        );
        assert!("magic".parse::<ResolverKind>().is_err());
    }

    #[test]
    fn test_url_prefix_normalization() {
        assert_eq!(normalize_url_prefix("streams"), "/streams");
        assert_eq!(normalize_url_prefix("/live/hls/"), "/live/hls");
        assert_eq!(normalize_url_prefix("/"), "/");
        assert_eq!(
            normalize_url_prefix("https://cdn.example.com/hls/"),
            "https://cdn.example.com/hls"
        );

        let store = crate::store::SegmentStore::new(StoreConfig {
            url_prefix: normalize_url_prefix("https://cdn.example.com/hls"),
            ..StoreConfig::default()
        });
        let key = crate::domain::ChannelKey::new("gma7").unwrap();
        assert_eq!(
            store.playlist_address(&key),
            "https://cdn.example.com/hls/gma7.m3u8"
        );
        // Served locally under the default mount.
        assert_eq!(
            crate::api::routes::streams_mount(store.url_prefix()),
            crate::api::routes::DEFAULT_STREAMS_PATH
        );
    }

    #[test]
    fn test_env_parse_falls_back_on_missing() {
        assert_eq!(env_parse("RUST_RESTREAM_TEST_UNSET_VAR", 7u32), 7);
        assert!(env_bool("RUST_RESTREAM_TEST_UNSET_VAR", true));
    }
}
