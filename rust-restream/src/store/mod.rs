//! Segment store: the per-channel output area on disk.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<key>/<key>.m3u8          rolling playlist
//! <root>/<key>/<key>_0000000042.ts media segments
//! ```
//!
//! The transcoder is the only writer of a channel directory and evicts its
//! own segments. The store creates directories, probes writability,
//! inspects the current window and deletes a channel's subtree on removal.

mod window;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::domain::ChannelKey;

pub use window::{SegmentEntry, WindowReport};

/// Extension of media segment files.
pub const SEGMENT_EXTENSION: &str = "ts";

/// Extension of playlist files.
pub const PLAYLIST_EXTENSION: &str = "m3u8";

/// Zero padding of segment sequence numbers.
const SEQUENCE_DIGITS: usize = 10;

/// Segment store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("channel directory {} is not writable: {source}", .path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no playlist at {}", .path.display())]
    PlaylistMissing { path: PathBuf },

    #[error("invalid playlist {}: {reason}", .path.display())]
    InvalidPlaylist { path: PathBuf, reason: String },
}

impl StoreError {
    fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A file addressable under the public streams path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFile {
    Playlist(ChannelKey),
    Segment(ChannelKey, u64),
}

impl StoreFile {
    /// Parse a public file name (`gma7.m3u8`, `gma7_0000000042.ts`).
    pub fn parse(file_name: &str) -> Option<Self> {
        if let Some(stem) = file_name.strip_suffix(".m3u8") {
            let key = ChannelKey::new(stem).ok()?;
            // Only the canonical spelling maps to a file.
            return (key.as_str() == stem).then_some(Self::Playlist(key));
        }

        let stem = file_name.strip_suffix(".ts")?;
        let (key, sequence) = stem.rsplit_once('_')?;
        if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let parsed = ChannelKey::new(key).ok()?;
        if parsed.as_str() != key {
            return None;
        }
        Some(Self::Segment(parsed, sequence.parse().ok()?))
    }

    pub fn channel(&self) -> &ChannelKey {
        match self {
            Self::Playlist(key) | Self::Segment(key, _) => key,
        }
    }
}

/// Path and naming authority for channel output.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    config: StoreConfig,
}

impl SegmentStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.config.url_prefix
    }

    /// Directory holding a channel's playlist and segments.
    pub fn channel_dir(&self, key: &ChannelKey) -> PathBuf {
        self.config.root.join(key.as_str())
    }

    pub fn playlist_file_name(key: &ChannelKey) -> String {
        format!("{}.{}", key, PLAYLIST_EXTENSION)
    }

    pub fn playlist_path(&self, key: &ChannelKey) -> PathBuf {
        self.channel_dir(key).join(Self::playlist_file_name(key))
    }

    /// Segment filename template in the transcoder's printf syntax.
    pub fn segment_pattern(&self, key: &ChannelKey) -> PathBuf {
        self.channel_dir(key).join(format!(
            "{}_%0{}d.{}",
            key, SEQUENCE_DIGITS, SEGMENT_EXTENSION
        ))
    }

    pub fn segment_file_name(key: &ChannelKey, sequence: u64) -> String {
        format!(
            "{}_{:0width$}.{}",
            key,
            sequence,
            SEGMENT_EXTENSION,
            width = SEQUENCE_DIGITS
        )
    }

    /// Public address of a channel's playlist. Deterministic, valid before the file exists.
    pub fn playlist_address(&self, key: &ChannelKey) -> String {
        format!(
            "{}/{}",
            self.config.url_prefix.trim_end_matches('/'),
            Self::playlist_file_name(key)
        )
    }

    /// Filesystem path of a public store file.
    pub fn file_path(&self, file: &StoreFile) -> PathBuf {
        match file {
            StoreFile::Playlist(key) => self.playlist_path(key),
            StoreFile::Segment(key, sequence) => self
                .channel_dir(key)
                .join(Self::segment_file_name(key, *sequence)),
        }
    }

    /// Create the channel directory and verify it accepts writes.
    pub async fn prepare(&self, key: &ChannelKey) -> Result<PathBuf, StoreError> {
        let dir = self.channel_dir(key);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Unwritable {
                path: dir.clone(),
                source,
            })?;

        let probe_dir = dir.clone();
        // The probe file is removed when dropped.
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".probe")
                .tempfile_in(&probe_dir)
                .map(drop)
        })
        .await
        .map_err(|e| StoreError::io("probing", &dir, std::io::Error::other(e)))?
        .map_err(|source| StoreError::Unwritable {
            path: dir.clone(),
            source,
        })?;

        debug!(channel = %key, path = %dir.display(), "Channel directory ready");
        Ok(dir)
    }

    /// Delete a channel's entire subtree. Returns whether anything was removed.
    pub async fn remove_channel(&self, key: &ChannelKey) -> Result<bool, StoreError> {
        let dir = self.channel_dir(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(channel = %key, path = %dir.display(), "Removed channel output");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io("removing", &dir, e)),
        }
    }

    /// Delete a previous run's playlist and segments, keeping the directory.
    ///
    /// Only valid while no process writes to the channel. Returns the number
    /// of removed files.
    pub async fn clear_output(&self, key: &ChannelKey) -> Result<usize, StoreError> {
        let dir = self.channel_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io("listing", &dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("listing", &dir, e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io("removing", &path, e)),
            }
        }

        if removed > 0 {
            debug!(channel = %key, removed, "Cleared previous output");
        }
        Ok(removed)
    }

    /// Whether the transcoder has published a playlist yet.
    pub async fn playlist_exists(&self, key: &ChannelKey) -> bool {
        tokio::fs::metadata(self.playlist_path(key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Segment files currently on disk for a channel, sorted by name.
    pub async fn segment_files(&self, key: &ChannelKey) -> Result<Vec<String>, StoreError> {
        let dir = self.channel_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("listing", &dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("listing", &dir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if matches!(StoreFile::parse(&name), Some(StoreFile::Segment(ref k, _)) if k == key) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Compare the published window with the files present.
    pub async fn inspect(&self, key: &ChannelKey) -> Result<WindowReport, StoreError> {
        let path = self.playlist_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::PlaylistMissing { path });
            }
            Err(e) => return Err(StoreError::io("reading", &path, e)),
        };

        let present = self.segment_files(key).await?;
        WindowReport::from_playlist(&path, &bytes, present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(root: &Path) -> SegmentStore {
        SegmentStore::new(StoreConfig {
            root: root.to_path_buf(),
            url_prefix: "/streams".to_string(),
        })
    }

    fn key(s: &str) -> ChannelKey {
        ChannelKey::new(s).unwrap()
    }

    #[test]
    fn test_layout_and_naming() {
        let store = store(Path::new("/data/streams"));
        let k = key("gma7");
        assert_eq!(store.channel_dir(&k), PathBuf::from("/data/streams/gma7"));
        assert_eq!(
            store.playlist_path(&k),
            PathBuf::from("/data/streams/gma7/gma7.m3u8")
        );
        assert_eq!(
            store.segment_pattern(&k),
            PathBuf::from("/data/streams/gma7/gma7_%010d.ts")
        );
        assert_eq!(SegmentStore::segment_file_name(&k, 42), "gma7_0000000042.ts");
        assert_eq!(store.playlist_address(&k), "/streams/gma7.m3u8");
    }

    #[test]
    fn test_store_file_parse() {
        assert_eq!(
            StoreFile::parse("gma7.m3u8"),
            Some(StoreFile::Playlist(key("gma7")))
        );
        assert_eq!(
            StoreFile::parse("news-live_0000000042.ts"),
            Some(StoreFile::Segment(key("news-live"), 42))
        );
        assert_eq!(StoreFile::parse("GMA7.m3u8"), None);
        assert_eq!(StoreFile::parse("gma7_.ts"), None);
        assert_eq!(StoreFile::parse("gma7_12a.ts"), None);
        assert_eq!(StoreFile::parse("../gma7.m3u8"), None);
        assert_eq!(StoreFile::parse("gma7.mp4"), None);
        assert_eq!(StoreFile::parse("gma7_0000000001.ts.tmp"), None);
    }

    #[tokio::test]
    async fn test_prepare_and_remove() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        let k = key("gma7");

        let dir = store.prepare(&k).await.unwrap();
        assert!(dir.is_dir());
        // the probe leaves nothing behind
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        std::fs::write(dir.join("gma7_0000000001.ts"), b"x").unwrap();
        assert!(store.remove_channel(&k).await.unwrap());
        assert!(!dir.exists());
        assert!(!store.remove_channel(&k).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prepare_unwritable_root() {
        let temp = TempDir::new().unwrap();
        // A regular file where the root directory should be.
        let root = temp.path().join("not-a-dir");
        std::fs::write(&root, b"").unwrap();
        let store = store(&root);

        let err = store.prepare(&key("gma7")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unwritable { .. }));
    }

    #[tokio::test]
    async fn test_segment_files_filters_foreign_names() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        let k = key("gma7");
        let dir = store.prepare(&k).await.unwrap();

        for name in [
            "gma7_0000000002.ts",
            "gma7_0000000001.ts",
            "gma7_0000000003.ts.tmp",
            "gma7.m3u8",
            "other_0000000001.ts",
        ] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let files = store.segment_files(&k).await.unwrap();
        assert_eq!(files, vec!["gma7_0000000001.ts", "gma7_0000000002.ts"]);
        assert!(store.playlist_exists(&k).await);
    }

    #[tokio::test]
    async fn test_clear_output_keeps_directory() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        let k = key("gma7");
        let dir = store.prepare(&k).await.unwrap();
        std::fs::write(dir.join("gma7.m3u8"), b"#EXTM3U\n").unwrap();
        std::fs::write(dir.join("gma7_0000000001.ts"), b"x").unwrap();

        assert_eq!(store.clear_output(&k).await.unwrap(), 2);
        assert!(dir.is_dir());
        assert!(!store.playlist_exists(&k).await);
        assert_eq!(store.clear_output(&key("absent")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inspect_missing_playlist() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        let err = store.inspect(&key("gma7")).await.unwrap_err();
        assert!(matches!(err, StoreError::PlaylistMissing { .. }));
    }
}
