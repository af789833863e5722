//! Playlist window inspection.

use std::collections::BTreeSet;
use std::path::Path;

use m3u8_rs::Playlist;
use serde::Serialize;

use super::StoreError;

/// A segment advertised by the playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentEntry {
    pub sequence: u64,
    pub file_name: String,
    pub duration: f32,
}

/// The published window of a channel compared with the files on disk.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    /// `EXT-X-MEDIA-SEQUENCE` of the playlist.
    pub media_sequence: u64,
    pub window: Vec<SegmentEntry>,
    /// Segment files on disk, sorted.
    pub present: Vec<String>,
    /// Referenced by the playlist but missing on disk.
    pub dangling: Vec<String>,
    /// On disk but no longer referenced.
    pub retained: Vec<String>,
}

impl WindowReport {
    pub(super) fn from_playlist(
        path: &Path,
        bytes: &[u8],
        present: Vec<String>,
    ) -> Result<Self, StoreError> {
        let playlist = match m3u8_rs::parse_playlist_res(bytes) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(StoreError::InvalidPlaylist {
                    path: path.to_path_buf(),
                    reason: "expected a media playlist".to_string(),
                });
            }
            Err(e) => {
                return Err(StoreError::InvalidPlaylist {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let window: Vec<SegmentEntry> = playlist
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| SegmentEntry {
                sequence: playlist.media_sequence + i as u64,
                // Playlists reference segments relative to their own directory.
                file_name: segment
                    .uri
                    .rsplit('/')
                    .next()
                    .unwrap_or(segment.uri.as_str())
                    .to_string(),
                duration: segment.duration,
            })
            .collect();

        let on_disk: BTreeSet<&str> = present.iter().map(String::as_str).collect();
        let referenced: BTreeSet<&str> = window.iter().map(|s| s.file_name.as_str()).collect();

        let dangling = referenced
            .difference(&on_disk)
            .map(|s| s.to_string())
            .collect();
        let retained = on_disk
            .difference(&referenced)
            .map(|s| s.to_string())
            .collect();

        Ok(Self {
            media_sequence: playlist.media_sequence,
            window,
            present,
            dangling,
            retained,
        })
    }

    /// Every referenced segment exists on disk.
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty()
    }

    /// The store holds no more than `window_size + grace` segments.
    pub fn within_retention(&self, window_size: u32, grace: u32) -> bool {
        self.present.len() <= (window_size + grace) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:10\n\
#EXT-X-MEDIA-SEQUENCE:41\n\
#EXTINF:10.000000,\n\
gma7_0000000041.ts\n\
#EXTINF:10.000000,\n\
gma7_0000000042.ts\n\
#EXTINF:9.500000,\n\
gma7_0000000043.ts\n";

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_consistent_window_with_grace() {
        let present = names(&[
            "gma7_0000000039.ts",
            "gma7_0000000040.ts",
            "gma7_0000000041.ts",
            "gma7_0000000042.ts",
            "gma7_0000000043.ts",
        ]);
        let report =
            WindowReport::from_playlist(Path::new("gma7.m3u8"), PLAYLIST.as_bytes(), present)
                .unwrap();

        assert_eq!(report.media_sequence, 41);
        assert_eq!(report.window.len(), 3);
        assert_eq!(report.window[2].sequence, 43);
        assert_eq!(report.window[2].file_name, "gma7_0000000043.ts");
        assert!(report.is_consistent());
        assert_eq!(report.retained, names(&["gma7_0000000039.ts", "gma7_0000000040.ts"]));
        assert!(report.within_retention(3, 2));
        assert!(!report.within_retention(3, 1));
    }

    #[test]
    fn test_dangling_reference_detected() {
        let present = names(&["gma7_0000000042.ts", "gma7_0000000043.ts"]);
        let report =
            WindowReport::from_playlist(Path::new("gma7.m3u8"), PLAYLIST.as_bytes(), present)
                .unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.dangling, names(&["gma7_0000000041.ts"]));
    }

    #[test]
    fn test_garbage_playlist_rejected() {
        let err = WindowReport::from_playlist(Path::new("x.m3u8"), b"not a playlist", vec![])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPlaylist { .. }));
    }
}
