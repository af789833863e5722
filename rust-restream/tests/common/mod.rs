//! Shared fixtures: shell stand-ins for the resolver and the transcoder.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_restream::config::{PipelineConfig, ResolverConfig, ResolverKind, StoreConfig, TranscoderConfig};
use rust_restream::database::InMemoryChannelRecordRepository;
use rust_restream::domain::{ChannelStatus, PipelineState};
use rust_restream::manager::{ChannelManager, RetryConfig};
use rust_restream::resolver::build_resolver;
use rust_restream::store::SegmentStore;
use rust_restream::transcoder::TranscodeSupervisor;
use tempfile::TempDir;

/// Prints a locator for any reference except ones containing `badref`.
const RESOLVER_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  *badref*) echo "ERROR: Unsupported URL: $1" >&2; exit 1 ;;
esac
echo "https://cdn.example.com/live/$(basename "$1")/index.m3u8"
"#;

/// Behaves like the HLS muxer: cuts a segment every 100ms, advertises the
/// last 3 and keeps 2 more before deleting. Exits 1 after `__LIMIT__`
/// segments when the limit is positive.
const TRANSCODER_SCRIPT: &str = r#"#!/bin/sh
limit=__LIMIT__
pattern=""
prev=""
for arg; do
  if [ "$prev" = "-hls_segment_filename" ]; then pattern="$arg"; fi
  prev="$arg"
done
playlist="$prev"
seq=1
while :; do
  if [ "$limit" -gt 0 ] && [ "$seq" -gt "$limit" ]; then
    echo "Connection reset by peer" >&2
    exit 1
  fi
  old=$((seq - 5))
  if [ "$old" -ge 1 ]; then rm -f "$(printf "$pattern" "$old")"; fi
  printf 'segment' > "$(printf "$pattern" "$seq")"
  first=$((seq - 2))
  if [ "$first" -lt 1 ]; then first=1; fi
  {
    printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:%d\n' "$first"
    i=$first
    while [ "$i" -le "$seq" ]; do
      printf '#EXTINF:0.1,\n%s\n' "$(basename "$(printf "$pattern" "$i")")"
      i=$((i + 1))
    done
  } > "$playlist.tmp"
  mv "$playlist.tmp" "$playlist"
  seq=$((seq + 1))
  sleep 0.1
done
"#;

/// Rejects its input before writing any output.
const FAILING_TRANSCODER_SCRIPT: &str = r#"#!/bin/sh
echo "Invalid data found when processing input" >&2
exit 1
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub struct Harness {
    pub temp: TempDir,
    pub manager: Arc<ChannelManager>,
    pub records: Arc<InMemoryChannelRecordRepository>,
}

impl Harness {
    pub fn root(&self) -> PathBuf {
        self.temp.path().join("streams")
    }

    pub fn supervisor(&self) -> &Arc<TranscodeSupervisor> {
        self.manager.supervisor()
    }
}

pub struct HarnessOptions {
    /// Segments written before the transcoder exits with code 1; 0 runs forever.
    pub crash_after_segments: u32,
    /// The transcoder exits with code 1 before its first playlist.
    pub fail_on_start: bool,
    pub retry: RetryConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            crash_after_segments: 0,
            fail_on_start: false,
            retry: fast_retry(3),
        }
    }
}

pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay_ms: 20,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        use_jitter: false,
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    let resolver = write_script(&bin, "resolver.sh", RESOLVER_SCRIPT);
    let transcoder_script = if options.fail_on_start {
        FAILING_TRANSCODER_SCRIPT.to_string()
    } else {
        TRANSCODER_SCRIPT.replace("__LIMIT__", &options.crash_after_segments.to_string())
    };
    let transcoder = write_script(&bin, "transcoder.sh", &transcoder_script);

    let store = SegmentStore::new(StoreConfig {
        root: temp.path().join("streams"),
        url_prefix: "/streams".to_string(),
    });
    let supervisor = Arc::new(TranscodeSupervisor::new(
        TranscoderConfig {
            binary_path: transcoder.to_string_lossy().to_string(),
            segment_duration_secs: 1,
            window_size: 3,
            grace_segments: 2,
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_millis(300),
            ..TranscoderConfig::default()
        },
        store,
    ));
    let resolver = build_resolver(&ResolverConfig {
        kind: ResolverKind::Command,
        binary_path: resolver.to_string_lossy().to_string(),
        args: vec!["{source}".to_string()],
        timeout: Duration::from_secs(5),
    });
    let records = Arc::new(InMemoryChannelRecordRepository::new());

    let manager = Arc::new(ChannelManager::new(
        supervisor,
        resolver,
        records.clone(),
        options.retry,
        PipelineConfig::default(),
    ));

    Harness {
        temp,
        manager,
        records,
    }
}

/// Poll `status(key)` until `pred` holds.
pub async fn wait_for<F>(manager: &ChannelManager, key: &str, timeout: Duration, pred: F) -> ChannelStatus
where
    F: Fn(&ChannelStatus) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = manager.status(key)
            && pred(&status)
        {
            return status;
        }
        if Instant::now() >= deadline {
            panic!(
                "timed out waiting on channel {key}: {:?}",
                manager.status(key)
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub async fn wait_for_state(
    manager: &ChannelManager,
    key: &str,
    state: PipelineState,
) -> ChannelStatus {
    wait_for(manager, key, Duration::from_secs(10), |s| s.state == state).await
}
