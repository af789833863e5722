//! Channel pipeline manager.
//!
//! Maps each channel key to at most one pipeline actor. Requests are
//! validated and queued without waiting on any pipeline work; all state
//! transitions of a channel happen inside its actor, so transitions of one
//! channel are strictly sequential while channels run independently.

mod actor;
mod lease;
mod retry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::database::ChannelRecordRepository;
use crate::domain::{ChannelKey, ChannelStatus, PipelineFailure, PipelineState, SourceReference};
use crate::resolver::LocatorResolver;
use crate::transcoder::TranscodeSupervisor;
use crate::{Error, Result};

use actor::{ChannelActor, ChannelCommand, ChannelContext};
use lease::LeaseChain;

pub use retry::RetryConfig;

/// Capacity of the channel event stream.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Answer to a conversion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConversionResponse {
    /// Queued; the playlist will appear at `playlist`.
    Accepted { playlist: String },
    Rejected { reason: String },
}

impl ConversionResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// A channel state change.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelEvent {
    pub channel: ChannelKey,
    pub state: PipelineState,
    pub failure: Option<PipelineFailure>,
    pub at: DateTime<Utc>,
}

/// Registry entry of a channel.
struct ChannelSlot {
    mailbox: mpsc::Sender<ChannelCommand>,
    status: Arc<RwLock<ChannelStatus>>,
    removed: CancellationToken,
    task: JoinHandle<Result<()>>,
}

/// Owns every channel pipeline.
pub struct ChannelManager {
    ctx: Arc<ChannelContext>,
    channels: DashMap<ChannelKey, ChannelSlot>,
    /// Held by a channel's actor for its whole life, so a successor waits
    /// for its predecessor's teardown.
    leases: LeaseChain,
    shutdown: CancellationToken,
}

impl ChannelManager {
    pub fn new(
        supervisor: Arc<TranscodeSupervisor>,
        resolver: Arc<dyn LocatorResolver>,
        records: Arc<dyn ChannelRecordRepository>,
        retry: RetryConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ctx: Arc::new(ChannelContext {
                supervisor,
                resolver,
                records,
                retry,
                pipeline,
                events,
            }),
            channels: DashMap::new(),
            leases: LeaseChain::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn supervisor(&self) -> &Arc<TranscodeSupervisor> {
        &self.ctx.supervisor
    }

    /// Deterministic playlist address of a channel.
    pub fn playlist_address(&self, key: &ChannelKey) -> String {
        self.ctx.supervisor.store().playlist_address(key)
    }

    /// Request conversion of `source` into the channel named `channel`.
    ///
    /// Never waits on resolution or transcoding. A request for a channel
    /// that is already converting is a refresh: the running process is
    /// replaced with one fed by a fresh locator.
    pub fn request_conversion(&self, channel: &str, source: &str) -> ConversionResponse {
        let key = match ChannelKey::new(channel) {
            Ok(key) => key,
            Err(e) => return ConversionResponse::rejected(e.to_string()),
        };
        let source = match SourceReference::new(source) {
            Ok(source) => source,
            Err(e) => return ConversionResponse::rejected(e.to_string()),
        };
        if self.shutdown.is_cancelled() {
            return ConversionResponse::rejected("shutting down");
        }

        let playlist = self.playlist_address(&key);
        let mailbox = match self.channels.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().mailbox.is_closed() {
                    // The actor is gone without a removal; replace it.
                    warn!(channel = %key, "Channel actor exited unexpectedly, respawning");
                    entry.insert(self.spawn_actor(&key, &source, &playlist));
                }
                entry.get().mailbox.clone()
            }
            Entry::Vacant(entry) => {
                let slot = self.spawn_actor(&key, &source, &playlist);
                let mailbox = slot.mailbox.clone();
                entry.insert(slot);
                info!(channel = %key, playlist = %playlist, "Channel registered");
                mailbox
            }
        };

        match mailbox.try_send(ChannelCommand::Convert { source }) {
            Ok(()) => {
                debug!(channel = %key, "Conversion queued");
                ConversionResponse::Accepted { playlist }
            }
            Err(mpsc::error::TrySendError::Full(_)) => ConversionResponse::rejected("channel busy"),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                ConversionResponse::rejected("channel is shutting down")
            }
        }
    }

    fn spawn_actor(
        &self,
        key: &ChannelKey,
        source: &SourceReference,
        playlist: &str,
    ) -> ChannelSlot {
        let (tx, rx) = mpsc::channel(self.ctx.pipeline.mailbox_capacity.max(1));
        let status = Arc::new(RwLock::new(ChannelStatus::new(
            key.clone(),
            source.clone(),
            playlist.to_string(),
        )));
        let removed = CancellationToken::new();
        // Queued here, before the task exists, so owners follow spawn order.
        let lease = self.leases.enqueue(key);

        let actor = ChannelActor::new(
            key.clone(),
            source.clone(),
            status.clone(),
            rx,
            removed.clone(),
            self.shutdown.clone(),
            self.ctx.clone(),
        );

        let task = tokio::spawn(async move {
            let _lease = lease.acquire().await;
            actor.run().await
        });

        ChannelSlot {
            mailbox: tx,
            status,
            removed,
            task,
        }
    }

    /// Snapshot of a channel, or `None` if it is not registered.
    pub fn status(&self, channel: &str) -> Option<ChannelStatus> {
        let key = ChannelKey::new(channel).ok()?;
        self.channels
            .get(&key)
            .map(|slot| slot.status.read().clone())
    }

    /// Snapshots of every registered channel, ordered by key.
    pub fn list(&self) -> Vec<ChannelStatus> {
        let mut channels: Vec<ChannelStatus> = self
            .channels
            .iter()
            .map(|slot| slot.status.read().clone())
            .collect();
        channels.sort_by(|a, b| a.key.cmp(&b.key));
        channels
    }

    /// Subscribe to channel state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.ctx.events.subscribe()
    }

    /// Remove a channel: stop its process, delete its output and its record.
    ///
    /// Returns once teardown is complete. Returns whether the channel was
    /// registered; output and record left by an earlier run are deleted
    /// either way.
    pub async fn remove(&self, channel: &str) -> Result<bool> {
        let key = ChannelKey::new(channel)?;

        let Some((_, slot)) = self.channels.remove(&key) else {
            self.remove_unregistered(&key).await?;
            return Ok(false);
        };

        slot.removed.cancel();
        match slot.task.await {
            Ok(teardown) => teardown?,
            Err(e) => {
                error!(channel = %key, error = %e, "Channel actor panicked during removal");
                // Finish the teardown the actor could not.
                self.ctx.supervisor.stop_channel(&key).await;
                self.remove_unregistered(&key).await?;
            }
        }
        Ok(true)
    }

    async fn remove_unregistered(&self, key: &ChannelKey) -> Result<()> {
        let _lease = self.leases.enqueue(key).acquire().await;

        self.ctx
            .supervisor
            .store()
            .remove_channel(key)
            .await
            .map_err(Error::from)?;
        self.ctx.records.delete(key.as_str()).await?;
        Ok(())
    }

    /// Stop every channel and every process. Records stay in place.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let keys: Vec<ChannelKey> = self.channels.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((key, slot)) = self.channels.remove(&key) {
                tasks.push((key, slot.task));
            }
        }

        if !tasks.is_empty() {
            info!(count = tasks.len(), "Stopping channels");
        }
        for (key, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(channel = %key, error = %e, "Channel teardown failed"),
                Err(e) => error!(channel = %key, error = %e, "Channel actor panicked during shutdown"),
            }
        }

        self.ctx.supervisor.shutdown().await;
        info!("Channel manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, TranscoderConfig};
    use crate::database::InMemoryChannelRecordRepository;
    use crate::resolver::PassthroughResolver;
    use crate::store::SegmentStore;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> ChannelManager {
        let store = SegmentStore::new(StoreConfig {
            root: temp.path().to_path_buf(),
            url_prefix: "/streams".to_string(),
        });
        let supervisor = Arc::new(TranscodeSupervisor::new(
            TranscoderConfig {
                binary_path: "/nonexistent/ffmpeg".to_string(),
                ..TranscoderConfig::default()
            },
            store,
        ));
        ChannelManager::new(
            supervisor,
            Arc::new(PassthroughResolver),
            Arc::new(InMemoryChannelRecordRepository::new()),
            RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_rejects_malformed_requests() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        assert!(!manager.request_conversion("", "https://example/live1").is_accepted());
        assert!(!manager.request_conversion("a/b", "https://example/live1").is_accepted());
        assert!(!manager.request_conversion("gma7", "  ").is_accepted());
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_accepts_with_deterministic_address() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        let response = manager.request_conversion("GMA7", "https://example/live1");
        assert_eq!(
            response,
            ConversionResponse::Accepted {
                playlist: "/streams/gma7.m3u8".to_string()
            }
        );
        let status = manager.status("gma7").unwrap();
        assert_eq!(status.key.as_str(), "gma7");
        assert_eq!(status.playlist, "/streams/gma7.m3u8");
        assert!(manager.status("unknown").is_none());

        manager.shutdown().await;
        assert!(
            !manager
                .request_conversion("gma7", "https://example/live1")
                .is_accepted()
        );
    }

    #[tokio::test]
    async fn test_remove_clears_registration() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.request_conversion("gma7", "https://example/live1");
        assert!(manager.remove("gma7").await.unwrap());
        assert!(manager.status("gma7").is_none());
        assert!(!temp.path().join("gma7").exists());

        assert!(!manager.remove("gma7").await.unwrap());
        assert!(manager.remove("a/b").await.is_err());
        assert_eq!(manager.leases.len(), 0);
    }

    #[tokio::test]
    async fn test_remove_reports_undeletable_output() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        // The transcoder binary does not exist, so the channel fails for good.
        manager.request_conversion("gma7", "https://example/live1");
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while manager.status("gma7").map(|s| s.state) != Some(PipelineState::Failed) {
            assert!(tokio::time::Instant::now() < deadline, "channel never failed");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        // A regular file where the channel directory should be cannot be
        // removed as a directory.
        let dir = temp.path().join("gma7");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::write(&dir, b"not a directory").unwrap();

        assert!(manager.remove("gma7").await.is_err());
        assert!(manager.status("gma7").is_none());

        std::fs::remove_file(&dir).unwrap();
        assert!(!manager.remove("gma7").await.unwrap());
    }
}
