//! Transcoder process supervisor.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use process_utils::ExitKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    ProcessEvent, ProcessEventKind, ProcessExit, STDERR_TAIL_LINES, SupervisorError, build_args,
};
use crate::config::TranscoderConfig;
use crate::domain::ChannelKey;
use crate::resolver::Locator;
use crate::store::SegmentStore;

/// Interval between playlist checks while a process starts.
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Capacity of the process event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type ExitReceiver = watch::Receiver<Option<ProcessExit>>;

/// Handle to one launched transcoder process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub id: u64,
    pub channel: ChannelKey,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
    exit_rx: ExitReceiver,
}

impl ProcessHandle {
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// The exit, if the process has ended.
    pub fn try_exit(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    /// Wait until the process has exited and been reaped.
    pub async fn wait_exit(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or_else(lost_exit),
            // The waiter task is gone without publishing.
            Err(_) => lost_exit(),
        }
    }
}

fn lost_exit() -> ProcessExit {
    ProcessExit {
        kind: ExitKind::Terminated,
        requested: false,
        stderr_tail: String::new(),
        at: Utc::now(),
    }
}

/// Registry entry of the live process of a channel.
#[derive(Clone)]
struct RunningProcess {
    id: u64,
    cancel: CancellationToken,
    exit_rx: ExitReceiver,
}

impl RunningProcess {
    /// Request a stop and wait until the process is reaped.
    async fn terminate(&self) {
        self.cancel.cancel();
        let mut rx = self.exit_rx.clone();
        let _ = rx.wait_for(Option::is_some).await;
    }
}

/// Owns every transcoder process, at most one per channel.
pub struct TranscodeSupervisor {
    config: TranscoderConfig,
    store: SegmentStore,
    processes: Arc<DashMap<ChannelKey, RunningProcess>>,
    /// Serializes start/stop per channel.
    locks: DashMap<ChannelKey, Arc<tokio::sync::Mutex<()>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ProcessEvent>,
    shutting_down: CancellationToken,
}

/// Per-channel start/stop lock. The map entry goes away with the last holder.
struct KeyGuard<'a> {
    locks: &'a DashMap<ChannelKey, Arc<tokio::sync::Mutex<()>>>,
    key: ChannelKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so the count only reaches one when idle.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl TranscodeSupervisor {
    pub fn new(config: TranscoderConfig, store: SegmentStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            store,
            processes: Arc::new(DashMap::new()),
            locks: DashMap::new(),
            next_id: AtomicU64::new(1),
            events,
            shutting_down: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Subscribe to process lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    async fn lock_key(&self, key: &ChannelKey) -> KeyGuard<'_> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        KeyGuard {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Launch a transcoder for `key`, replacing any live one.
    ///
    /// The previous process is stopped and reaped before the new one is
    /// spawned. Returns once the new process has written its first playlist.
    /// If the returned future is dropped during that wait, the process keeps
    /// running and stays registered, so `stop_channel` still reaches it.
    pub async fn start(
        &self,
        key: &ChannelKey,
        locator: &Locator,
    ) -> Result<ProcessHandle, SupervisorError> {
        let _guard = self.lock_key(key).await;

        if self.shutting_down.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }

        if let Some(previous) = self.running(key) {
            debug!(channel = %key, process_id = previous.id, "Stopping previous transcoder before start");
            previous.terminate().await;
        }

        // No writer is alive; a leftover playlist would fake liveness.
        self.store.clear_output(key).await?;

        let handle = self.spawn(key, locator)?;
        self.wait_for_playlist(key, &handle).await?;

        info!(channel = %key, pid = ?handle.pid, process_id = handle.id, "Transcoder streaming");
        Ok(handle)
    }

    fn running(&self, key: &ChannelKey) -> Option<RunningProcess> {
        self.processes.get(key).map(|entry| entry.value().clone())
    }

    fn spawn(&self, key: &ChannelKey, locator: &Locator) -> Result<ProcessHandle, SupervisorError> {
        let args = build_args(
            &self.config,
            &locator.url,
            &self.store.playlist_path(key),
            &self.store.segment_pattern(key),
        );

        let mut command = process_utils::tokio_command(&self.config.binary_path);
        command
            .args(&args)
            .current_dir(self.store.channel_dir(key))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            binary: self.config.binary_path.clone(),
            source,
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_reader(key.clone(), stderr, tail.clone());
        }

        self.processes.insert(
            key.clone(),
            RunningProcess {
                id,
                cancel: cancel.clone(),
                exit_rx: exit_rx.clone(),
            },
        );

        let _ = self.events.send(ProcessEvent {
            channel: key.clone(),
            process_id: id,
            pid,
            kind: ProcessEventKind::Started,
            at: Utc::now(),
        });
        debug!(channel = %key, pid = ?pid, process_id = id, "Transcoder spawned");

        let processes = self.processes.clone();
        let events = self.events.clone();
        let stop_timeout = self.config.stop_timeout;
        let waiter_cancel = cancel.clone();
        let channel = key.clone();

        tokio::spawn(async move {
            let (status, requested) = tokio::select! {
                _ = waiter_cancel.cancelled() => {
                    (process_utils::shutdown_child(&mut child, stop_timeout).await, true)
                }
                status = child.wait() => (status, false),
            };

            let kind = match status {
                Ok(status) => ExitKind::from(status),
                Err(e) => {
                    warn!(channel = %channel, process_id = id, error = %e, "Error waiting for transcoder");
                    ExitKind::Terminated
                }
            };
            let stderr_tail = tail.lock().iter().cloned().collect::<Vec<_>>().join(" | ");
            let exit = ProcessExit {
                kind,
                requested,
                stderr_tail,
                at: Utc::now(),
            };

            if requested {
                debug!(channel = %channel, process_id = id, exit = %kind, "Transcoder stopped");
            } else {
                warn!(channel = %channel, process_id = id, exit = %exit.describe(), "Transcoder exited");
            }

            // Deregister before publishing, so waiters observe a clean registry.
            processes.remove_if(&channel, |_, running| running.id == id);
            let _ = events.send(ProcessEvent {
                channel,
                process_id: id,
                pid,
                kind: exit.event_kind(),
                at: exit.at,
            });
            exit_tx.send_replace(Some(exit));
        });

        Ok(ProcessHandle {
            id,
            channel: key.clone(),
            pid,
            started_at: Utc::now(),
            cancel,
            exit_rx,
        })
    }

    async fn wait_for_playlist(
        &self,
        key: &ChannelKey,
        handle: &ProcessHandle,
    ) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + self.config.start_timeout;
        let mut exit_rx = handle.exit_rx.clone();

        loop {
            if let Some(exit) = handle.try_exit() {
                return Err(SupervisorError::ExitedDuringStart {
                    exit: exit.kind,
                    stderr_tail: exit.stderr_tail,
                });
            }

            if self.store.playlist_exists(key).await {
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(channel = %key, process_id = handle.id, "Transcoder start timed out");
                self.stop(handle).await;
                return Err(SupervisorError::StartTimeout {
                    timeout: self.config.start_timeout,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(LIVENESS_POLL_INTERVAL) => {}
                changed = exit_rx.changed() => {
                    if changed.is_err() {
                        let exit = lost_exit();
                        return Err(SupervisorError::ExitedDuringStart {
                            exit: exit.kind,
                            stderr_tail: exit.stderr_tail,
                        });
                    }
                }
            }
        }
    }

    /// Stop the process behind `handle` and wait until it is reaped.
    ///
    /// Returns the exit, or `None` if it had already exited on its own.
    pub async fn stop(&self, handle: &ProcessHandle) -> Option<ProcessExit> {
        if !handle.is_alive() {
            return None;
        }
        handle.cancel.cancel();
        Some(handle.wait_exit().await)
    }

    /// Stop whatever process is live for `key`. Returns whether one was.
    pub async fn stop_channel(&self, key: &ChannelKey) -> bool {
        let _guard = self.lock_key(key).await;

        match self.running(key) {
            Some(running) => {
                running.terminate().await;
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, handle: &ProcessHandle) -> bool {
        handle.is_alive()
    }

    /// Whether any live process is registered for `key`.
    pub fn is_running(&self, key: &ChannelKey) -> bool {
        self.processes.contains_key(key)
    }

    /// Number of live processes.
    pub fn running_count(&self) -> usize {
        self.processes.len()
    }

    /// Stop every process and refuse new starts.
    pub async fn shutdown(&self) {
        self.shutting_down.cancel();

        let running: Vec<RunningProcess> =
            self.processes.iter().map(|e| e.value().clone()).collect();
        if !running.is_empty() {
            info!(count = running.len(), "Stopping all transcoders");
        }
        for process in &running {
            process.cancel.cancel();
        }
        for process in running {
            process.terminate().await;
        }
    }
}

/// Log stderr line by line and keep the last lines for error reports.
fn spawn_stderr_reader(
    channel: ChannelKey,
    stderr: ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    trace!(channel = %channel, "transcoder: {}", line);
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(channel = %channel, error = %e, "Error reading transcoder stderr");
                    break;
                }
            }
        }
    });
}
