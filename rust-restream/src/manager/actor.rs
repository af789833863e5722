//! Per-channel pipeline actor.
//!
//! Each channel is driven by one task that owns its pipeline exclusively.
//! Conversion requests arrive through the mailbox; removal and shutdown
//! arrive through cancellation tokens. Every wait of the pipeline (resolver
//! call, start confirmation, streaming, backoff) is raced against those
//! inputs, so a request or removal always interrupts it.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ChannelEvent, RetryConfig};
use crate::config::PipelineConfig;
use crate::database::{ChannelRecord, ChannelRecordRepository};
use crate::domain::{
    ChannelKey, ChannelStatus, FailureKind, PipelineFailure, PipelineState, SourceReference,
};
use crate::resolver::LocatorResolver;
use crate::transcoder::{SupervisorError, TranscodeSupervisor};
use crate::Result;

/// Messages accepted by a channel actor.
#[derive(Debug)]
pub(crate) enum ChannelCommand {
    /// (Re)convert from the given source with a fresh locator.
    Convert { source: SourceReference },
}

/// Collaborators shared by all channel actors.
pub(crate) struct ChannelContext {
    pub supervisor: Arc<TranscodeSupervisor>,
    pub resolver: Arc<dyn LocatorResolver>,
    pub records: Arc<dyn ChannelRecordRepository>,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub events: broadcast::Sender<ChannelEvent>,
}

/// Outcome of a wait raced against the actor's inputs.
enum Step<T> {
    Done(T),
    Command(ChannelCommand),
    Remove,
    Shutdown,
}

/// Why a pipeline run ended.
enum DriveExit {
    /// Failed; waiting for a new request.
    Settled,
    Remove,
    Shutdown,
}

/// Race `fut` against removal, shutdown and the mailbox.
async fn until_command<F: Future>(
    mailbox: &mut mpsc::Receiver<ChannelCommand>,
    removed: &CancellationToken,
    shutdown: &CancellationToken,
    fut: F,
) -> Step<F::Output> {
    tokio::pin!(fut);
    tokio::select! {
        biased;
        _ = removed.cancelled() => Step::Remove,
        _ = shutdown.cancelled() => Step::Shutdown,
        cmd = mailbox.recv() => match cmd {
            Some(cmd) => Step::Command(cmd),
            None => Step::Shutdown,
        },
        out = &mut fut => Step::Done(out),
    }
}

pub(crate) struct ChannelActor {
    key: ChannelKey,
    source: SourceReference,
    status: Arc<RwLock<ChannelStatus>>,
    mailbox: mpsc::Receiver<ChannelCommand>,
    removed: CancellationToken,
    shutdown: CancellationToken,
    ctx: Arc<ChannelContext>,
    consecutive_failures: u32,
}

impl ChannelActor {
    pub fn new(
        key: ChannelKey,
        source: SourceReference,
        status: Arc<RwLock<ChannelStatus>>,
        mailbox: mpsc::Receiver<ChannelCommand>,
        removed: CancellationToken,
        shutdown: CancellationToken,
        ctx: Arc<ChannelContext>,
    ) -> Self {
        Self {
            key,
            source,
            status,
            mailbox,
            removed,
            shutdown,
            ctx,
            consecutive_failures: 0,
        }
    }

    /// Runs until removal or shutdown. Errors are teardown failures.
    pub async fn run(mut self) -> Result<()> {
        debug!(channel = %self.key, "Channel actor started");

        let exit = loop {
            let step = until_command(
                &mut self.mailbox,
                &self.removed,
                &self.shutdown,
                std::future::pending::<()>(),
            )
            .await;

            match step {
                Step::Command(ChannelCommand::Convert { source }) => {
                    self.accept(source);
                    match self.drive().await {
                        DriveExit::Settled => continue,
                        other => break other,
                    }
                }
                Step::Remove => break DriveExit::Remove,
                Step::Shutdown | Step::Done(()) => break DriveExit::Shutdown,
            }
        };

        let teardown = match exit {
            DriveExit::Remove => self.teardown_removed().await,
            _ => {
                self.teardown_shutdown().await;
                Ok(())
            }
        };

        debug!(channel = %self.key, "Channel actor stopped");
        teardown
    }

    /// Take a new request: fresh source, cleared failure history.
    fn accept(&mut self, source: SourceReference) {
        if source != self.source {
            info!(channel = %self.key, source = %source, "Channel source changed");
        }
        self.source = source.clone();
        self.consecutive_failures = 0;
        let mut status = self.status.write();
        status.source = source;
        status.consecutive_failures = 0;
        status.updated_at = Utc::now();
    }

    /// Run the pipeline until it fails permanently or is interrupted.
    async fn drive(&mut self) -> DriveExit {
        'attempt: loop {
            self.transition(PipelineState::Resolving, None);

            // Resolving
            let step = until_command(
                &mut self.mailbox,
                &self.removed,
                &self.shutdown,
                self.ctx.resolver.resolve(&self.source),
            )
            .await;
            let locator = match step {
                Step::Done(Ok(locator)) => locator,
                Step::Done(Err(e)) => {
                    let failure = PipelineFailure::new(FailureKind::ResolutionFailure, e.to_string());
                    match self.fail(failure).await {
                        Some(exit) => return exit,
                        None => continue 'attempt,
                    }
                }
                Step::Command(cmd) => {
                    self.restart(cmd).await;
                    continue 'attempt;
                }
                Step::Remove => return DriveExit::Remove,
                Step::Shutdown => return DriveExit::Shutdown,
            };

            {
                let mut status = self.status.write();
                status.resolved_at = Some(locator.resolved_at);
            }
            self.transition(PipelineState::Starting, None);

            // Store probe
            let step = until_command(
                &mut self.mailbox,
                &self.removed,
                &self.shutdown,
                self.ctx.supervisor.store().prepare(&self.key),
            )
            .await;
            match step {
                Step::Done(Ok(_)) => {}
                Step::Done(Err(e)) => {
                    let failure = PipelineFailure::new(FailureKind::StoreFailure, e.to_string());
                    match self.fail(failure).await {
                        Some(exit) => return exit,
                        None => continue 'attempt,
                    }
                }
                Step::Command(cmd) => {
                    self.restart(cmd).await;
                    continue 'attempt;
                }
                Step::Remove => return DriveExit::Remove,
                Step::Shutdown => return DriveExit::Shutdown,
            }

            // Launch and wait for the first playlist
            let step = until_command(
                &mut self.mailbox,
                &self.removed,
                &self.shutdown,
                self.ctx.supervisor.start(&self.key, &locator),
            )
            .await;
            let handle = match step {
                Step::Done(Ok(handle)) => handle,
                Step::Done(Err(SupervisorError::ShuttingDown)) => return DriveExit::Shutdown,
                Step::Done(Err(e)) => {
                    let kind = match e {
                        SupervisorError::Store(_) => FailureKind::StoreFailure,
                        _ => FailureKind::ProcessStartFailure,
                    };
                    match self.fail(PipelineFailure::new(kind, e.to_string())).await {
                        Some(exit) => return exit,
                        None => continue 'attempt,
                    }
                }
                // An interrupted start may have left a registered process.
                Step::Command(cmd) => {
                    self.restart(cmd).await;
                    continue 'attempt;
                }
                Step::Remove => return DriveExit::Remove,
                Step::Shutdown => return DriveExit::Shutdown,
            };

            let streaming_started = Instant::now();
            {
                let mut status = self.status.write();
                status.restart_count += 1;
                status.pid = handle.pid;
                status.streaming_since = Some(handle.started_at);
            }
            self.transition(PipelineState::Streaming, None);
            self.record_streaming().await;

            // Streaming
            let step = until_command(
                &mut self.mailbox,
                &self.removed,
                &self.shutdown,
                handle.wait_exit(),
            )
            .await;
            let exit = match step {
                Step::Done(exit) => exit,
                Step::Command(cmd) => {
                    self.restart(cmd).await;
                    continue 'attempt;
                }
                Step::Remove => return DriveExit::Remove,
                Step::Shutdown => return DriveExit::Shutdown,
            };

            {
                let mut status = self.status.write();
                status.pid = None;
                status.streaming_since = None;
            }

            // A process that ran long enough counts as a success.
            if streaming_started.elapsed() >= self.ctx.pipeline.healthy_after {
                self.consecutive_failures = 0;
            }

            let failure = PipelineFailure::new(
                FailureKind::ProcessCrash,
                format!("transcoder exited while streaming ({})", exit.describe()),
            );
            if let Some(exit) = self.fail(failure).await {
                return exit;
            }
        }
    }

    /// Record a failure and either back off or give up.
    ///
    /// Returns `None` when the pipeline should make another attempt.
    async fn fail(&mut self, failure: PipelineFailure) -> Option<DriveExit> {
        self.consecutive_failures += 1;
        {
            let mut status = self.status.write();
            status.consecutive_failures = self.consecutive_failures;
        }

        if !failure.is_transient() || !self.ctx.retry.should_retry(self.consecutive_failures) {
            error!(
                channel = %self.key,
                failures = self.consecutive_failures,
                error = %failure,
                "Channel failed"
            );
            self.transition(PipelineState::Failed, Some(failure.clone()));
            self.record_failed(&failure).await;
            return Some(DriveExit::Settled);
        }

        let delay = self.ctx.retry.delay_for_attempt(self.consecutive_failures);
        warn!(
            channel = %self.key,
            attempt = self.consecutive_failures,
            max_retries = self.ctx.retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Pipeline failure, retrying"
        );
        self.transition(PipelineState::Resolving, Some(failure));

        let step = until_command(
            &mut self.mailbox,
            &self.removed,
            &self.shutdown,
            tokio::time::sleep(delay),
        )
        .await;
        match step {
            Step::Done(()) => None,
            Step::Command(cmd) => {
                self.restart(cmd).await;
                None
            }
            Step::Remove => Some(DriveExit::Remove),
            Step::Shutdown => Some(DriveExit::Shutdown),
        }
    }

    /// Handle a request that arrived mid-pipeline: stop, then start over.
    async fn restart(&mut self, cmd: ChannelCommand) {
        let ChannelCommand::Convert { source } = cmd;
        info!(channel = %self.key, "Refresh requested, restarting pipeline");
        self.stop_process().await;
        self.accept(source);
    }

    async fn stop_process(&mut self) {
        self.transition(PipelineState::Stopping, None);
        if self.ctx.supervisor.stop_channel(&self.key).await {
            debug!(channel = %self.key, "Transcoder stopped");
        }
        let mut status = self.status.write();
        status.pid = None;
        status.streaming_since = None;
    }

    async fn teardown_removed(&mut self) -> Result<()> {
        self.stop_process().await;

        let output = self.ctx.supervisor.store().remove_channel(&self.key).await;
        if let Err(e) = &output {
            error!(channel = %self.key, error = %e, "Failed to remove channel output");
        }
        if let Err(e) = self.ctx.records.delete(self.key.as_str()).await {
            warn!(channel = %self.key, error = %e, "Failed to delete channel record");
        }

        self.transition(PipelineState::Idle, None);
        output?;
        info!(channel = %self.key, "Channel removed");
        Ok(())
    }

    async fn teardown_shutdown(&mut self) {
        let was_streaming = self.status.read().state == PipelineState::Streaming;
        self.stop_process().await;

        if was_streaming
            && let Err(e) = self
                .ctx
                .records
                .set_status(self.key.as_str(), PipelineState::Idle.as_str(), None)
                .await
        {
            warn!(channel = %self.key, error = %e, "Failed to update channel record");
        }

        self.transition(PipelineState::Idle, None);
    }

    fn transition(&self, next: PipelineState, failure: Option<PipelineFailure>) {
        let event = {
            let mut status = self.status.write();
            let previous = status.state;

            match previous.transition_to(next) {
                Ok(state) => status.state = state,
                Err(e) => {
                    // The actor is the only writer; keep going but make it visible.
                    error!(channel = %self.key, error = %e, "Unexpected pipeline transition");
                    status.state = next;
                }
            }
            if failure.is_some() {
                status.last_error = failure.clone();
            }
            status.updated_at = Utc::now();

            if previous == next && failure.is_none() {
                return;
            }
            debug!(channel = %self.key, from = %previous, to = %next, "Pipeline transition");

            ChannelEvent {
                channel: self.key.clone(),
                state: next,
                failure,
                at: status.updated_at,
            }
        };

        let _ = self.ctx.events.send(event);
    }

    fn playlist(&self) -> String {
        self.status.read().playlist.clone()
    }

    async fn record_streaming(&self) {
        let record = ChannelRecord::new(
            &self.key,
            &self.source,
            self.playlist(),
            PipelineState::Streaming,
        );
        if let Err(e) = self.ctx.records.upsert(&record).await {
            warn!(channel = %self.key, error = %e, "Failed to write channel record");
        }
    }

    async fn record_failed(&self, failure: &PipelineFailure) {
        let record = ChannelRecord::new(&self.key, &self.source, self.playlist(), PipelineState::Failed)
            .with_error(failure.to_string());
        if let Err(e) = self.ctx.records.upsert(&record).await {
            warn!(channel = %self.key, error = %e, "Failed to write channel record");
        }
    }
}
