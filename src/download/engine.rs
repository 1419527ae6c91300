//! Download engine: the per-book download state machine.
//!
//! The engine is the only mutator of [`BookEntity`] state. Transfer tasks run
//! on tokio workers and report through an event channel; nothing touches
//! entity state until the owner context pulls an event with
//! [`next_event`](DownloadEngine::next_event) and applies it with
//! [`apply_event`](DownloadEngine::apply_event). For a single entity this
//! funnels every transition through one execution context, so transitions are
//! observed strictly in the order they were applied without any locking.
//!
//! Every transition is also published to the [`ChangeFeed`] as an `updated`
//! batch, which is how observers (list rows, detail screens) react without
//! polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::error::{EngineError, TransferError};
use super::transfer::{TOTAL_BYTES_UNKNOWN, TransferEvent, begin_transfer};
use crate::book::{BookEntity, DownloadState};
use crate::storage::{StorageConfig, StorageError};
use crate::store::{ChangeBatch, ChangeFeed};

/// Connect timeout for transfer requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout between body chunks; generous for large books.
const READ_TIMEOUT_SECS: u64 = 300;

/// Drives book entities through their download lifecycle.
///
/// State machine (per entity):
///
/// ```text
/// Fault --start_downloading--> InProgress --on_complete(Ok)--> Downloaded
///   ^                              |
///   +---on_complete(Err|Cancelled)-+
/// ```
///
/// `Downloaded` is restored after a restart solely by
/// [`reconcile_on_load`](Self::reconcile_on_load) inspecting the filesystem;
/// the engine holds no persisted state table.
#[derive(Debug)]
pub struct DownloadEngine {
    config: StorageConfig,
    client: reqwest::Client,
    feed: Arc<ChangeFeed>,
    events_tx: mpsc::UnboundedSender<TransferEvent>,
    events_rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl DownloadEngine {
    /// Creates an engine for the given storage roots and change feed.
    ///
    /// Ensures both `books/` storage directories exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a storage directory cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static timeout
    /// configuration. This should never happen in practice.
    #[allow(clippy::expect_used)]
    #[instrument(skip(feed), fields(temp = %config.temp_root().display(), permanent = %config.permanent_root().display()))]
    pub fn new(config: StorageConfig, feed: Arc<ChangeFeed>) -> Result<Self, StorageError> {
        config.ensure_directories()?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client with static configuration");

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            client,
            feed,
            events_tx,
            events_rx,
        })
    }

    /// The storage configuration this engine writes into.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Begins downloading `entity.source_url()` to the temp path.
    ///
    /// No-op unless the entity is in `Fault` — the idempotent guard against
    /// duplicate transfers. Does not block; completion is observed through
    /// the change feed after the completion event is applied.
    #[instrument(skip(self, entity), fields(identifier = %entity.identifier()))]
    pub fn start_downloading(&self, entity: &mut BookEntity) {
        if !entity.state().is_fault() {
            debug!("not in fault state, ignoring start request");
            return;
        }

        let handle = begin_transfer(
            &self.client,
            entity.identifier(),
            entity.source_url().clone(),
            self.config.temp_path(entity.identifier()),
            self.events_tx.clone(),
        );

        info!("download started");
        entity.set_state(DownloadState::InProgress {
            handle,
            total_bytes: TOTAL_BYTES_UNKNOWN,
            bytes_read: 0,
        });
        self.feed.publish(&ChangeBatch::updated(entity.clone()));
    }

    /// Applies a progress report to an in-progress entity.
    ///
    /// No-op unless the entity is in `InProgress`; this also covers an entity
    /// deleted while its transfer was still emitting events.
    pub fn on_progress(&self, entity: &mut BookEntity, bytes_read: i64, total_bytes: i64) {
        let DownloadState::InProgress { handle, .. } = entity.state() else {
            return;
        };

        let handle = handle.clone();
        entity.set_state(DownloadState::InProgress {
            handle,
            total_bytes,
            bytes_read,
        });
        self.feed.publish(&ChangeBatch::updated(entity.clone()));
    }

    /// Applies a completion event to an in-progress entity.
    ///
    /// - `Err(Cancelled)`: the partial temp file is discarded and the entity
    ///   reverts to `Fault` silently. Cancellation is never a failure.
    /// - other `Err`: same transition, logged at warn. The error is absorbed
    ///   here and never crosses the engine boundary.
    /// - `Ok`: any existing file at the permanent path is removed, then the
    ///   temp file is moved into place and the entity becomes `Downloaded`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the remove or move fails. The entity is
    /// left in its transient state in that case. A crash between the remove
    /// and the move leaves no file at the permanent path; the next load
    /// reconciles to `Fault` and the user retries.
    #[instrument(skip(self, entity, result), fields(identifier = %entity.identifier()))]
    pub fn on_complete(
        &self,
        entity: &mut BookEntity,
        result: Result<(), TransferError>,
    ) -> Result<(), EngineError> {
        if !entity.state().is_in_progress() {
            return Ok(());
        }

        let identifier = entity.identifier().to_string();
        let temp_path = self.config.temp_path(&identifier);

        match result {
            Err(error) => {
                if error.is_cancellation() {
                    debug!("transfer cancelled, reverting to fault");
                } else {
                    warn!(error = %error, "transfer failed, reverting to fault");
                }
                // Best-effort discard of the partial file.
                let _ = std::fs::remove_file(&temp_path);
                entity.set_state(DownloadState::Fault);
                self.feed.publish(&ChangeBatch::updated(entity.clone()));
                Ok(())
            }
            Ok(()) => {
                let permanent_path = self.config.permanent_path(&identifier);

                match std::fs::remove_file(&permanent_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(EngineError::io(permanent_path, e)),
                }
                std::fs::rename(&temp_path, &permanent_path)
                    .map_err(|e| EngineError::io(temp_path.clone(), e))?;

                info!(path = %permanent_path.display(), "download finalized");
                entity.set_state(DownloadState::Downloaded {
                    local_path: permanent_path,
                });
                self.feed.publish(&ChangeBatch::updated(entity.clone()));
                Ok(())
            }
        }
    }

    /// Cancels the transfer of an in-progress entity.
    ///
    /// No-op otherwise. The state transition back to `Fault` happens when the
    /// cancellation completion event is applied, never synchronously here, so
    /// a racing completion cannot double-transition the entity.
    #[instrument(skip(self, entity), fields(identifier = %entity.identifier()))]
    pub fn stop_downloading(&self, entity: &BookEntity) {
        let DownloadState::InProgress { handle, .. } = entity.state() else {
            debug!("no transfer in progress, ignoring stop request");
            return;
        };
        handle.cancel();
    }

    /// Reconciles a freshly loaded entity against the filesystem.
    ///
    /// If a file exists at the permanent path the entity is forced to
    /// `Downloaded` regardless of any other signal. This is the sole
    /// mechanism for restoring `Downloaded` after a process restart, and it
    /// is idempotent. It runs before any observer is assumed attached, so no
    /// change event is published.
    pub fn reconcile_on_load(&self, entity: &mut BookEntity) {
        let local_path = self.config.permanent_path(entity.identifier());
        if local_path.exists() {
            debug!(identifier = %entity.identifier(), "permanent file present, reconciling to downloaded");
            entity.set_state(DownloadState::Downloaded { local_path });
        }
    }

    /// Cancels any in-flight transfer ahead of entity deletion.
    ///
    /// Must be invoked before the store record is removed.
    pub fn cancel_on_deletion(&self, entity: &BookEntity) {
        if let DownloadState::InProgress { handle, .. } = entity.state() {
            debug!(identifier = %entity.identifier(), "cancelling transfer for deletion");
            handle.cancel();
        }
    }

    /// Waits for the next transfer event.
    ///
    /// Events must be applied on the context that owns the entity; this
    /// method plus [`apply_event`](Self::apply_event) is that re-dispatch.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events_rx.recv().await
    }

    /// Returns an already-queued transfer event without waiting.
    pub fn try_next_event(&mut self) -> Option<TransferEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Applies a transfer event to the entity it belongs to.
    ///
    /// Events carry the identifier of their entity; applying an event to a
    /// different entity is a logged no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] from completion finalization; see
    /// [`on_complete`](Self::on_complete).
    pub fn apply_event(
        &self,
        entity: &mut BookEntity,
        event: TransferEvent,
    ) -> Result<(), EngineError> {
        if event.identifier() != entity.identifier() {
            warn!(
                event_identifier = %event.identifier(),
                entity_identifier = %entity.identifier(),
                "transfer event applied to wrong entity, ignoring"
            );
            return Ok(());
        }

        match event {
            TransferEvent::Progress {
                bytes_read,
                total_bytes,
                ..
            } => {
                self.on_progress(entity, bytes_read, total_bytes);
                Ok(())
            }
            TransferEvent::Complete { result, .. } => self.on_complete(entity, result),
        }
    }
}
