//! Asynchronous transfer subsystem.
//!
//! [`begin_transfer`] spawns a tokio task that streams an HTTP response body
//! to the temporary file for one book and reports back through an mpsc event
//! channel. The task never touches entity state: progress and completion
//! events are applied by the engine only when the owner context pumps them,
//! which is what serializes all state mutation for an entity.
//!
//! Cancellation races the streaming loop against a [`CancellationToken`]; a
//! cancelled transfer always completes with [`TransferError::Cancelled`].

use std::path::PathBuf;

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::error::TransferError;

/// Total-bytes value reported before the content length is known.
pub const TOTAL_BYTES_UNKNOWN: i64 = -1;

/// Event emitted by a transfer task, tagged with the owning identifier.
#[derive(Debug)]
pub enum TransferEvent {
    /// Byte counters changed.
    Progress {
        /// Identifier of the book being transferred.
        identifier: String,
        /// Bytes received so far.
        bytes_read: i64,
        /// Expected total, or [`TOTAL_BYTES_UNKNOWN`].
        total_bytes: i64,
    },
    /// The transfer finished: success, failure, or cancellation.
    Complete {
        /// Identifier of the book being transferred.
        identifier: String,
        /// `Ok` when the temp file holds the complete body.
        result: Result<(), TransferError>,
    },
}

impl TransferEvent {
    /// Identifier of the entity this event belongs to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Progress { identifier, .. } | Self::Complete { identifier, .. } => identifier,
        }
    }
}

/// Cancellation handle for one in-flight transfer.
///
/// Cancellation is best-effort and asynchronous: after `cancel()` the caller
/// must wait for the completion event, not assume the state already reverted.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    token: CancellationToken,
}

impl TransferHandle {
    /// Requests cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle not connected to any task. Cancelling it has no effect;
    /// used when driving the state machine with simulated events.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }
}

/// Starts an asynchronous transfer of `url` into `dest`.
///
/// Returns immediately with the cancellation handle; all further signals
/// arrive as [`TransferEvent`]s on `events`. Any existing partial file at
/// `dest` (a stale leftover from a previous run) is truncated.
#[instrument(skip(client, events), fields(identifier = %identifier, url = %url))]
pub(crate) fn begin_transfer(
    client: &reqwest::Client,
    identifier: &str,
    url: Url,
    dest: PathBuf,
    events: mpsc::UnboundedSender<TransferEvent>,
) -> TransferHandle {
    let token = CancellationToken::new();
    let handle = TransferHandle {
        token: token.clone(),
    };

    let client = client.clone();
    let identifier = identifier.to_string();

    tokio::spawn(async move {
        let result = tokio::select! {
            () = token.cancelled() => {
                debug!(identifier = %identifier, "transfer cancelled");
                Err(TransferError::Cancelled)
            }
            result = stream_to_temp(&client, &identifier, url, dest, &events) => result,
        };

        // The receiver disappearing means the engine is gone; nothing left
        // to notify.
        let _ = events.send(TransferEvent::Complete { identifier, result });
    });

    handle
}

/// Streams the response body to the temp file, emitting progress per chunk.
async fn stream_to_temp(
    client: &reqwest::Client,
    identifier: &str,
    url: Url,
    dest: PathBuf,
    events: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<(), TransferError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| TransferError::network(url.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::http_status(url.as_str(), status.as_u16()));
    }

    let total_bytes = response
        .content_length()
        .and_then(|len| i64::try_from(len).ok())
        .unwrap_or(TOTAL_BYTES_UNKNOWN);

    let file = File::create(&dest)
        .await
        .map_err(|e| TransferError::io(dest.clone(), e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_read: i64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| TransferError::network(url.as_str(), e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(dest.clone(), e))?;

        bytes_read += chunk.len() as i64;
        let _ = events.send(TransferEvent::Progress {
            identifier: identifier.to_string(),
            bytes_read,
            total_bytes,
        });
    }

    writer
        .flush()
        .await
        .map_err(|e| TransferError::io(dest.clone(), e))?;

    debug!(identifier = %identifier, bytes = bytes_read, "transfer body complete");
    Ok(())
}
