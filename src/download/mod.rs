//! Download lifecycle: transfer subsystem and per-book state machine.
//!
//! [`DownloadEngine`] owns the state machine described in [`crate::book`];
//! the transfer submodule streams HTTP bodies to the temporary path and
//! reports progress/completion as [`TransferEvent`]s for the owner context to
//! apply. Transfer failures never escape the engine: they resolve to state
//! transitions, with cancellation distinguished from real failures.

mod engine;
mod error;
mod transfer;

pub use engine::DownloadEngine;
pub use error::{EngineError, TransferError};
pub use transfer::{TOTAL_BYTES_UNKNOWN, TransferEvent, TransferHandle};
