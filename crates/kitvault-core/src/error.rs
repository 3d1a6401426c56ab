//! Crate-level error types
//!
//! Mirrors the three-way taxonomy of the engine: validation failures are
//! rejected before any write, storage failures abort with no partial state,
//! and undo replay failures leave the history stacks untouched.

use thiserror::Error;

use crate::db::DbError;
use crate::validate::ValidationError;

/// Errors surfaced by the kit service and the layers beneath it
#[derive(Debug, Error)]
pub enum KitError {
    /// Rejected before any write; message returned verbatim
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Storage failure; the operation was aborted with no partial state
    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("kit not found: {0}")]
    KitNotFound(String),

    #[error("kit already exists: {0}")]
    KitExists(String),

    #[error("kit {0} is locked")]
    KitLocked(String),

    #[error("kit {0} is not editable")]
    KitNotEditable(String),

    #[error("no sample at kit {kit} voice {voice} slot {slot}")]
    SampleNotFound { kit: String, voice: u8, slot: u8 },

    /// An inverse or forward replay's underlying call failed; the undo and
    /// redo stacks were left unchanged
    #[error("undo replay failed: {0}")]
    UndoReplay(String),
}

/// Result type for kit operations
pub type KitResult<T> = Result<T, KitError>;
