//! Error types for preference storage
//!
//! These never cross the public `save`/`load`/`sync` surface, which reports
//! plain booleans. They exist so backends can propagate failures with `?`
//! and log a precise cause at the boundary.

use embedded_storage::nor_flash::NorFlashErrorKind;
use thiserror::Error;

/// Result type for backend operations
pub type PreferenceResult<T> = Result<T, PreferenceError>;

/// Errors raised inside preference backends
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Slot has never been written
    #[error("preference {key} has not been saved yet")]
    NotFound { key: String },

    /// Stored or requested size differs from the slot size
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("preference payload of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    /// Stored check value does not match the payload
    #[error("checksum mismatch for preference {key}")]
    ChecksumMismatch { key: u32 },

    #[error("offset {offset} is outside the {capacity} unit storage area")]
    OutOfBounds { offset: usize, capacity: usize },

    /// The store was reset and refuses writes until restart
    #[error("storage is write-protected until restart")]
    WriteProtected,

    #[error("flash erase failed at {offset:#x}: {kind:?}")]
    FlashErase { offset: u32, kind: NorFlashErrorKind },

    #[error("flash write failed at {offset:#x}: {kind:?}")]
    FlashWrite { offset: u32, kind: NorFlashErrorKind },

    #[error("flash read failed at {offset:#x}: {kind:?}")]
    FlashRead { offset: u32, kind: NorFlashErrorKind },

    #[error("NVS error: {0}")]
    Nvs(String),
}

impl PreferenceError {
    /// Whether this is the expected "nothing stored yet" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
