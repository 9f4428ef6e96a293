// src/error.rs

//! Error type shared by every module of the imaging layer.
//!
//! Failures are reported synchronously and never retried here. Retry policy
//! (for example after a lock `Timeout`) belongs to the caller.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImagingError {
    /// Out-of-range dimensions, malformed rects, bad format/palette combinations.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Bitmap is not locked")]
    NotLocked,
    #[error("Bitmap is frozen and cannot be modified")]
    FrozenBitmap,
    #[error("A copy of the back buffer is still outstanding")]
    AlreadyPublishing,
    #[error("Bitmap is locked; release all locks first")]
    LockHeld,
    #[error("Buffer too small: {required} bytes required, {actual} supplied")]
    BufferTooSmall { required: usize, actual: usize },
    /// Opaque failure from the codec, passed through untouched.
    #[error("Codec failure: {0}")]
    CodecFailure(String),
    #[error("Timed out after {0:?} waiting for the back buffer")]
    Timeout(Duration),
    #[error("Unsupported value kind: {0}")]
    UnsupportedValueKind(&'static str),
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Metadata query not found: {0}")]
    QueryNotFound(String),
    #[error("Composition channel closed")]
    ChannelClosed,
}

impl ImagingError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ImagingError::InvalidParameter(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ImagingError>;
