//! Caller-visible failures of the capture layer.
//!
//! Everything that can go wrong per frame (a failed read, a detector error, a
//! failed notification) is absorbed locally and surfaced through statistics and
//! logging. Only the failures below reach the caller, and only at setup time.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The capture device, stream or file could not be opened.
    #[error("video source {uri:?} unavailable: {reason}")]
    Unavailable { uri: String, reason: String },

    /// `open()` was called on a source whose acquisition loop already started.
    #[error("video source {0:?} is already open")]
    AlreadyOpen(String),

    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),
}

impl SourceError {
    pub(crate) fn unavailable(uri: &str, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }
}
