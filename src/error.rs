//! Error types for the flux-convert library.
//!
//! Two error types reflect two failure domains:
//!
//! * [`FluxError`]: an API call on the UI side cannot proceed (no file
//!   selected, pipeline busy, background worker gone, artifact not
//!   writable). Returned as `Err(FluxError)` from [`crate::Session`] and
//!   [`crate::Artifact`] methods.
//!
//! * [`EngineError`]: the native engine could not be loaded or rejected a
//!   conversion. It never leaves the background worker as an error value;
//!   the worker folds it into a structured
//!   [`crate::protocol::WorkerResponse::Error`] before it crosses the channel.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the flux-convert library.
#[derive(Debug, Error)]
pub enum FluxError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// Submit was called before any file was chosen.
    #[error("Please select a file first!")]
    NoFileSelected,

    /// A conversion is already being read or converted.
    #[error("A conversion is already in progress.")]
    Busy,

    /// The background worker faulted or its channel closed.
    #[error("A critical error occurred in the background process. Please reload.")]
    WorkerLost,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The selected file could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The background thread could not be started.
    #[error("Failed to start the conversion worker: {0}")]
    WorkerSpawnFailed(#[source] std::io::Error),

    /// The converted artifact could not be written to disk.
    #[error("Failed to write artifact to '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Configuration errors ──────────────────────────────────────────────
    /// A configuration value is out of range or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures raised by a [`crate::engine::ConversionEngine`] or its loader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not be located, fetched or bound.
    #[error("engine load failed: {0}")]
    Load(String),

    /// The engine rejected a conversion, with its own message if it gave one.
    #[error("conversion failed: {}", .0.as_deref().unwrap_or("<no message>"))]
    Convert(Option<String>),
}

impl EngineError {
    /// Convenience constructor for a conversion failure carrying a message.
    pub fn convert(message: impl Into<String>) -> Self {
        EngineError::Convert(Some(message.into()))
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_messages_are_exact() {
        assert_eq!(
            FluxError::NoFileSelected.to_string(),
            "Please select a file first!"
        );
        assert_eq!(
            FluxError::Busy.to_string(),
            "A conversion is already in progress."
        );
        assert!(FluxError::WorkerLost.to_string().starts_with("A critical error"));
    }

    #[test]
    fn engine_convert_without_message() {
        let e = EngineError::Convert(None);
        assert!(e.to_string().contains("<no message>"));
        assert_eq!(
            EngineError::convert("bad header"),
            EngineError::Convert(Some("bad header".into()))
        );
    }

    #[test]
    fn panic_message_reads_both_payload_kinds() {
        let p = std::panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(&*p).as_deref(), Some("static text"));

        let p = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*p).as_deref(), Some("formatted 42"));

        let p = std::panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(&*p), None);
    }
}
