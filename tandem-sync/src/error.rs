//! Error types for tandem-sync.

use std::path::PathBuf;

use thiserror::Error;

use tandem_core::System;

/// Errors that abort a whole cycle or a baseline operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A collaborator could not produce its snapshot; the cycle aborts
    /// before reconciliation and the baseline is left untouched.
    #[error("fetch from {system} failed: {source}")]
    Fetch {
        system: System,
        #[source]
        source: CollaboratorError,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (baseline store).
    #[error("baseline JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by an external system.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record addressed by `id` does not exist in `system`.
    #[error("{system} has no record with id {id:?}")]
    NotFound { system: System, id: String },

    /// The system refused the call.
    #[error("{0}")]
    Rejected(String),
}

/// Why a single action could not be applied. Never fatal to the cycle.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The item has no identifier in the system the call must address.
    #[error("item {key:?} has no {target} id")]
    MissingTargetId { target: System, key: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`CollaboratorError::Io`].
pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CollaboratorError {
    CollaboratorError::Io {
        path: path.into(),
        source,
    }
}
