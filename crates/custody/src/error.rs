//! Error types for the vault.

use std::time::Duration;

use custody_core::{ContentHash, CoreError, SigningError};
use custody_store::StoreError;
use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Input rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// Document not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Evidence could not be issued and policy requires it.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// A structured payload could not be canonicalized.
    #[error("canonicalization error: {0}")]
    Canonical(#[from] CoreError),

    /// Blob filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database work did not finish in time and was rolled back.
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Another ingest of the same content is still in progress.
    #[error("content {0} is being stored by a concurrent request")]
    InFlight(ContentHash),
}

impl VaultError {
    /// Whether the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::Store(e) => e.is_retryable(),
            VaultError::Timeout(_) | VaultError::InFlight(_) => true,
            _ => false,
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
