//! Storage collaborators and the vault service that composes them.
//!
//! - `record_store` — item metadata in SQLite
//! - `blob_store`   — file payloads on local disk
//! - `secret`       — password verification seam
//! - `vault_service` — create / retrieve / download / consume flows

use std::io;
use thiserror::Error;

pub mod blob_store;
pub mod record_store;
pub mod secret;
pub mod vault_service;

/// Failures raised by the record and blob stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The record store refused the row (constraint violation).
    #[error("record rejected: {0}")]
    Rejected(String),
    #[error("blob `{0}` not found")]
    BlobNotFound(String),
    #[error("invalid blob key")]
    InvalidBlobKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
