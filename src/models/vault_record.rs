//! Represents a shared item (text snippet or file) stored in the vault.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sqlx::FromRow;
use uuid::Uuid;

/// Media type used when an upload does not declare one.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Where the content of a vault item lives.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum VaultKind {
    /// Inline text kept in the record itself.
    Text,
    /// Binary attachment kept in the blob store.
    File,
}

impl VaultKind {
    /// Parse the `type` form value. Only the exact lowercase names are accepted.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// A single vault item.
///
/// Exactly one of `content` / `blob_reference` is populated, matching `kind`.
/// The record store enforces this with a CHECK constraint. Field names on the
/// wire and in the table follow the public API (`type`, `file_path`, ...).
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct VaultRecord {
    /// Identifier handed out in share links.
    pub id: Uuid,

    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: VaultKind,

    /// Inline payload when `kind` is text.
    pub content: Option<String>,

    /// Blob store key when `kind` is file.
    #[serde(rename = "file_path")]
    #[sqlx(rename = "file_path")]
    pub blob_reference: Option<String>,

    /// Original file name of the upload.
    #[serde(rename = "file_name")]
    #[sqlx(rename = "file_name")]
    pub display_name: Option<String>,

    /// MIME type of the upload.
    #[serde(rename = "mime_type")]
    #[sqlx(rename = "mime_type")]
    pub media_type: Option<String>,

    /// Password gate, stored as plaintext. Only its presence is ever serialized.
    #[serde(rename = "has_password", serialize_with = "serialize_presence")]
    #[sqlx(rename = "password")]
    pub secret: Option<String>,

    /// Absolute instant after which the item is dead.
    pub expires_at: DateTime<Utc>,

    /// Delete after the first successful retrieval.
    #[serde(rename = "is_one_time")]
    #[sqlx(rename = "is_one_time")]
    pub one_time: bool,

    /// Informational counter of successful retrievals.
    pub view_count: i64,

    pub created_at: DateTime<Utc>,
}

impl VaultRecord {
    /// An item is dead from `expires_at` onwards, whether or not it was purged.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Values supplied when creating a record; id, counters and timestamps are
/// assigned by the record store.
#[derive(Clone, Debug)]
pub struct NewVaultRecord {
    pub kind: VaultKind,
    pub content: Option<String>,
    pub blob_reference: Option<String>,
    pub display_name: Option<String>,
    pub media_type: Option<String>,
    pub secret: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub one_time: bool,
}

fn serialize_presence<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_bool(value.is_some())
}
