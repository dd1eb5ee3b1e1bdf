//! src/services/vault_service.rs
//!
//! VaultService: the create / retrieve / download flows on top of the record
//! and blob stores. Handlers own the HTTP framing; everything about expiry,
//! password gates and one-time consumption lives here.
//!
//! One-time items are consumed by `settle`, which handlers run only after the
//! response body has been handed to the transport. The read and the delete are
//! not atomic: two concurrent first reads can both succeed before either
//! delete lands.

use crate::models::vault_record::{NewVaultRecord, VaultKind, VaultRecord};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{io, sync::Arc};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    StorageError,
    blob_store::BlobStore,
    record_store::RecordStore,
    secret::{PlaintextVerifier, SecretVerifier},
};

/// Byte budget for the sanitized file name in a blob key. With the 37-byte
/// `<uuid>-` prefix the key stays under the 255-byte NAME_MAX of common
/// filesystems.
const MAX_KEY_NAME_BYTES: usize = 200;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("{0}")]
    Validation(String),
    #[error("vault not found")]
    NotFound,
    #[error("vault expired")]
    Expired,
    #[error("password missing or incorrect")]
    AccessDenied,
    /// The record store refused the insert.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// A file part already written to the blob store but not yet owned by a record.
#[derive(Clone, Debug)]
pub struct Attachment {
    pub blob_reference: String,
    pub display_name: String,
    pub media_type: String,
    pub size: u64,
}

/// A parsed create request.
#[derive(Debug)]
pub struct Submission {
    pub kind: VaultKind,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub secret: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub one_time: bool,
}

/// An opened file payload ready to stream out.
pub struct Download {
    pub record: VaultRecord,
    pub file: File,
    pub size: u64,
}

/// Long-lived handle shared by every handler through router state.
#[derive(Clone)]
pub struct VaultService {
    pub records: RecordStore,
    pub blobs: BlobStore,
    secrets: Arc<dyn SecretVerifier>,
}

impl VaultService {
    /// Service using plaintext password comparison.
    pub fn new(records: RecordStore, blobs: BlobStore) -> Self {
        Self::with_verifier(records, blobs, Arc::new(PlaintextVerifier))
    }

    pub fn with_verifier(
        records: RecordStore,
        blobs: BlobStore,
        secrets: Arc<dyn SecretVerifier>,
    ) -> Self {
        Self {
            records,
            blobs,
            secrets,
        }
    }

    /// Write an uploaded file to the blob store under a fresh key.
    pub async fn store_attachment<S>(
        &self,
        display_name: String,
        media_type: String,
        stream: S,
    ) -> VaultResult<Attachment>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let blob_reference = blob_key(&display_name);
        let size = self.blobs.put_stream(&blob_reference, stream).await?;
        Ok(Attachment {
            blob_reference,
            display_name,
            media_type,
            size,
        })
    }

    /// Best-effort removal of an attachment that will never be referenced.
    pub async fn discard_attachment(&self, attachment: &Attachment) {
        if let Err(err) = self.blobs.delete(&attachment.blob_reference).await {
            warn!(
                blob = %attachment.blob_reference,
                error = %err,
                "failed to discard orphaned blob"
            );
        }
    }

    /// Persist a submission as a new record.
    ///
    /// Only the field matching `kind` is stored. If the insert fails, the
    /// already written attachment is removed again.
    pub async fn create(&self, submission: Submission) -> VaultResult<VaultRecord> {
        let Submission {
            kind,
            content,
            attachment,
            secret,
            expires_at,
            one_time,
        } = submission;

        let (content, attachment) = match kind {
            VaultKind::Text => {
                if let Some(stray) = &attachment {
                    self.discard_attachment(stray).await;
                }
                (content, None)
            }
            VaultKind::File => (None, attachment),
        };

        let new = NewVaultRecord {
            kind,
            content,
            blob_reference: attachment.as_ref().map(|a| a.blob_reference.clone()),
            display_name: attachment.as_ref().map(|a| a.display_name.clone()),
            media_type: attachment.as_ref().map(|a| a.media_type.clone()),
            secret,
            expires_at,
            one_time,
        };

        match self.records.insert(new).await {
            Ok(record) => {
                info!(
                    id = %record.id,
                    kind = ?record.kind,
                    one_time = record.one_time,
                    size = attachment.as_ref().map(|a| a.size),
                    "created vault item"
                );
                Ok(record)
            }
            Err(err) => {
                if let Some(orphan) = &attachment {
                    self.discard_attachment(orphan).await;
                }
                Err(match err {
                    StorageError::Rejected(reason) => VaultError::Rejected(reason),
                    other => VaultError::Storage(other),
                })
            }
        }
    }

    /// Look up an item and enforce expiry and the password gate.
    ///
    /// Malformed identifiers are reported as not found. Expired items are
    /// left in place; `purge_expired` removes them.
    pub async fn retrieve(&self, id: &str, password: Option<&str>) -> VaultResult<VaultRecord> {
        let id = Uuid::parse_str(id).map_err(|_| VaultError::NotFound)?;
        let record = self.records.get(id).await?.ok_or(VaultError::NotFound)?;

        if record.is_expired(Utc::now()) {
            return Err(VaultError::Expired);
        }
        if let Some(stored) = record.secret.as_deref() {
            if !self.secrets.verify(stored, password) {
                return Err(VaultError::AccessDenied);
            }
        }
        Ok(record)
    }

    /// Like `retrieve`, then open the attached blob.
    ///
    /// Items without a blob (text items) are not found on this path, and so
    /// is a blob that vanished underneath its record.
    pub async fn open_download(&self, id: &str, password: Option<&str>) -> VaultResult<Download> {
        let record = self.retrieve(id, password).await?;
        let key = record
            .blob_reference
            .as_deref()
            .ok_or(VaultError::NotFound)?;
        let (file, size) = self.blobs.open(key).await.map_err(|err| match err {
            StorageError::BlobNotFound(_) => VaultError::NotFound,
            other => VaultError::Storage(other),
        })?;
        Ok(Download { record, file, size })
    }

    /// Bookkeeping after an item was delivered: consume one-time items,
    /// count views on the rest. Failures are logged and never surfaced.
    pub async fn settle(&self, record: &VaultRecord) {
        if record.one_time {
            self.consume(record).await;
        } else if let Err(err) = self.records.record_view(record.id).await {
            warn!(id = %record.id, error = %err, "failed to record view");
        }
    }

    async fn consume(&self, record: &VaultRecord) {
        if let Some(key) = record.blob_reference.as_deref() {
            if let Err(err) = self.blobs.delete(key).await {
                warn!(id = %record.id, error = %err, "failed to delete one-time blob");
            }
        }
        match self.records.delete(record.id).await {
            Ok(true) => info!(id = %record.id, "consumed one-time vault item"),
            Ok(false) => debug!(id = %record.id, "one-time vault item already consumed"),
            Err(err) => warn!(id = %record.id, error = %err, "failed to delete one-time record"),
        }
    }

    /// Delete every item dead at `now`, blob first. Returns how many records
    /// were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> VaultResult<usize> {
        let expired = self.records.list_expired(now).await?;
        let mut purged = 0;
        for record in expired {
            if let Some(key) = record.blob_reference.as_deref() {
                self.blobs.delete(key).await?;
            }
            if self.records.delete(record.id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

/// Fresh blob key: a random UUID followed by the sanitized file name.
pub fn blob_key(display_name: &str) -> String {
    format!("{}-{}", Uuid::new_v4(), sanitize_file_name(display_name))
}

/// Collapse whitespace runs to `_` and neutralize path separators so the name
/// can sit inside a flat key. Truncated on a char boundary to
/// `MAX_KEY_NAME_BYTES`.
fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_KEY_NAME_BYTES));
    let mut in_whitespace = false;
    for c in name.chars() {
        let mapped = if c.is_whitespace() {
            if in_whitespace {
                continue;
            }
            in_whitespace = true;
            '_'
        } else {
            in_whitespace = false;
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        };
        if out.len() + mapped.len_utf8() > MAX_KEY_NAME_BYTES {
            break;
        }
        out.push(mapped);
    }

    let out = out.replace("..", "_");
    if out.is_empty() { "file".into() } else { out }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::record_store::tests::memory_store;
    use chrono::Duration;
    use futures::stream;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    pub(crate) async fn test_service() -> (VaultService, TempDir) {
        let dir = TempDir::new().unwrap();
        let service = VaultService::new(memory_store().await, BlobStore::new(dir.path()));
        (service, dir)
    }

    fn text(content: &str) -> Submission {
        Submission {
            kind: VaultKind::Text,
            content: Some(content.into()),
            attachment: None,
            secret: None,
            expires_at: Utc::now() + Duration::minutes(10),
            one_time: false,
        }
    }

    async fn attachment(service: &VaultService, name: &str, body: &'static [u8]) -> Attachment {
        let stream = stream::iter(vec![Ok(Bytes::from_static(body))]);
        service
            .store_attachment(name.into(), "text/plain".into(), stream)
            .await
            .unwrap()
    }

    async fn blob_exists(service: &VaultService, key: &str) -> bool {
        service.blobs.open(key).await.is_ok()
    }

    #[tokio::test]
    async fn text_round_trip() {
        let (service, _dir) = test_service().await;
        let created = service.create(text("hello")).await.unwrap();
        let record = service
            .retrieve(&created.id.to_string(), None)
            .await
            .unwrap();
        assert_eq!(record.content.as_deref(), Some("hello"));
        assert!(record.blob_reference.is_none());
    }

    #[tokio::test]
    async fn malformed_and_unknown_ids_are_not_found() {
        let (service, _dir) = test_service().await;
        assert!(matches!(
            service.retrieve("not-a-uuid", None).await,
            Err(VaultError::NotFound)
        ));
        assert!(matches!(
            service.retrieve(&Uuid::new_v4().to_string(), None).await,
            Err(VaultError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_item_is_never_returned() {
        let (service, _dir) = test_service().await;
        let mut submission = text("too late");
        submission.expires_at = Utc::now() - Duration::seconds(1);
        let created = service.create(submission).await.unwrap();

        let result = service.retrieve(&created.id.to_string(), None).await;
        assert!(matches!(result, Err(VaultError::Expired)));
        // Still physically present until purged.
        assert!(service.records.get(created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn password_gate() {
        let (service, _dir) = test_service().await;
        let mut submission = text("gated");
        submission.secret = Some("abc".into());
        let id = service.create(submission).await.unwrap().id.to_string();

        assert!(matches!(
            service.retrieve(&id, None).await,
            Err(VaultError::AccessDenied)
        ));
        assert!(matches!(
            service.retrieve(&id, Some("wrong")).await,
            Err(VaultError::AccessDenied)
        ));
        let record = service.retrieve(&id, Some("abc")).await.unwrap();
        assert_eq!(record.content.as_deref(), Some("gated"));
    }

    #[tokio::test]
    async fn custom_verifier_replaces_plaintext_comparison() {
        struct Reversed;
        impl SecretVerifier for Reversed {
            fn verify(&self, stored: &str, supplied: Option<&str>) -> bool {
                supplied.is_some_and(|s| s.chars().rev().collect::<String>() == stored)
            }
        }

        let dir = TempDir::new().unwrap();
        let service = VaultService::with_verifier(
            memory_store().await,
            BlobStore::new(dir.path()),
            Arc::new(Reversed),
        );
        let mut submission = text("gated");
        submission.secret = Some("abc".into());
        let id = service.create(submission).await.unwrap().id.to_string();

        assert!(service.retrieve(&id, Some("abc")).await.is_err());
        assert!(service.retrieve(&id, Some("cba")).await.is_ok());
    }

    #[tokio::test]
    async fn settle_consumes_one_time_items() {
        let (service, _dir) = test_service().await;
        let mut submission = text("burn after reading");
        submission.one_time = true;
        let id = service.create(submission).await.unwrap().id.to_string();

        let record = service.retrieve(&id, None).await.unwrap();
        service.settle(&record).await;
        assert!(matches!(
            service.retrieve(&id, None).await,
            Err(VaultError::NotFound)
        ));
        // A racing second settle finds nothing and stays quiet.
        service.settle(&record).await;
    }

    #[tokio::test]
    async fn settle_counts_views_on_regular_items() {
        let (service, _dir) = test_service().await;
        let id = service.create(text("hi")).await.unwrap().id.to_string();

        let record = service.retrieve(&id, None).await.unwrap();
        service.settle(&record).await;
        let record = service.retrieve(&id, None).await.unwrap();
        assert_eq!(record.view_count, 1);
    }

    #[tokio::test]
    async fn file_download_and_one_time_cleanup() {
        let (service, _dir) = test_service().await;
        let stored = attachment(&service, "my notes.txt", b"file body").await;
        assert!(stored.blob_reference.ends_with("-my_notes.txt"));

        let created = service
            .create(Submission {
                kind: VaultKind::File,
                content: Some("ignored".into()),
                attachment: Some(stored.clone()),
                secret: None,
                expires_at: Utc::now() + Duration::minutes(10),
                one_time: true,
            })
            .await
            .unwrap();
        assert!(created.content.is_none());
        assert_eq!(created.display_name.as_deref(), Some("my notes.txt"));

        let mut download = service
            .open_download(&created.id.to_string(), None)
            .await
            .unwrap();
        assert_eq!(download.size, 9);
        let mut body = Vec::new();
        download.file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"file body");

        service.settle(&download.record).await;
        assert!(!blob_exists(&service, &stored.blob_reference).await);
        assert!(service.records.get(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn text_item_has_nothing_to_download() {
        let (service, _dir) = test_service().await;
        let id = service.create(text("plain")).await.unwrap().id.to_string();
        assert!(matches!(
            service.open_download(&id, None).await,
            Err(VaultError::NotFound)
        ));
    }

    #[tokio::test]
    async fn stray_attachment_on_text_item_is_discarded() {
        let (service, _dir) = test_service().await;
        let stray = attachment(&service, "stray.bin", b"zzz").await;
        let mut submission = text("only text");
        submission.attachment = Some(stray.clone());

        let created = service.create(submission).await.unwrap();
        assert!(created.blob_reference.is_none());
        assert!(!blob_exists(&service, &stray.blob_reference).await);
    }

    #[tokio::test]
    async fn rejected_insert_removes_written_blob() {
        let (service, _dir) = test_service().await;
        let stored = attachment(&service, "orphan.txt", b"data").await;
        // A text item without content violates the record invariant.
        let result = service
            .create(Submission {
                kind: VaultKind::Text,
                content: None,
                attachment: Some(stored.clone()),
                secret: None,
                expires_at: Utc::now() + Duration::minutes(10),
                one_time: false,
            })
            .await;
        assert!(matches!(result, Err(VaultError::Rejected(_))));
        assert!(!blob_exists(&service, &stored.blob_reference).await);
    }

    #[tokio::test]
    async fn file_item_without_attachment_is_rejected() {
        let (service, _dir) = test_service().await;
        let result = service
            .create(Submission {
                kind: VaultKind::File,
                content: None,
                attachment: None,
                secret: None,
                expires_at: Utc::now() + Duration::minutes(10),
                one_time: false,
            })
            .await;
        assert!(matches!(result, Err(VaultError::Rejected(_))));
    }

    #[tokio::test]
    async fn purge_removes_expired_items_and_blobs() {
        let (service, _dir) = test_service().await;
        let stored = attachment(&service, "old.txt", b"old").await;
        let dead = service
            .create(Submission {
                kind: VaultKind::File,
                content: None,
                attachment: Some(stored.clone()),
                secret: None,
                expires_at: Utc::now() - Duration::minutes(1),
                one_time: false,
            })
            .await
            .unwrap();
        let alive = service.create(text("fresh")).await.unwrap();

        let purged = service.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(service.records.get(dead.id).await.unwrap().is_none());
        assert!(!blob_exists(&service, &stored.blob_reference).await);
        assert!(service.records.get(alive.id).await.unwrap().is_some());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("my  big\tfile.pdf"), "my_big_file.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "____etc_passwd");
        assert_eq!(sanitize_file_name("a\\b"), "a_b");
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(
            sanitize_file_name(&"x".repeat(500)).len(),
            MAX_KEY_NAME_BYTES
        );
        // Multibyte names are cut on a char boundary within the byte budget.
        let cjk = sanitize_file_name(&format!("{}.pdf", "報告".repeat(50)));
        assert!(cjk.len() <= MAX_KEY_NAME_BYTES);
        assert_eq!(cjk, "報告".repeat(33));
    }

    #[tokio::test]
    async fn long_multibyte_file_name_is_stored() {
        let (service, _dir) = test_service().await;
        let display_name = format!("{}.pdf", "報告".repeat(50));
        let stored = attachment(&service, &display_name, b"report").await;
        assert!(stored.blob_reference.len() <= 255);
        assert_eq!(stored.display_name, display_name);
        assert!(blob_exists(&service, &stored.blob_reference).await);
    }
}
