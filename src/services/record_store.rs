//! src/services/record_store.rs
//!
//! RecordStore: vault item metadata in SQLite. Every call is a single
//! statement; there are no transactions and no cross-store coordination.

use crate::models::vault_record::{NewVaultRecord, VaultRecord};
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    error::{DatabaseError, ErrorKind},
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{StorageError, StorageResult};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "id, type, content, file_path, file_name, mime_type, password, \
                              expires_at, is_one_time, view_count, created_at";

/// Handle to the `items` table. Cheap to clone; the pool is shared.
#[derive(Clone)]
pub struct RecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl RecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent, so this runs on
    /// every startup.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a new record with a fresh id, `view_count = 0` and
    /// `created_at = now`.
    ///
    /// Constraint violations (e.g. a text item without content) come back as
    /// `StorageError::Rejected`.
    pub async fn insert(&self, new: NewVaultRecord) -> StorageResult<VaultRecord> {
        let sql = format!(
            "INSERT INTO items (
                id, type, content, file_path, file_name, mime_type, password,
                expires_at, is_one_time, view_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING {RECORD_COLUMNS}"
        );

        sqlx::query_as::<_, VaultRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.kind)
            .bind(new.content)
            .bind(new.blob_reference)
            .bind(new.display_name)
            .bind(new.media_type)
            .bind(new.secret)
            .bind(new.expires_at)
            .bind(new.one_time)
            .bind(Utc::now())
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err) if is_constraint_violation(&*db_err) => {
                    StorageError::Rejected(db_err.message().to_string())
                }
                other => StorageError::Sqlx(other),
            })
    }

    /// Look up a record by id, expired or not.
    pub async fn get(&self, id: Uuid) -> StorageResult<Option<VaultRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM items WHERE id = ?");
        let record = sqlx::query_as::<_, VaultRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    /// Delete a record. Returns `false` when no row matched, i.e. somebody
    /// else already removed it.
    pub async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bump the informational view counter.
    pub async fn record_view(&self, id: Uuid) -> StorageResult<()> {
        sqlx::query("UPDATE items SET view_count = view_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// All records that are dead at `now`.
    ///
    /// Timestamps are stored as RFC 3339 text with a `+00:00` offset, which
    /// sorts the same way as the instants themselves.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<VaultRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM items WHERE expires_at <= ?");
        let rows = sqlx::query_as::<_, VaultRecord>(&sql)
            .bind(now)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> StorageResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(StorageError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {value}"
            ))));
        }
        Ok(())
    }
}

/// Return true if the database refused a row because of a table constraint.
fn is_constraint_violation(err: &dyn DatabaseError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::CheckViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
    ) || err.message().to_ascii_lowercase().contains("constraint failed")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::vault_record::VaultKind;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Single-connection in-memory database with the schema applied.
    pub(crate) async fn memory_store() -> RecordStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = RecordStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        store
    }

    fn text_record(content: Option<&str>, expires_at: DateTime<Utc>) -> NewVaultRecord {
        NewVaultRecord {
            kind: VaultKind::Text,
            content: content.map(str::to_string),
            blob_reference: None,
            display_name: None,
            media_type: None,
            secret: None,
            expires_at,
            one_time: false,
        }
    }

    #[tokio::test]
    async fn insert_get_delete() {
        let store = memory_store().await;
        let expires = Utc::now() + Duration::hours(1);
        let created = store
            .insert(text_record(Some("hello"), expires))
            .await
            .unwrap();
        assert_eq!(created.view_count, 0);

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.kind, VaultKind::Text);
        assert_eq!(fetched.content.as_deref(), Some("hello"));
        assert_eq!(fetched.expires_at, created.expires_at);

        assert!(store.delete(created.id).await.unwrap());
        assert!(store.get(created.id).await.unwrap().is_none());
        // Second delete finds nothing.
        assert!(!store.delete(created.id).await.unwrap());
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = memory_store().await;
        store.migrate().await.unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn text_without_content_is_rejected() {
        let store = memory_store().await;
        let err = store
            .insert(text_record(None, Utc::now() + Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn file_without_blob_is_rejected() {
        let store = memory_store().await;
        let mut new = text_record(None, Utc::now() + Duration::hours(1));
        new.kind = VaultKind::File;
        new.display_name = Some("a.txt".into());
        let err = store.insert(new).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn record_view_increments_counter() {
        let store = memory_store().await;
        let created = store
            .insert(text_record(Some("x"), Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        store.record_view(created.id).await.unwrap();
        store.record_view(created.id).await.unwrap();
        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.view_count, 2);
    }

    #[tokio::test]
    async fn list_expired_only_returns_dead_records() {
        let store = memory_store().await;
        let now = Utc::now();
        let dead = store
            .insert(text_record(Some("old"), now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .insert(text_record(Some("new"), now + Duration::minutes(5)))
            .await
            .unwrap();

        let expired = store.list_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, dead.id);
    }

    #[tokio::test]
    async fn list_expired_respects_sub_second_boundaries() {
        let store = memory_store().await;
        let now = Utc::now();
        let at_now = store
            .insert(text_record(Some("boundary"), now))
            .await
            .unwrap();
        store
            .insert(text_record(Some("soon"), now + Duration::milliseconds(500)))
            .await
            .unwrap();
        let whole_second = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
        let earlier = store
            .insert(text_record(Some("earlier"), whole_second))
            .await
            .unwrap();

        let mut expired: Vec<Uuid> = store
            .list_expired(now)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        expired.sort();
        let mut wanted = vec![at_now.id, earlier.id];
        wanted.sort();
        assert_eq!(expired, wanted);
    }
}
