//! src/services/blob_store.rs
//!
//! BlobStore: file payloads on local disk, sharded beneath
//! `base_path/{shard}/{shard}/{key}`. Keys are flat (no separators) and are
//! generated by the vault service, never taken verbatim from clients.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use super::{StorageError, StorageResult};

const MAX_BLOB_KEY_LEN: usize = 1024;

#[derive(Clone)]
pub struct BlobStore {
    /// Root directory holding every blob.
    pub base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape the blob root or confuse the filesystem.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_BLOB_KEY_LEN {
            return Err(StorageError::InvalidBlobKey);
        }
        if key.starts_with('.') || key.contains("..") {
            return Err(StorageError::InvalidBlobKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(StorageError::InvalidBlobKey);
        }
        Ok(())
    }

    /// Two-level shard directories from the first bytes of MD5(key).
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Stream a payload to disk under `key` and return its size in bytes.
    ///
    /// Bytes go to a temp file which is fsynced and then renamed into place,
    /// so a failed upload never leaves a partial blob behind.
    pub async fn put_stream<S>(&self, key: &str, stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("blob path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        match write_stream(&tmp_path, stream).await {
            Ok(size) => {
                if let Err(err) = fs::rename(&tmp_path, &file_path).await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
                debug!(key, size, "stored blob");
                Ok(size)
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(StorageError::Io(err))
            }
        }
    }

    /// Open a blob for streaming out. Returns the handle and its length.
    pub async fn open(&self, key: &str) -> StorageResult<(File, u64)> {
        Self::ensure_key_safe(key)?;
        let file = File::open(self.blob_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::BlobNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    /// Remove a blob. A blob that is already gone is not an error.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Write/read/delete round trip used by the readiness probe.
    pub async fn probe(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::other("file content mismatch")));
        }
        Ok(())
    }

    /// Remove empty shard directories up to (not including) the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_stream<S>(path: &Path, stream: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size: u64 = 0;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(size)
}
