//! GridFS storage
//!
//! Files are kept in a [`GridFsBucket`] handed over through the
//! `grid_fs_connection` setting. The MongoDB driver stays outside this crate:
//! the application wraps its bucket in the trait, tests use [`MemoryGridFs`].

use crate::keys;
use crate::registry::GRID_FS_ENGINE;
use crate::traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};
use async_trait::async_trait;
use bytes::Bytes;
use satchel_core::{ConfigValue, SanitizedFile};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A GridFS file as read back from the bucket.
#[derive(Clone, Debug)]
pub struct GridFsObject {
    pub data: Bytes,
    pub content_type: String,
}

/// Minimal GridFS bucket operations used by [`GridFsStorage`].
#[async_trait]
pub trait GridFsBucket: Send + Sync + fmt::Debug {
    /// Write `data` under `filename`, replacing any previous revision.
    async fn upload(&self, filename: &str, content_type: &str, data: Bytes) -> StorageResult<()>;

    async fn download(&self, filename: &str) -> StorageResult<Option<GridFsObject>>;

    /// Remove every revision of `filename`. Returns `false` when there was none.
    async fn delete(&self, filename: &str) -> StorageResult<bool>;
}

/// Wrap a bucket for the `grid_fs_connection` setting.
pub fn connection_value(bucket: Arc<dyn GridFsBucket>) -> ConfigValue {
    ConfigValue::object(bucket)
}

/// In-process GridFS bucket.
#[derive(Debug, Default)]
pub struct MemoryGridFs {
    files: RwLock<HashMap<String, GridFsObject>>,
}

impl MemoryGridFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GridFsBucket for MemoryGridFs {
    async fn upload(&self, filename: &str, content_type: &str, data: Bytes) -> StorageResult<()> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                filename.to_string(),
                GridFsObject {
                    data,
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }

    async fn download(&self, filename: &str) -> StorageResult<Option<GridFsObject>> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned())
    }

    async fn delete(&self, filename: &str) -> StorageResult<bool> {
        Ok(self
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(filename)
            .is_some())
    }
}

/// GridFS storage implementation
#[derive(Clone, Debug)]
pub struct GridFsStorage {
    bucket: Arc<dyn GridFsBucket>,
    store_dir: String,
    access_url: Option<String>,
}

impl GridFsStorage {
    pub fn new(ctx: &StorageContext) -> StorageResult<Self> {
        let bucket = ctx
            .scope
            .read("grid_fs_connection")?
            .as_ref()
            .and_then(ConfigValue::as_object)
            .and_then(|obj| obj.downcast::<Arc<dyn GridFsBucket>>())
            .map(|bucket| bucket.as_ref().clone());

        let bucket = match bucket {
            Some(bucket) => bucket,
            None => {
                let host = ctx
                    .config_str("grid_fs_host")?
                    .unwrap_or_else(|| "localhost".to_string());
                let port = ctx.config_int("grid_fs_port")?.unwrap_or(27017);
                let database = ctx
                    .config_str("grid_fs_database")?
                    .unwrap_or_else(|| "satchel".to_string());
                return Err(StorageError::ConfigError(format!(
                    "grid_fs_connection not configured for mongodb://{}:{}/{}",
                    host, port, database
                )));
            }
        };

        Ok(GridFsStorage {
            bucket,
            store_dir: ctx.store_dir.clone(),
            access_url: ctx
                .config_str("grid_fs_access_url")?
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn handle(&self, key: String, content_type: String) -> Arc<dyn StoredFile> {
        let url = self
            .access_url
            .as_ref()
            .map(|base| format!("{}/{}", base, keys::encode_key(&key)));
        Arc::new(GridFsFile {
            bucket: Arc::clone(&self.bucket),
            key,
            content_type,
            url,
        })
    }
}

#[async_trait]
impl Storage for GridFsStorage {
    async fn store(&self, file: SanitizedFile) -> StorageResult<Arc<dyn StoredFile>> {
        let filename = file
            .filename()
            .ok_or_else(|| StorageError::InvalidKey("file has no filename".to_string()))?;
        let key = keys::store_key(&self.store_dir, &filename)?;
        let content_type = file.content_type();
        let data = file.read().await?;
        let size = data.len();

        let start = std::time::Instant::now();

        self.bucket
            .upload(&key, &content_type, data)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    key = %key,
                    size_bytes = size,
                    "GridFS upload failed"
                );
                e
            })?;

        tracing::info!(
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "GridFS upload successful"
        );

        Ok(self.handle(key, content_type))
    }

    async fn retrieve(&self, identifier: &str) -> StorageResult<Arc<dyn StoredFile>> {
        let key = keys::store_key(&self.store_dir, identifier)?;
        match self.bucket.download(&key).await? {
            Some(object) => Ok(self.handle(key, object.content_type)),
            None => Err(StorageError::NotFound(identifier.to_string())),
        }
    }

    fn engine_name(&self) -> &'static str {
        GRID_FS_ENGINE
    }
}

/// A file persisted in GridFS.
#[derive(Clone, Debug)]
pub struct GridFsFile {
    bucket: Arc<dyn GridFsBucket>,
    key: String,
    content_type: String,
    url: Option<String>,
}

impl GridFsFile {
    async fn object(&self) -> StorageResult<GridFsObject> {
        self.bucket
            .download(&self.key)
            .await?
            .ok_or_else(|| StorageError::NotFound(self.key.clone()))
    }
}

#[async_trait]
impl StoredFile for GridFsFile {
    fn path(&self) -> &str {
        &self.key
    }

    fn content_type(&self) -> Option<String> {
        Some(self.content_type.clone())
    }

    async fn url(&self) -> StorageResult<Option<String>> {
        Ok(self.url.clone())
    }

    async fn read(&self) -> StorageResult<Bytes> {
        Ok(self.object().await?.data)
    }

    async fn size(&self) -> StorageResult<u64> {
        Ok(self.object().await?.data.len() as u64)
    }

    async fn exists(&self) -> StorageResult<bool> {
        Ok(self.bucket.download(&self.key).await?.is_some())
    }

    async fn delete(&self) -> StorageResult<bool> {
        let deleted = self.bucket.delete(&self.key).await?;
        if deleted {
            tracing::info!(key = %self.key, "GridFS delete successful");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use std::path::Path;

    #[test]
    fn test_missing_connection_is_config_error() {
        let ctx = context(Path::new("/tmp"), vec![]);
        let err = GridFsStorage::new(&ctx).unwrap_err();
        assert!(err.to_string().contains("mongodb://localhost:27017/satchel"));
    }

    #[tokio::test]
    async fn test_store_retrieve_delete() {
        let bucket = Arc::new(MemoryGridFs::new());
        let ctx = context(
            Path::new("/tmp"),
            vec![
                ("grid_fs_connection", connection_value(bucket.clone())),
                ("grid_fs_access_url", ConfigValue::from("/gridfs/")),
            ],
        );
        let storage = GridFsStorage::new(&ctx).unwrap();

        let stored = storage
            .store(SanitizedFile::from_bytes(&b"pdf"[..], "doc.pdf"))
            .await
            .unwrap();
        assert_eq!(stored.path(), "uploads/doc.pdf");
        assert_eq!(
            stored.url().await.unwrap().as_deref(),
            Some("/gridfs/uploads/doc.pdf")
        );
        assert_eq!(bucket.len(), 1);

        let retrieved = storage.retrieve("doc.pdf").await.unwrap();
        assert_eq!(retrieved.content_type().as_deref(), Some("application/pdf"));
        assert_eq!(retrieved.size().await.unwrap(), 3);

        assert!(retrieved.delete().await.unwrap());
        assert!(!stored.delete().await.unwrap());
        assert!(bucket.is_empty());
        assert!(matches!(
            storage.retrieve("doc.pdf").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
