use crate::keys;
use crate::registry::FILE_ENGINE;
use crate::traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};
use async_trait::async_trait;
use bytes::Bytes;
use satchel_core::SanitizedFile;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Local filesystem storage implementation
///
/// Files land in `<root>/<store_dir>/<filename>`; an absolute `store_dir` is
/// used as is.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    dir: PathBuf,
    store_dir: String,
    base_path: Option<String>,
    permissions: Option<u32>,
    move_to_store: bool,
}

impl LocalStorage {
    pub fn new(ctx: &StorageContext) -> StorageResult<Self> {
        if Path::new(&ctx.store_dir)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StorageError::ConfigError(format!(
                "store_dir must not contain '..': {}",
                ctx.store_dir
            )));
        }

        Ok(LocalStorage {
            root: ctx.root.clone(),
            dir: ctx.root.join(&ctx.store_dir),
            store_dir: ctx.store_dir.clone(),
            base_path: ctx.base_path.clone(),
            permissions: ctx.permissions,
            move_to_store: ctx.move_to_store,
        })
    }

    /// Directory files are stored in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backend key and filesystem path for an identifier, with security validation
    fn locate(&self, identifier: &str) -> StorageResult<(String, PathBuf)> {
        let key = keys::store_key(&self.store_dir, identifier)?;
        let path = self.dir.join(identifier);
        if path.parent() != Some(self.dir.as_path()) {
            return Err(StorageError::InvalidKey(
                "Identifier resolves outside storage directory".to_string(),
            ));
        }
        Ok((key, path))
    }

    /// Path relative to root, prefixed with `base_path`. Files outside root
    /// are served by their absolute path.
    fn generate_url(&self, path: &Path) -> String {
        let relative = match path.strip_prefix(&self.root) {
            Ok(rel) => format!("/{}", rel.to_string_lossy()),
            Err(_) => path.to_string_lossy().into_owned(),
        };
        match &self.base_path {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), relative),
            None => relative,
        }
    }

    fn handle(&self, key: String, path: PathBuf, content_type: String) -> Arc<dyn StoredFile> {
        let url = self.generate_url(&path);
        Arc::new(LocalFile {
            key,
            path,
            url,
            content_type,
        })
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(&self, mut file: SanitizedFile) -> StorageResult<Arc<dyn StoredFile>> {
        let filename = file
            .filename()
            .ok_or_else(|| StorageError::InvalidKey("file has no filename".to_string()))?;
        let (key, path) = self.locate(&filename)?;
        let content_type = file.content_type();

        let start = std::time::Instant::now();

        let result = if self.move_to_store {
            file.move_to(&path, self.permissions).await
        } else {
            file.copy_to(&path, self.permissions).await.map(|_| ())
        };
        result.map_err(|e| {
            tracing::error!(
                error = %e,
                path = %path.display(),
                "Local storage store failed"
            );
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);

        tracing::info!(
            path = %path.display(),
            key = %filename,
            size_bytes = size,
            moved = self.move_to_store,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage store successful"
        );

        Ok(self.handle(key, path, content_type))
    }

    async fn retrieve(&self, identifier: &str) -> StorageResult<Arc<dyn StoredFile>> {
        let (key, path) = self.locate(identifier)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(identifier.to_string()));
        }

        let content_type = keys::guess_content_type(identifier);
        tracing::debug!(path = %path.display(), "Local storage retrieve");
        Ok(self.handle(key, path, content_type))
    }

    fn engine_name(&self) -> &'static str {
        FILE_ENGINE
    }
}

/// A file persisted by [`LocalStorage`].
#[derive(Clone, Debug)]
pub struct LocalFile {
    path: PathBuf,
    key: String,
    url: String,
    content_type: String,
}

impl LocalFile {
    /// Absolute location on disk; [`StoredFile::path`] is the backend key.
    pub fn local_path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoredFile for LocalFile {
    fn path(&self) -> &str {
        &self.key
    }

    fn content_type(&self) -> Option<String> {
        Some(self.content_type.clone())
    }

    async fn url(&self) -> StorageResult<Option<String>> {
        Ok(Some(self.url.clone()))
    }

    async fn read(&self) -> StorageResult<Bytes> {
        let start = std::time::Instant::now();

        let data = fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(self.key.clone()),
            _ => StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                self.path.display(),
                e
            )),
        })?;

        tracing::info!(
            path = %self.path.display(),
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage read successful"
        );

        Ok(Bytes::from(data))
    }

    async fn size(&self) -> StorageResult<u64> {
        let meta = fs::metadata(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(self.key.clone()),
            _ => StorageError::BackendError(e.to_string()),
        })?;
        Ok(meta.len())
    }

    async fn exists(&self) -> StorageResult<bool> {
        Ok(fs::try_exists(&self.path).await.unwrap_or(false))
    }

    async fn delete(&self) -> StorageResult<bool> {
        let start = std::time::Instant::now();

        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %self.path.display(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(true)
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use satchel_core::ConfigScope;
    use tempfile::tempdir;

    fn context(root: &Path) -> StorageContext {
        StorageContext {
            root: root.to_path_buf(),
            store_dir: "uploads".to_string(),
            base_path: None,
            permissions: Some(0o644),
            move_to_store: false,
            scope: ConfigScope::base("LocalTest"),
        }
    }

    #[tokio::test]
    async fn test_local_storage_store_read() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(&context(dir.path())).unwrap();

        let stored = storage
            .store(SanitizedFile::from_bytes(&b"test data"[..], "test file.txt"))
            .await
            .unwrap();

        assert_eq!(stored.identifier(), "test_file.txt");
        assert_eq!(stored.path(), "uploads/test_file.txt");
        assert_eq!(
            stored.url().await.unwrap().as_deref(),
            Some("/uploads/test_file.txt")
        );
        assert_eq!(stored.content_type().as_deref(), Some("text/plain"));
        assert_eq!(&stored.read().await.unwrap()[..], b"test data");
        assert_eq!(stored.size().await.unwrap(), 9);
        assert!(dir.path().join("uploads/test_file.txt").exists());
    }

    #[tokio::test]
    async fn test_copy_keeps_source_and_move_removes_it() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        std::fs::write(&source, b"abc").unwrap();

        let storage = LocalStorage::new(&context(dir.path())).unwrap();
        storage
            .store(SanitizedFile::from_path(&source))
            .await
            .unwrap();
        assert!(source.exists());

        let mut ctx = context(dir.path());
        ctx.store_dir = "moved".to_string();
        ctx.move_to_store = true;
        let storage = LocalStorage::new(&ctx).unwrap();
        storage
            .store(SanitizedFile::from_path(&source))
            .await
            .unwrap();
        assert!(!source.exists());
        assert!(dir.path().join("moved/source.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.permissions = Some(0o600);
        let storage = LocalStorage::new(&ctx).unwrap();
        storage
            .store(SanitizedFile::from_bytes(&b"x"[..], "secret.txt"))
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("uploads/secret.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_url_uses_base_path() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.base_path = Some("/assets/".to_string());
        let storage = LocalStorage::new(&ctx).unwrap();

        let stored = storage
            .store(SanitizedFile::from_bytes(&b"x"[..], "a.png"))
            .await
            .unwrap();
        assert_eq!(
            stored.url().await.unwrap().as_deref(),
            Some("/assets/uploads/a.png")
        );
    }

    #[tokio::test]
    async fn test_retrieve_and_delete() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(&context(dir.path())).unwrap();
        storage
            .store(SanitizedFile::from_bytes(&b"x"[..], "a.png"))
            .await
            .unwrap();

        let retrieved = storage.retrieve("a.png").await.unwrap();
        assert_eq!(retrieved.path(), "uploads/a.png");
        assert!(retrieved.exists().await.unwrap());
        assert!(retrieved.delete().await.unwrap());
        assert!(!retrieved.delete().await.unwrap());

        let result = storage.retrieve("a.png").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(&context(dir.path())).unwrap();

        let result = storage.retrieve("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.retrieve("..").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let mut ctx = context(dir.path());
        ctx.store_dir = "../outside".to_string();
        assert!(matches!(
            LocalStorage::new(&ctx),
            Err(StorageError::ConfigError(_))
        ));
    }
}
