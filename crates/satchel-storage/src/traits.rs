//! Storage abstraction traits
//!
//! This module defines the [`Storage`] trait every backend implements and the
//! [`StoredFile`] handle a backend hands back for a persisted file.

use async_trait::async_trait;
use bytes::Bytes;
use satchel_core::{ConfigError, ConfigScope, ErrorMetadata, LogLevel, SanitizedFile};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::ConfigError(err.to_string())
    }
}

impl ErrorMetadata for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            StorageError::UploadFailed(_) => "STORAGE_UPLOAD_FAILED",
            StorageError::DownloadFailed(_) => "STORAGE_DOWNLOAD_FAILED",
            StorageError::DeleteFailed(_) => "STORAGE_DELETE_FAILED",
            StorageError::NotFound(_) => "STORAGE_NOT_FOUND",
            StorageError::InvalidKey(_) => "STORAGE_INVALID_KEY",
            StorageError::BackendError(_) => "STORAGE_BACKEND_ERROR",
            StorageError::IoError(_) => "STORAGE_IO_ERROR",
            StorageError::ConfigError(_) => "STORAGE_CONFIG_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_)
                | StorageError::DownloadFailed(_)
                | StorageError::DeleteFailed(_)
                | StorageError::BackendError(_)
                | StorageError::IoError(_)
        )
    }

    fn log_level(&self) -> LogLevel {
        match self {
            StorageError::NotFound(_) | StorageError::InvalidKey(_) => LogLevel::Debug,
            _ => LogLevel::Error,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Everything a backend needs from the uploader that builds it.
///
/// Values that every backend uses are resolved up front; provider-specific keys
/// (bucket, credentials, hosts) are read from `scope` by the backend itself.
#[derive(Clone, Debug)]
pub struct StorageContext {
    pub root: PathBuf,
    pub store_dir: String,
    pub base_path: Option<String>,
    pub permissions: Option<u32>,
    pub move_to_store: bool,
    pub scope: Arc<ConfigScope>,
}

impl StorageContext {
    /// Whether a backend built from `other` would see the same common settings.
    pub fn same_settings(&self, other: &StorageContext) -> bool {
        self.root == other.root
            && self.store_dir == other.store_dir
            && self.base_path == other.base_path
            && self.permissions == other.permissions
            && self.move_to_store == other.move_to_store
            && Arc::ptr_eq(&self.scope, &other.scope)
    }

    /// Optional string setting from the uploader's configuration.
    pub fn config_str(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .scope
            .read_str(key)?
            .filter(|value| !value.trim().is_empty()))
    }

    /// Required string setting; missing or blank values are a configuration error.
    pub fn require_str(&self, key: &str) -> StorageResult<String> {
        self.config_str(key)?
            .ok_or_else(|| StorageError::ConfigError(format!("{} not configured", key)))
    }

    pub fn config_bool(&self, key: &str) -> StorageResult<Option<bool>> {
        Ok(self.scope.read_bool(key)?)
    }

    pub fn config_int(&self, key: &str) -> StorageResult<Option<i64>> {
        Ok(self.scope.read_int(key)?)
    }
}

/// Storage abstraction trait
///
/// A backend persists a [`SanitizedFile`] under `<store_dir>/<filename>` and can
/// later rebuild a handle from the identifier (the stored filename).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist `file` and return a handle to the stored copy.
    async fn store(&self, file: SanitizedFile) -> StorageResult<Arc<dyn StoredFile>>;

    /// Rebuild a handle for a previously stored file.
    ///
    /// Fails with [`StorageError::NotFound`] when nothing is stored under `identifier`.
    async fn retrieve(&self, identifier: &str) -> StorageResult<Arc<dyn StoredFile>>;

    /// Registry identifier of this backend ("file", "s3"...).
    fn engine_name(&self) -> &'static str;
}

/// Handle to a persisted file, independent of the backend holding it.
#[async_trait]
pub trait StoredFile: Send + Sync + std::fmt::Debug {
    /// Backend key, `<store_dir>/<filename>`.
    fn path(&self) -> &str;

    /// Identifier to hand back to [`Storage::retrieve`]: the stored filename.
    fn identifier(&self) -> &str {
        let path = self.path();
        path.rsplit('/').next().unwrap_or(path)
    }

    fn content_type(&self) -> Option<String>;

    /// Public or signed URL, when the backend can serve one.
    async fn url(&self) -> StorageResult<Option<String>>;

    async fn read(&self) -> StorageResult<Bytes>;

    async fn size(&self) -> StorageResult<u64>;

    async fn exists(&self) -> StorageResult<bool>;

    /// Remove the file. Returns `false` when it was already gone.
    async fn delete(&self) -> StorageResult<bool>;
}
