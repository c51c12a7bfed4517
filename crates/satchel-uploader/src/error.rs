//! Upload errors

use satchel_core::{ConfigError, ErrorMetadata, LogLevel};
use satchel_storage::StorageError;
use thiserror::Error;

/// Errors raised by the cache, store and download stages.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file provided")]
    EmptyFile,

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("No cached file to store")]
    NoCachedFile,

    #[error("Invalid cache name: {0}")]
    InvalidCacheName(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorMetadata for UploadError {
    fn error_code(&self) -> &'static str {
        match self {
            UploadError::EmptyFile => "EMPTY_FILE",
            UploadError::Integrity(_) => "INTEGRITY_ERROR",
            UploadError::Processing(_) => "PROCESSING_ERROR",
            UploadError::Download(_) => "DOWNLOAD_ERROR",
            UploadError::NoCachedFile => "NO_CACHED_FILE",
            UploadError::InvalidCacheName(_) => "INVALID_CACHE_NAME",
            UploadError::Storage(e) => e.error_code(),
            UploadError::Config(e) => e.error_code(),
            UploadError::Io(_) => "IO_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            UploadError::Download(_) | UploadError::Io(_) => true,
            UploadError::Storage(e) => e.is_recoverable(),
            _ => false,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            UploadError::EmptyFile
            | UploadError::Integrity(_)
            | UploadError::InvalidCacheName(_)
            | UploadError::NoCachedFile => LogLevel::Debug,
            UploadError::Processing(_) | UploadError::Download(_) => LogLevel::Warn,
            UploadError::Storage(e) => e.log_level(),
            UploadError::Config(e) => e.log_level(),
            UploadError::Io(_) => LogLevel::Error,
        }
    }
}

/// Result type for uploader operations
pub type UploadResult<T> = Result<T, UploadError>;
