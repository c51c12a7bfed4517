//! The uploader: one file's journey from cache to storage
//!
//! An [`Uploader`] is bound to a configuration scope and holds at most one
//! cached entry and one stored handle. The cache stage lives in
//! [`crate::cache`], the store stage in [`crate::store`] and remote downloads
//! in [`crate::download`].

use crate::cache::CacheId;
use crate::configuration::UploaderConfig;
use crate::download::{HttpFetch, ReqwestFetch};
use crate::error::{UploadError, UploadResult};
use crate::integrity::IntegrityCheck;
use crate::processing::{Pipeline, ProcessStep};
use bytes::Bytes;
use satchel_core::{ConfigScope, SanitizedFile};
use satchel_storage::{Storage, StorageContext, StoredFile};
use serde::Serialize;
use std::sync::Arc;

/// Where the uploader is in the cache/store lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploaderState {
    Empty,
    Cached,
    Stored,
}

/// A file staged in the cache directory.
#[derive(Clone, Debug)]
pub(crate) struct CachedEntry {
    pub(crate) id: CacheId,
    /// Sanitized filename inside the cache directory.
    pub(crate) filename: String,
    pub(crate) file: SanitizedFile,
}

/// Cache/store state machine for a single file.
pub struct Uploader {
    pub(crate) scope: Arc<ConfigScope>,
    pub(crate) integrity_checks: Vec<Arc<dyn IntegrityCheck>>,
    pub(crate) pipeline: Pipeline,
    pub(crate) fetcher: Arc<dyn HttpFetch>,
    /// Last backend built, with the engine name and context it was built from.
    pub(crate) backend: Option<(String, StorageContext, Arc<dyn Storage>)>,
    pub(crate) state: UploaderState,
    pub(crate) cached: Option<CachedEntry>,
    pub(crate) stored: Option<Arc<dyn StoredFile>>,
    pub(crate) integrity_error: Option<String>,
    pub(crate) processing_error: Option<String>,
}

impl Uploader {
    /// Create an uploader reading its settings from `scope`.
    pub fn new(scope: Arc<ConfigScope>) -> UploadResult<Self> {
        Ok(Self::with_fetcher(scope, Arc::new(ReqwestFetch::new()?)))
    }

    /// Create an uploader with a custom HTTP transport for downloads.
    pub fn with_fetcher(scope: Arc<ConfigScope>, fetcher: Arc<dyn HttpFetch>) -> Self {
        Self {
            scope,
            integrity_checks: Vec::new(),
            pipeline: Pipeline::new(),
            fetcher,
            backend: None,
            state: UploaderState::Empty,
            cached: None,
            stored: None,
            integrity_error: None,
            processing_error: None,
        }
    }

    pub fn with_integrity_check(mut self, check: Arc<dyn IntegrityCheck>) -> Self {
        self.integrity_checks.push(check);
        self
    }

    pub fn with_processing_step(mut self, step: Arc<dyn ProcessStep>) -> Self {
        self.pipeline.add_step(step);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn scope(&self) -> &Arc<ConfigScope> {
        &self.scope
    }

    pub fn state(&self) -> UploaderState {
        self.state
    }

    /// Nothing cached and nothing stored.
    pub fn is_blank(&self) -> bool {
        self.cached.is_none() && self.stored.is_none()
    }

    /// Cached file, if any.
    pub fn cached_file(&self) -> Option<&SanitizedFile> {
        self.cached.as_ref().map(|entry| &entry.file)
    }

    /// Current stored handle, if any.
    pub fn stored_file(&self) -> Option<&Arc<dyn StoredFile>> {
        self.stored.as_ref()
    }

    /// Identifier of the stored file, to hand back to `retrieve_from_store`.
    pub fn identifier(&self) -> Option<String> {
        self.stored
            .as_ref()
            .map(|stored| stored.identifier().to_string())
    }

    /// Backend key of the stored file, else the cached file's path on disk.
    pub fn path(&self) -> Option<String> {
        if let Some(stored) = &self.stored {
            return Some(stored.path().to_string());
        }
        self.cached
            .as_ref()
            .and_then(|entry| entry.file.path())
            .map(|path| path.to_string_lossy().into_owned())
    }

    pub fn content_type(&self) -> Option<String> {
        match (&self.stored, &self.cached) {
            (Some(stored), _) => stored.content_type(),
            (None, Some(entry)) => Some(entry.file.content_type()),
            (None, None) => None,
        }
    }

    /// URL of the stored file; for a cached file, its path below `root`.
    pub async fn url(&self) -> UploadResult<Option<String>> {
        if let Some(stored) = &self.stored {
            return Ok(stored.url().await?);
        }
        let Some(entry) = &self.cached else {
            return Ok(None);
        };
        let relative = format!(
            "/{}/{}/{}",
            self.scope.cache_dir()?.trim_matches('/'),
            entry.id,
            entry.filename
        );
        Ok(Some(match self.scope.base_path()? {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), relative),
            None => relative,
        }))
    }

    pub async fn read(&self) -> UploadResult<Option<Bytes>> {
        if let Some(stored) = &self.stored {
            return Ok(Some(stored.read().await?));
        }
        match &self.cached {
            Some(entry) => Ok(Some(entry.file.read().await?)),
            None => Ok(None),
        }
    }

    pub async fn size(&self) -> UploadResult<u64> {
        if let Some(stored) = &self.stored {
            return Ok(stored.size().await?);
        }
        match &self.cached {
            Some(entry) => Ok(entry.file.size().await?),
            None => Ok(0),
        }
    }

    /// Integrity and processing errors swallowed by the last `cache` call.
    ///
    /// Each kind is reported only while the matching `validate_*` flag is set.
    pub fn errors(&self) -> UploadResult<Vec<UploadError>> {
        let mut errors = Vec::new();
        if let Some(message) = &self.integrity_error {
            if self.scope.validate_integrity()? {
                errors.push(UploadError::Integrity(message.clone()));
            }
        }
        if let Some(message) = &self.processing_error {
            if self.scope.validate_processing()? {
                errors.push(UploadError::Processing(message.clone()));
            }
        }
        Ok(errors)
    }

    pub fn integrity_error(&self) -> Option<&str> {
        self.integrity_error.as_deref()
    }

    pub fn processing_error(&self) -> Option<&str> {
        self.processing_error.as_deref()
    }

    /// Values handed to the storage backend.
    pub fn storage_context(&self) -> UploadResult<StorageContext> {
        Ok(StorageContext {
            root: self.scope.root()?,
            store_dir: self.scope.store_dir()?,
            base_path: self.scope.base_path()?,
            permissions: self.scope.permissions()?,
            move_to_store: self.scope.move_to_store()?,
            scope: self.scope.clone(),
        })
    }

    /// Backend for the active engine, built on first use and rebuilt when
    /// another engine is selected or the storage settings changed.
    pub(crate) fn storage(&mut self) -> UploadResult<Arc<dyn Storage>> {
        let engine = self.scope.storage_engine()?;
        let context = self.storage_context()?;
        if let Some((name, built_with, backend)) = &self.backend {
            if name == engine.name() && built_with.same_settings(&context) {
                return Ok(backend.clone());
            }
        }

        let backend = engine.build(&context)?;
        tracing::debug!(
            engine = engine.name(),
            store_dir = %context.store_dir,
            "Storage backend built"
        );
        self.backend = Some((engine.name().to_string(), context, backend.clone()));
        Ok(backend)
    }

    /// Snapshot for display.
    pub async fn summary(&self) -> UploadResult<UploaderSummary> {
        Ok(UploaderSummary {
            state: self.state,
            cache_name: self.cache_name(),
            identifier: self.identifier(),
            path: self.path(),
            url: self.url().await?,
            content_type: self.content_type(),
            size_bytes: self.size().await?,
            errors: self.errors()?.iter().map(ToString::to_string).collect(),
        })
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("scope", &self.scope.name())
            .field("state", &self.state)
            .field("cache_name", &self.cache_name())
            .field("stored", &self.stored)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// Serializable view of an uploader.
#[derive(Clone, Debug, Serialize)]
pub struct UploaderSummary {
    pub state: UploaderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
