//! Store stage
//!
//! Hands the cached file to the active storage backend. Storage errors always
//! propagate and leave the cache entry in place so the call can be retried.

use crate::cache::discard_cache_dir;
use crate::configuration::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use crate::uploader::{Uploader, UploaderState};
use satchel_core::SanitizedFile;
use satchel_storage::StoredFile;
use std::sync::Arc;
use std::time::Instant;

impl Uploader {
    /// Persist the cached file, caching `new_file` first when given.
    ///
    /// Without a new file and with nothing cached this is a no-op returning the
    /// current stored handle.
    pub async fn store(
        &mut self,
        new_file: Option<SanitizedFile>,
    ) -> UploadResult<Option<Arc<dyn StoredFile>>> {
        if new_file.is_some() {
            self.cache(new_file).await?;
            if self.cached.is_none() {
                return Err(UploadError::NoCachedFile);
            }
        }

        let Some(entry) = self.cached.clone() else {
            return Ok(self.stored.clone());
        };
        if !entry.file.exists().await {
            tracing::debug!(cache_name = ?self.cache_name(), "Cached file vanished before store");
            return Err(UploadError::NoCachedFile);
        }

        let storage = self.storage()?;
        let start = Instant::now();
        let stored = storage.store(entry.file.clone()).await.map_err(|e| {
            tracing::error!(
                error = %e,
                engine = storage.engine_name(),
                cache_name = %format!("{}/{}", entry.id, entry.filename),
                "Failed to store cached file"
            );
            e
        })?;

        tracing::info!(
            engine = storage.engine_name(),
            key = %stored.path(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File stored"
        );

        let previous = self.stored.replace(stored.clone());
        self.state = UploaderState::Stored;

        let cache_dir = entry
            .file
            .path()
            .and_then(|path| path.parent().map(|dir| dir.to_path_buf()));
        if self.scope.delete_tmp_file_after_storage()? {
            if let Some(dir) = &cache_dir {
                discard_cache_dir(dir).await;
            }
            self.cached = None;
        } else if !entry.file.exists().await {
            // The backend consumed the cached file (move_to_store).
            self.cached = None;
        }

        if let Some(previous) = previous {
            if previous.path() != stored.path()
                && self.scope.remove_previously_stored_files_after_update()?
            {
                remove_previous(previous).await;
            }
        }

        Ok(Some(stored))
    }

    /// Load a handle for a stored file without touching the cache.
    pub async fn retrieve_from_store(
        &mut self,
        identifier: &str,
    ) -> UploadResult<Arc<dyn StoredFile>> {
        let storage = self.storage()?;
        let stored = storage.retrieve(identifier).await?;

        tracing::info!(
            engine = storage.engine_name(),
            key = %stored.path(),
            "Retrieved file from store"
        );
        self.stored = Some(stored.clone());
        self.state = UploaderState::Stored;
        Ok(stored)
    }

    /// Delete the stored file and reset the uploader.
    ///
    /// Returns `false` when there was nothing stored or the backend had
    /// already lost the file.
    pub async fn remove(&mut self) -> UploadResult<bool> {
        let deleted = match &self.stored {
            Some(stored) => {
                let deleted = stored.delete().await?;
                tracing::info!(key = %stored.path(), deleted, "Removed stored file");
                deleted
            }
            None => false,
        };

        self.stored = None;
        self.cached = None;
        self.integrity_error = None;
        self.processing_error = None;
        self.state = UploaderState::Empty;
        Ok(deleted)
    }
}

async fn remove_previous(previous: Arc<dyn StoredFile>) {
    match previous.delete().await {
        Ok(_) => tracing::info!(key = %previous.path(), "Removed previously stored file"),
        Err(e) => tracing::warn!(
            key = %previous.path(),
            error = %e,
            "Failed to remove previously stored file"
        ),
    }
}
