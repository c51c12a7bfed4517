//! Cache stage
//!
//! An incoming file is staged under `<root>/<cache_dir>/<cache_id>/<filename>`
//! before it is stored. The cache id encodes its creation time, so stale
//! entries can be reaped by [`clean_cached_files`] without extra metadata.

use crate::configuration::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use crate::uploader::{CachedEntry, Uploader, UploaderState};
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use satchel_core::{sanitize_filename, ConfigScope, SanitizedFile};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// Unique name of a cache directory: `YYYYMMDD-HHMMSS-<pid>-<4 digits>` (UTC).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheId(String);

impl CacheId {
    /// Fresh id for the current time.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    pub fn generate_at(now: DateTime<Utc>) -> Self {
        let token: u16 = rand::rng().random_range(0..10_000);
        CacheId(format!(
            "{}-{}-{:04}",
            now.format(TIMESTAMP_FORMAT),
            std::process::id(),
            token
        ))
    }

    /// Parse and validate an id.
    pub fn parse(id: &str) -> UploadResult<Self> {
        let invalid = || UploadError::InvalidCacheName(format!("invalid cache id: {}", id));

        let parts: Vec<&str> = id.split('-').collect();
        let [date, time, pid, token] = parts.as_slice() else {
            return Err(invalid());
        };
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if date.len() != 8
            || time.len() != 6
            || token.len() != 4
            || ![date, time, pid, token].iter().all(|s| all_digits(s))
        {
            return Err(invalid());
        }

        let cache_id = CacheId(id.to_string());
        cache_id.created_at().ok_or_else(invalid)?;
        Ok(cache_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the id.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let stamp = self.0.get(..15)?;
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split `"<cache_id>/<filename>"` and validate both parts.
pub fn parse_cache_name(cache_name: &str) -> UploadResult<(CacheId, String)> {
    let (id, filename) = cache_name.split_once('/').ok_or_else(|| {
        UploadError::InvalidCacheName(format!("expected <cache_id>/<filename>: {}", cache_name))
    })?;

    let id = CacheId::parse(id)?;
    let valid_filename = !filename.is_empty()
        && !filename.chars().all(|c| c == '.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'));
    if !valid_filename {
        return Err(UploadError::InvalidCacheName(format!(
            "invalid cached filename: {}",
            filename
        )));
    }
    Ok((id, filename.to_string()))
}

/// Exclusively create a new cache directory under `cache_path`.
pub async fn allocate_cache_dir(cache_path: &Path) -> UploadResult<(CacheId, PathBuf)> {
    fs::create_dir_all(cache_path).await?;

    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let id = CacheId::generate();
        let dir = cache_path.join(id.as_str());
        match fs::create_dir(&dir).await {
            Ok(()) => return Ok((id, dir)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(UploadError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("could not allocate a cache directory in {}", cache_path.display()),
    )))
}

/// Remove a cache directory, logging instead of failing.
pub(crate) async fn discard_cache_dir(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Failed to remove cache directory"
        ),
    }
}

/// Remove each directory, counting successes. Failures are logged and skipped.
async fn remove_cache_dirs(dirs: &[PathBuf]) -> usize {
    let mut removed = 0;
    for dir in dirs {
        match fs::remove_dir_all(dir).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to remove stale cache directory"
            ),
        }
    }
    removed
}

/// Remove cache directories created more than `older_than` ago.
///
/// Entries whose name is not a cache id are left alone. Returns the number of
/// directories removed.
pub async fn clean_cached_files(scope: &ConfigScope, older_than: Duration) -> UploadResult<usize> {
    let cache_path = scope.cache_path()?;
    let Some(cutoff) = chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
    else {
        return Ok(0);
    };

    let mut entries = match fs::read_dir(&cache_path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut stale = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(created_at) = name
            .to_str()
            .and_then(|name| CacheId::parse(name).ok())
            .and_then(|id| id.created_at())
        else {
            continue;
        };
        if created_at < cutoff {
            stale.push(entry.path());
        }
    }
    let removed = remove_cache_dirs(&stale).await;

    tracing::info!(
        path = %cache_path.display(),
        removed,
        "Cleaned cached files"
    );
    Ok(removed)
}

impl Uploader {
    /// Stage `file` in a fresh cache directory.
    ///
    /// On failure the uploader keeps the state it had before the call.
    pub async fn cache(&mut self, file: Option<SanitizedFile>) -> UploadResult<()> {
        let file = match file {
            Some(file) if !file.is_empty().await? => file,
            _ => return Err(UploadError::EmptyFile),
        };
        self.integrity_error = None;
        self.processing_error = None;

        if self.scope.validate_integrity()? {
            if let Err(message) = self.check_integrity(&file).await {
                if self.scope.ignore_integrity_errors()? {
                    tracing::warn!(error = %message, "Ignoring integrity error");
                    self.integrity_error = Some(message);
                    return Ok(());
                }
                return Err(UploadError::Integrity(message));
            }
        }

        let start = Instant::now();
        let permissions = self.scope.permissions()?;
        let filename = file
            .filename()
            .unwrap_or_else(|| sanitize_filename(""));
        let (id, dir) = allocate_cache_dir(&self.scope.cache_path()?).await?;
        let dest = dir.join(&filename);

        let staged = if self.scope.move_to_cache()? {
            let mut file = file;
            let moved = file.move_to(&dest, permissions).await;
            moved.map(|()| file)
        } else {
            file.copy_to(&dest, permissions).await
        };
        let mut staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                tracing::error!(error = %e, path = %dest.display(), "Failed to stage file in cache");
                discard_cache_dir(&dir).await;
                return Err(e.into());
            }
        };
        let mut filename = filename;

        if self.scope.enable_processing()? && !self.pipeline.is_empty() {
            match self.process(staged, &dir, &dest, permissions).await {
                Ok((processed, name)) => {
                    staged = processed;
                    filename = name;
                }
                Err(message) => {
                    discard_cache_dir(&dir).await;
                    if self.scope.ignore_processing_errors()? {
                        tracing::warn!(error = %message, "Ignoring processing error");
                        self.processing_error = Some(message);
                        return Ok(());
                    }
                    return Err(UploadError::Processing(message));
                }
            }
        }

        let size = staged.size().await.unwrap_or(0);
        tracing::info!(
            path = %dir.join(&filename).display(),
            key = %format!("{}/{}", id, filename),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File cached"
        );

        self.cached = Some(CachedEntry {
            id,
            filename,
            file: staged,
        });
        self.state = UploaderState::Cached;
        Ok(())
    }

    /// `"<cache_id>/<filename>"` of the cached file, if any.
    pub fn cache_name(&self) -> Option<String> {
        self.cached
            .as_ref()
            .map(|entry| format!("{}/{}", entry.id, entry.filename))
    }

    /// Point the uploader at a file cached earlier, without validating it again.
    pub async fn retrieve_from_cache(&mut self, cache_name: &str) -> UploadResult<()> {
        let (id, filename) = parse_cache_name(cache_name)?;
        let path = self.scope.cache_path()?.join(id.as_str()).join(&filename);

        tracing::debug!(path = %path.display(), "Retrieved file from cache");
        self.cached = Some(CachedEntry {
            id,
            filename,
            file: SanitizedFile::from_path(path),
        });
        self.state = UploaderState::Cached;
        Ok(())
    }

    async fn check_integrity(&self, file: &SanitizedFile) -> Result<(), String> {
        for check in &self.integrity_checks {
            if let Err(message) = check.check(file).await {
                tracing::debug!(check = check.name(), error = %message, "Integrity check failed");
                return Err(message);
            }
        }
        Ok(())
    }

    /// Run the pipeline and persist its result inside the cache directory.
    async fn process(
        &self,
        staged: SanitizedFile,
        dir: &Path,
        dest: &Path,
        permissions: Option<u32>,
    ) -> Result<(SanitizedFile, String), String> {
        let mut processed = self.pipeline.execute(staged).await?;

        let filename = processed
            .filename()
            .unwrap_or_else(|| sanitize_filename(""));
        let target = dir.join(&filename);
        if processed.path().as_deref() != Some(target.as_path()) {
            processed
                .move_to(&target, permissions)
                .await
                .map_err(|e| e.to_string())?;
        }
        if target != dest {
            match fs::remove_file(dest).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok((processed, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cache_id_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = CacheId::generate_at(now);
        assert!(id.as_str().starts_with("20240309-140507-"));
        assert_eq!(CacheId::parse(id.as_str()).unwrap(), id);
        assert_eq!(id.created_at(), Some(now));
    }

    #[test]
    fn test_cache_id_rejects_malformed_ids() {
        for id in [
            "",
            "20240309-140507",
            "20240309-140507-12-123",
            "20241309-140507-12-1234",
            "2024030-140507-12-1234",
            "../../etc-140507-12-1234",
            "20240309-140507--1234",
        ] {
            assert!(CacheId::parse(id).is_err(), "{} should be rejected", id);
        }
    }

    #[test]
    fn test_parse_cache_name() {
        let (id, filename) = parse_cache_name("20240309-140507-42-0001/photo_1.jpg").unwrap();
        assert_eq!(id.as_str(), "20240309-140507-42-0001");
        assert_eq!(filename, "photo_1.jpg");

        for name in [
            "20240309-140507-42-0001",
            "20240309-140507-42-0001/",
            "20240309-140507-42-0001/..",
            "20240309-140507-42-0001/../../etc/passwd",
            "20240309-140507-42-0001/my file.jpg",
            "nope/photo.jpg",
        ] {
            assert!(
                matches!(parse_cache_name(name), Err(UploadError::InvalidCacheName(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_allocate_cache_dir_creates_unique_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("uploads/tmp");

        let (a, dir_a) = allocate_cache_dir(&cache).await.unwrap();
        let (b, dir_b) = allocate_cache_dir(&cache).await.unwrap();
        assert_ne!(a, b);
        assert!(dir_a.is_dir());
        assert!(dir_b.is_dir());
        assert_eq!(dir_a.parent(), Some(cache.as_path()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_never_share_a_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("uploads/tmp");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.spawn(async move { allocate_cache_dir(&cache).await.unwrap() });
        }

        let mut ids = std::collections::HashSet::new();
        let mut dirs = std::collections::HashSet::new();
        while let Some(result) = tasks.join_next().await {
            let (id, dir) = result.unwrap();
            assert!(dir.is_dir());
            ids.insert(id);
            dirs.insert(dir);
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(dirs.len(), 16);
        assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 16);
    }

    #[tokio::test]
    async fn test_remove_cache_dirs_continues_past_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("20000101-000000-1-0001");
        let stale = tmp.path().join("20000101-000000-1-0002");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("a.txt"), b"x").unwrap();

        let removed = remove_cache_dirs(&[gone, stale.clone()]).await;
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }
}
