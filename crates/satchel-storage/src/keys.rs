//! Shared key generation for storage backends.
//!
//! Key format: `{store_dir}/{filename}`. All backends use it so a stored file's
//! identifier (the filename) is enough to rebuild its key.

use crate::traits::{StorageError, StorageResult};

/// Build the storage key for `filename` under `store_dir`.
///
/// Leading and trailing slashes of `store_dir` are dropped, so an absolute local
/// store dir still yields a relative object key.
pub fn store_key(store_dir: &str, filename: &str) -> StorageResult<String> {
    validate_filename(filename)?;
    let dir = store_dir.trim_matches('/');
    let key = if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", dir, filename)
    };
    validate_key(&key)?;
    Ok(key)
}

/// Reject keys with a `..` segment, an empty segment or a leading `/`.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Percent-encode each segment of `key` for use in a URL path.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Content type guessed from an identifier, for handles rebuilt without metadata.
pub fn guess_content_type(identifier: &str) -> String {
    mime_guess::from_path(identifier)
        .first_raw()
        .unwrap_or(satchel_core::sanitized_file::DEFAULT_CONTENT_TYPE)
        .to_string()
}

fn validate_filename(filename: &str) -> StorageResult<()> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(StorageError::InvalidKey(filename.to_string()));
    }
    Ok(())
}
