//! Shared plumbing for the backends built on `object_store`.
//!
//! S3, legacy S3, fog and Cloud Files differ in how they connect and how they
//! build URLs; putting, reading and deleting objects is the same for all of them.

use crate::keys;
use crate::traits::{StorageError, StorageResult, StoredFile};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
    Result as ObjectResult,
};
use satchel_core::{ConfigValue, SanitizedFile};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a stored object is addressed from outside.
#[derive(Clone)]
pub enum ObjectUrl {
    Public(String),
    Signed {
        signer: Arc<dyn Signer>,
        expires_in: Duration,
    },
    Unavailable,
}

impl fmt::Debug for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectUrl::Public(url) => f.debug_tuple("Public").field(url).finish(),
            ObjectUrl::Signed { expires_in, .. } => f
                .debug_struct("Signed")
                .field("expires_in", expires_in)
                .finish(),
            ObjectUrl::Unavailable => f.write_str("Unavailable"),
        }
    }
}

/// Object store plus the bucket label used in logs.
#[derive(Clone)]
pub(crate) struct ObjectBucket {
    pub store: Arc<dyn ObjectStore>,
    pub label: &'static str,
    pub bucket: String,
    pub store_dir: String,
    pub headers: BTreeMap<String, String>,
}

impl ObjectBucket {
    /// Upload `file` under `<store_dir>/<filename>`; returns the key and content type.
    pub async fn put(&self, file: &SanitizedFile) -> StorageResult<(String, String)> {
        let filename = file
            .filename()
            .ok_or_else(|| StorageError::InvalidKey("file has no filename".to_string()))?;
        let key = keys::store_key(&self.store_dir, &filename)?;
        let content_type = file.content_type();
        let data = file.read().await?;
        let size = data.len() as u64;
        let location = Path::from(key.clone());

        let start = std::time::Instant::now();

        let options = PutOptions::from(attributes(&content_type, &self.headers));
        let result: ObjectResult<_> = self
            .store
            .put_opts(&location, PutPayload::from(data), options)
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                backend = self.label,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            backend = self.label,
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object upload successful"
        );

        Ok((key, content_type))
    }

    /// Key for `identifier`, failing with `NotFound` when no such object exists.
    pub async fn existing_key(&self, identifier: &str) -> StorageResult<String> {
        let key = keys::store_key(&self.store_dir, identifier)?;
        if !object_exists(self.store.as_ref(), &key).await? {
            return Err(StorageError::NotFound(identifier.to_string()));
        }
        Ok(key)
    }

    pub fn handle(&self, key: String, content_type: String, url: ObjectUrl) -> Arc<dyn StoredFile> {
        Arc::new(ObjectFile {
            store: Arc::clone(&self.store),
            label: self.label,
            key,
            content_type,
            url,
        })
    }
}

/// A file persisted in an object store.
#[derive(Clone)]
pub struct ObjectFile {
    store: Arc<dyn ObjectStore>,
    label: &'static str,
    key: String,
    content_type: String,
    url: ObjectUrl,
}

impl fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFile")
            .field("backend", &self.label)
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .field("url", &self.url)
            .finish()
    }
}

#[async_trait]
impl StoredFile for ObjectFile {
    fn path(&self) -> &str {
        &self.key
    }

    fn content_type(&self) -> Option<String> {
        Some(self.content_type.clone())
    }

    async fn url(&self) -> StorageResult<Option<String>> {
        match &self.url {
            ObjectUrl::Public(url) => Ok(Some(url.clone())),
            ObjectUrl::Signed { signer, expires_in } => {
                let location = Path::from(self.key.clone());
                let url_result: ObjectResult<_> =
                    signer.signed_url(Method::GET, &location, *expires_in).await;
                let url = url_result
                    .map_err(|e| StorageError::BackendError(e.to_string()))?
                    .to_string();
                Ok(Some(url))
            }
            ObjectUrl::Unavailable => Ok(None),
        }
    }

    async fn read(&self) -> StorageResult<Bytes> {
        let start = std::time::Instant::now();
        let location = Path::from(self.key.clone());

        let result: ObjectResult<_> = self.store.get(&location).await;

        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(self.key.clone()),
            other => {
                tracing::error!(
                    error = %other,
                    backend = self.label,
                    key = %self.key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        tracing::info!(
            backend = self.label,
            key = %self.key,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object download successful"
        );

        Ok(bytes)
    }

    async fn size(&self) -> StorageResult<u64> {
        let location = Path::from(self.key.clone());
        match self.store.head(&location).await {
            Ok(meta) => Ok(meta.size),
            Err(ObjectStoreError::NotFound { .. }) => Err(StorageError::NotFound(self.key.clone())),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn exists(&self) -> StorageResult<bool> {
        object_exists(self.store.as_ref(), &self.key).await
    }

    async fn delete(&self) -> StorageResult<bool> {
        if !object_exists(self.store.as_ref(), &self.key).await? {
            return Ok(false);
        }

        let start = std::time::Instant::now();
        let location = Path::from(self.key.clone());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                backend = self.label,
                key = %self.key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object delete failed"
            );
            StorageError::DeleteFailed(e.to_string())
        })?;

        tracing::info!(
            backend = self.label,
            key = %self.key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object delete successful"
        );

        Ok(true)
    }
}

async fn object_exists(store: &dyn ObjectStore, key: &str) -> StorageResult<bool> {
    let location = Path::from(key.to_string());
    match store.head(&location).await {
        Ok(_) => Ok(true),
        Err(ObjectStoreError::NotFound { .. }) => Ok(false),
        Err(e) => Err(StorageError::BackendError(e.to_string())),
    }
}

/// Object attributes from the content type and the configured headers.
///
/// Well-known HTTP headers map to their attribute; anything else is stored as
/// user metadata. A configured `Content-Type` wins over the file's own.
pub(crate) fn attributes(content_type: &str, headers: &BTreeMap<String, String>) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::ContentType,
        AttributeValue::from(content_type.to_string()),
    );

    for (name, value) in headers {
        let attribute = match name.to_ascii_lowercase().as_str() {
            "content-type" => Attribute::ContentType,
            "cache-control" => Attribute::CacheControl,
            "content-disposition" => Attribute::ContentDisposition,
            "content-encoding" => Attribute::ContentEncoding,
            "content-language" => Attribute::ContentLanguage,
            _ => Attribute::Metadata(Cow::Owned(name.clone())),
        };
        attributes.insert(attribute, AttributeValue::from(value.clone()));
    }
    attributes
}

/// Flatten a configuration map of scalars into strings.
pub(crate) fn string_map(map: Option<BTreeMap<String, ConfigValue>>) -> BTreeMap<String, String> {
    map.unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| {
            let value = match value.evaluate() {
                ConfigValue::Str(s) | ConfigValue::Symbol(s) => s,
                ConfigValue::Int(i) => i.to_string(),
                ConfigValue::Bool(b) => b.to_string(),
                ConfigValue::Path(p) => p.to_string_lossy().into_owned(),
                _ => return None,
            };
            Some((name, value))
        })
        .collect()
}

/// `http` or `https` depending on a `*_use_ssl` style flag.
pub(crate) fn scheme(use_ssl: bool) -> &'static str {
    if use_ssl {
        "https"
    } else {
        "http"
    }
}
