//! Remote fetcher
//!
//! [`RemoteFile`] wraps an http(s) URL into an [`UploadedFile`] that is only
//! fetched on first use. The transport sits behind [`HttpFetch`];
//! [`ReqwestFetch`] is the default.

use crate::configuration::UploaderConfig;
use crate::error::{UploadError, UploadResult};
use crate::uploader::Uploader;
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use satchel_core::sanitized_file::split_extension;
use satchel_core::{SanitizedFile, UploadedFile};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Characters escaped when normalising a URI. Reserved URI delimiters stay as is.
const URI_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A fetched remote resource.
#[derive(Clone, Debug)]
pub struct FetchedResource {
    /// URL the content was finally served from, after redirects.
    pub base_uri: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// HTTP transport used by the remote fetcher.
#[async_trait]
pub trait HttpFetch: Send + Sync + std::fmt::Debug {
    async fn open(&self, url: &str) -> UploadResult<FetchedResource>;
}

/// [`HttpFetch`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> UploadResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn open(&self, url: &str) -> UploadResult<FetchedResource> {
        let start = std::time::Instant::now();

        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %url, "Failed to download from URL");
            UploadError::Download(format!("Failed to download from URL: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(UploadError::Download(format!(
                "URL returned status code: {}",
                response.status()
            )));
        }

        let base_uri = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| UploadError::Download(format!("Failed to read response body: {}", e)))?;

        tracing::info!(
            url = %url,
            base_uri = %base_uri,
            size_bytes = body.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Remote file downloaded"
        );

        Ok(FetchedResource {
            base_uri,
            content_type,
            body,
        })
    }
}

/// Round-trip `uri` through unescape and escape, then check that it is an
/// http(s) URL.
pub fn normalize_uri(uri: &str) -> UploadResult<reqwest::Url> {
    let decoded = percent_decode_str(uri.trim()).decode_utf8_lossy();
    let escaped = utf8_percent_encode(&decoded, URI_ESCAPE).to_string();

    let url = reqwest::Url::parse(&escaped)
        .map_err(|e| UploadError::Download(format!("invalid URI {}: {}", uri, e)))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(UploadError::Download(
            "trying to download a file which is not served over HTTP".to_string(),
        )),
    }
}

/// Remote resource presented as an uploaded file.
///
/// Nothing is fetched until the filename, content or size is asked for.
#[derive(Debug)]
pub struct RemoteFile {
    url: reqwest::Url,
    fetcher: Arc<dyn HttpFetch>,
    set_extension_by_mime_type: bool,
    resource: OnceCell<FetchedResource>,
}

impl RemoteFile {
    pub fn new(
        uri: &str,
        fetcher: Arc<dyn HttpFetch>,
        set_extension_by_mime_type: bool,
    ) -> UploadResult<Self> {
        Ok(Self {
            url: normalize_uri(uri)?,
            fetcher,
            set_extension_by_mime_type,
            resource: OnceCell::new(),
        })
    }

    /// Normalised request URL.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_fetched(&self) -> bool {
        self.resource.initialized()
    }

    async fn resource(&self) -> UploadResult<&FetchedResource> {
        self.resource
            .get_or_try_init(|| self.fetcher.open(self.url.as_str()))
            .await
    }

    /// Fetch the resource if needed and return its filename.
    pub async fn filename(&self) -> UploadResult<String> {
        let resource = self.resource().await?;
        Ok(self.derive_filename(resource))
    }

    pub async fn bytes(&self) -> UploadResult<Bytes> {
        Ok(self.resource().await?.body.clone())
    }

    fn derive_filename(&self, resource: &FetchedResource) -> String {
        let raw = basename(&resource.base_uri);
        if !self.set_extension_by_mime_type {
            return raw;
        }
        let Some(essence) = resource.content_type.as_deref().map(mime_essence) else {
            return raw;
        };
        let registered = match mime_guess::get_mime_extensions_str(&essence) {
            Some(exts) if !exts.is_empty() => exts,
            _ => return raw,
        };
        let current = split_extension(&raw).1.unwrap_or_default().to_lowercase();
        if registered.contains(&current.as_str()) {
            raw
        } else {
            format!("{}.{}", raw, preferred_extension(&essence, registered))
        }
    }
}

#[async_trait]
impl UploadedFile for RemoteFile {
    fn original_filename(&self) -> Option<String> {
        Some(match self.resource.get() {
            Some(resource) => self.derive_filename(resource),
            None => basename(self.url.as_str()),
        })
    }

    fn content_type(&self) -> Option<String> {
        self.resource
            .get()
            .and_then(|resource| resource.content_type.clone())
    }

    async fn read(&self) -> io::Result<Bytes> {
        self.bytes().await.map_err(|e| io::Error::other(e.to_string()))
    }
}

impl Uploader {
    /// Fetch `uri` and cache the result. Blank input is a no-op.
    pub async fn download(&mut self, uri: &str) -> UploadResult<()> {
        if uri.trim().is_empty() {
            return Ok(());
        }

        let remote = RemoteFile::new(
            uri,
            self.fetcher.clone(),
            self.scope.set_file_extension_by_mime_type()?,
        )?;
        let filename = remote.filename().await?;
        tracing::debug!(url = %remote.url(), filename = %filename, "Caching remote file");

        self.cache(Some(SanitizedFile::from_uploaded(Arc::new(remote))))
            .await
    }
}

/// Last path segment of `url`, percent-decoded.
fn basename(url: &str) -> String {
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let segment = path.rsplit('/').next().unwrap_or_default();
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Lowercased `type/subtype` without parameters.
fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Types whose usual extension is not their subtype.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", "txt"),
    ("text/javascript", "js"),
    ("application/javascript", "js"),
    ("text/markdown", "md"),
    ("application/octet-stream", "bin"),
    ("audio/mpeg", "mp3"),
    ("video/quicktime", "mov"),
    ("application/msword", "doc"),
    ("image/x-icon", "ico"),
];

/// Extension to append for `essence`. `registered` comes from `mime_guess`,
/// which lists extensions alphabetically rather than by preference.
fn preferred_extension(essence: &str, registered: &'static [&'static str]) -> &'static str {
    if let Some((_, ext)) = PREFERRED_EXTENSIONS.iter().find(|(mime, _)| *mime == essence) {
        if let Some(found) = registered.iter().find(|candidate| *candidate == ext) {
            return *found;
        }
    }

    // image/png -> png, image/svg+xml -> svg, application/x-tar -> tar
    let subtype = essence.split('/').nth(1).unwrap_or_default();
    let subtype = subtype.split('+').next().unwrap_or_default();
    let subtype = subtype.strip_prefix("x-").unwrap_or(subtype);
    if let Some(found) = registered.iter().find(|candidate| **candidate == subtype) {
        return *found;
    }

    registered
        .iter()
        .find(|candidate| mime_guess::from_ext(**candidate).first_raw() == Some(essence))
        .or_else(|| registered.first())
        .copied()
        .unwrap_or_default()
}
