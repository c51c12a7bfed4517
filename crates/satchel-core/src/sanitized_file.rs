//! Sanitized file value type
//!
//! [`SanitizedFile`] wraps a payload coming from a path on disk, an in-memory
//! buffer, or an [`UploadedFile`] implementation, and exposes a normalised
//! filename, content type, size and a lazily computed SHA-256 digest.
//! `move_to` and `copy_to` are the only operations that persist content.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::OnceCell;

const MAX_FILENAME_LENGTH: usize = 255;
const FALLBACK_FILENAME: &str = "unnamed";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extensions made of two dot-separated parts that are kept together.
const COMPOUND_EXTENSIONS: &[&str] = &["tar.gz", "tar.bz2", "tar.xz"];

/// An upload handed over by a host framework (multipart part, temp file...).
#[async_trait]
pub trait UploadedFile: Send + Sync + std::fmt::Debug {
    /// Filename as sent by the client.
    fn original_filename(&self) -> Option<String>;

    /// Content type as sent by the client.
    fn content_type(&self) -> Option<String> {
        None
    }

    /// Location on disk when the upload was spooled to a temp file.
    fn path(&self) -> Option<PathBuf> {
        None
    }

    async fn read(&self) -> io::Result<Bytes>;
}

#[derive(Clone, Debug)]
enum Source {
    Path(PathBuf),
    Memory(Bytes),
    Uploaded(Arc<dyn UploadedFile>),
}

/// File content plus identity.
#[derive(Clone, Debug)]
pub struct SanitizedFile {
    source: Source,
    original_filename: Option<String>,
    content_type: Option<String>,
    digest: Arc<OnceCell<String>>,
}

impl SanitizedFile {
    /// Wrap a file on disk. The original filename is the path's basename.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let original_filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Self::with_source(Source::Path(path), original_filename)
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self::with_source(Source::Memory(data.into()), Some(filename.into()))
    }

    /// Wrap an uploaded-file reference.
    pub fn from_uploaded(upload: Arc<dyn UploadedFile>) -> Self {
        let original_filename = upload.original_filename().or_else(|| {
            upload
                .path()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        });
        let content_type = upload.content_type();
        let mut file = Self::with_source(Source::Uploaded(upload), original_filename);
        file.content_type = content_type;
        file
    }

    fn with_source(source: Source, original_filename: Option<String>) -> Self {
        Self {
            source,
            original_filename,
            content_type: None,
            digest: Arc::new(OnceCell::new()),
        }
    }

    /// Override the content type instead of guessing it from the filename.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Override the original filename (e.g. after a processing step converted the file).
    pub fn with_original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }

    /// Filename as provided, before sanitization.
    pub fn original_filename(&self) -> Option<&str> {
        self.original_filename.as_deref()
    }

    /// Sanitized filename. Never empty and never a traversal segment.
    pub fn filename(&self) -> Option<String> {
        self.original_filename.as_deref().map(sanitize_filename)
    }

    /// Filename without its extension.
    pub fn basename(&self) -> Option<String> {
        self.filename()
            .map(|name| split_extension(&name).0.to_string())
    }

    /// Extension of the sanitized filename, without the leading dot.
    pub fn extension(&self) -> Option<String> {
        self.filename()
            .and_then(|name| split_extension(&name).1.map(String::from))
    }

    /// Explicit content type, else a guess from the filename, else `application/octet-stream`.
    pub fn content_type(&self) -> String {
        if let Some(ct) = &self.content_type {
            return ct.clone();
        }
        self.original_filename
            .as_deref()
            .and_then(|name| mime_guess::from_path(name).first_raw())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }

    /// Location on disk, if the content lives in a file.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.source {
            Source::Path(path) => Some(path.clone()),
            Source::Memory(_) => None,
            Source::Uploaded(upload) => upload.path(),
        }
    }

    /// Whether this file was built from a plain path.
    pub fn is_path(&self) -> bool {
        matches!(self.source, Source::Path(_))
    }

    /// Whether the backing file exists on disk. In-memory content never does.
    pub async fn exists(&self) -> bool {
        match self.path() {
            Some(path) => fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Size in bytes. A missing file has size zero.
    pub async fn size(&self) -> io::Result<u64> {
        match &self.source {
            Source::Memory(data) => Ok(data.len() as u64),
            Source::Path(path) => file_size(path).await,
            Source::Uploaded(upload) => match upload.path() {
                Some(path) => file_size(&path).await,
                None => Ok(upload.read().await?.len() as u64),
            },
        }
    }

    /// No content at all: zero bytes and nothing on disk.
    pub async fn is_empty(&self) -> io::Result<bool> {
        Ok(self.size().await? == 0 && !self.exists().await)
    }

    pub async fn read(&self) -> io::Result<Bytes> {
        match &self.source {
            Source::Memory(data) => Ok(data.clone()),
            Source::Path(path) => Ok(Bytes::from(fs::read(path).await?)),
            Source::Uploaded(upload) => upload.read().await,
        }
    }

    /// Hex SHA-256 of the content, computed once.
    pub async fn digest(&self) -> io::Result<String> {
        self.digest
            .get_or_try_init(|| async {
                let data = self.read().await?;
                Ok::<_, io::Error>(hex::encode(Sha256::digest(&data)))
            })
            .await
            .cloned()
    }

    /// Move the content to `new_path`. Afterwards this file points at `new_path`
    /// and, for filesystem-backed sources, the old location no longer exists.
    pub async fn move_to(
        &mut self,
        new_path: impl AsRef<Path>,
        permissions: Option<u32>,
    ) -> io::Result<()> {
        let new_path = new_path.as_ref();
        if self.path().as_deref() == Some(new_path) {
            return Ok(());
        }
        ensure_parent_dir(new_path).await?;

        match &self.source {
            Source::Path(old) => rename_or_copy(old, new_path).await?,
            Source::Memory(data) => fs::write(new_path, data).await?,
            Source::Uploaded(upload) => match upload.path() {
                Some(old) => rename_or_copy(&old, new_path).await?,
                None => fs::write(new_path, upload.read().await?).await?,
            },
        }
        set_permissions(new_path, permissions).await?;

        tracing::debug!(path = %new_path.display(), "Moved file");
        self.source = Source::Path(new_path.to_path_buf());
        Ok(())
    }

    /// Copy the content to `new_path`, returning a file pointing at the copy.
    pub async fn copy_to(
        &self,
        new_path: impl AsRef<Path>,
        permissions: Option<u32>,
    ) -> io::Result<SanitizedFile> {
        let new_path = new_path.as_ref();
        if self.path().as_deref() == Some(new_path) {
            return Ok(self.clone());
        }
        ensure_parent_dir(new_path).await?;

        match self.path() {
            Some(old) => {
                fs::copy(&old, new_path).await?;
            }
            None => fs::write(new_path, self.read().await?).await?,
        }
        set_permissions(new_path, permissions).await?;

        tracing::debug!(path = %new_path.display(), "Copied file");
        Ok(SanitizedFile {
            source: Source::Path(new_path.to_path_buf()),
            original_filename: self.original_filename.clone(),
            content_type: self.content_type.clone(),
            digest: Arc::new(OnceCell::new()),
        })
    }

    /// Remove the backing file if there is one. Missing files are ignored.
    pub async fn delete(&self) -> io::Result<()> {
        if let Some(path) = self.path() {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Strip directories and replace every character outside `[A-Za-z0-9.\-+_]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let base = normalized
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    let mut sanitized: String = base
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }
    if sanitized.chars().all(|c| c == '.') {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Split `name` into base and extension. Dotfiles have no extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    for compound in COMPOUND_EXTENSIONS {
        if let Some(base) = name.strip_suffix(compound).and_then(|b| b.strip_suffix('.')) {
            if !base.is_empty() {
                return (base, Some(&name[base.len() + 1..]));
            }
        }
    }
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() && !ext.is_empty() => (base, Some(ext)),
        _ => (name, None),
    }
}

async fn file_size(path: &Path) -> io::Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn rename_or_copy(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Cross-device moves cannot be renamed.
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}

#[cfg(unix)]
async fn set_permissions(path: &Path, permissions: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = permissions {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _permissions: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct FakeUpload {
        data: &'static [u8],
    }

    #[async_trait]
    impl UploadedFile for FakeUpload {
        fn original_filename(&self) -> Option<String> {
            Some("C:\\Users\\me\\report final.pdf".to_string())
        }

        fn content_type(&self) -> Option<String> {
            Some("application/pdf".to_string())
        }

        async fn read(&self) -> io::Result<Bytes> {
            Ok(Bytes::from_static(self.data))
        }
    }

    #[test]
    fn sanitize_filename_strips_directories_and_unsafe_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\my file.jpg"), "my_file.jpg");
        assert_eq!(sanitize_filename("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_filename("a+b-c_d.txt"), "a+b-c_d.txt");
    }

    #[test]
    fn sanitize_filename_never_returns_traversal_or_empty() {
        assert_eq!(sanitize_filename(".."), "_..");
        assert_eq!(sanitize_filename("foo/.."), "_..");
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("dir/"), "dir");
    }

    #[test]
    fn split_extension_handles_compound_and_dotfiles() {
        assert_eq!(split_extension("archive.tar.gz"), ("archive", Some("tar.gz")));
        assert_eq!(split_extension("photo.JPG"), ("photo", Some("JPG")));
        assert_eq!(split_extension(".htaccess"), (".htaccess", None));
        assert_eq!(split_extension("README"), ("README", None));
    }

    #[test]
    fn content_type_is_guessed_from_filename() {
        let file = SanitizedFile::from_bytes(&b"x"[..], "photo.png");
        assert_eq!(file.content_type(), "image/png");

        let file = SanitizedFile::from_bytes(&b"x"[..], "blob");
        assert_eq!(file.content_type(), DEFAULT_CONTENT_TYPE);

        let file = SanitizedFile::from_bytes(&b"x"[..], "photo.png").with_content_type("image/webp");
        assert_eq!(file.content_type(), "image/webp");
    }

    #[tokio::test]
    async fn uploaded_files_expose_client_metadata() {
        let file = SanitizedFile::from_uploaded(Arc::new(FakeUpload { data: b"%PDF" }));

        assert_eq!(file.filename().as_deref(), Some("report_final.pdf"));
        assert_eq!(file.basename().as_deref(), Some("report_final"));
        assert_eq!(file.extension().as_deref(), Some("pdf"));
        assert_eq!(file.content_type(), "application/pdf");
        assert_eq!(file.size().await.unwrap(), 4);
        assert!(!file.is_path());
    }

    #[tokio::test]
    async fn move_to_relocates_file_on_disk() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.txt");
        std::fs::write(&src, b"hello").unwrap();

        let mut file = SanitizedFile::from_path(&src);
        let dest = dir.path().join("nested/out.txt");
        file.move_to(&dest, Some(0o644)).await.unwrap();

        assert!(!src.exists());
        assert_eq!(file.path().as_deref(), Some(dest.as_path()));
        assert_eq!(file.read().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(file.original_filename(), Some("in.txt"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }

    #[tokio::test]
    async fn copy_to_leaves_source_in_place() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.txt");
        std::fs::write(&src, b"hello").unwrap();

        let file = SanitizedFile::from_path(&src);
        let copy = file.copy_to(dir.path().join("out.txt"), None).await.unwrap();

        assert!(src.exists());
        assert_eq!(copy.read().await.unwrap(), file.read().await.unwrap());
    }

    #[tokio::test]
    async fn memory_files_become_path_backed_after_move() {
        let dir = tempdir().unwrap();
        let mut file = SanitizedFile::from_bytes(&b"data"[..], "a.bin");
        assert!(!file.exists().await);

        file.move_to(dir.path().join("a.bin"), None).await.unwrap();
        assert!(file.is_path());
        assert!(file.exists().await);
    }

    #[tokio::test]
    async fn empty_detection_matches_missing_content() {
        let dir = tempdir().unwrap();
        assert!(SanitizedFile::from_bytes(Bytes::new(), "a.txt").is_empty().await.unwrap());
        assert!(SanitizedFile::from_path(dir.path().join("missing"))
            .is_empty()
            .await
            .unwrap());

        let zero = dir.path().join("zero");
        std::fs::write(&zero, b"").unwrap();
        assert!(!SanitizedFile::from_path(&zero).is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn digest_is_sha256_hex() {
        let file = SanitizedFile::from_bytes(&b"abc"[..], "abc.txt");
        assert_eq!(
            file.digest().await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
