//! Integrity checks run before a file is cached
//!
//! Each check looks at a [`SanitizedFile`] and either accepts it or returns a
//! human readable reason. The uploader turns a rejection into
//! [`UploadError::Integrity`](crate::UploadError::Integrity).

use async_trait::async_trait;
use satchel_core::SanitizedFile;

/// A content validation applied while caching.
#[async_trait]
pub trait IntegrityCheck: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn check(&self, file: &SanitizedFile) -> Result<(), String>;
}

/// Accept only files whose extension is in the allowlist (case-insensitive).
#[derive(Clone, Debug)]
pub struct ExtensionAllowlist {
    allowed: Vec<String>,
}

impl ExtensionAllowlist {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|ext| ext.into().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl IntegrityCheck for ExtensionAllowlist {
    fn name(&self) -> &'static str {
        "extension_allowlist"
    }

    async fn check(&self, file: &SanitizedFile) -> Result<(), String> {
        let extension = file.extension().map(|e| e.to_lowercase());
        match extension {
            Some(ref ext) if self.allowed.contains(ext) => Ok(()),
            Some(ext) => Err(format!(
                "Invalid file extension: {} (allowed: {:?})",
                ext, self.allowed
            )),
            None => Err(format!(
                "Invalid file extension: none (allowed: {:?})",
                self.allowed
            )),
        }
    }
}

/// Accept only files whose content type matches one of the patterns.
///
/// A pattern is either an exact type (`image/png`) or a wildcard subtype (`image/*`).
#[derive(Clone, Debug)]
pub struct ContentTypeAllowlist {
    allowed: Vec<String>,
}

impl ContentTypeAllowlist {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(|ct| ct.into().to_lowercase()).collect(),
        }
    }

    fn matches(pattern: &str, content_type: &str) -> bool {
        match pattern.strip_suffix("/*") {
            Some(top) => content_type
                .split_once('/')
                .is_some_and(|(ct_top, _)| ct_top == top),
            None => pattern == content_type,
        }
    }
}

#[async_trait]
impl IntegrityCheck for ContentTypeAllowlist {
    fn name(&self) -> &'static str {
        "content_type_allowlist"
    }

    async fn check(&self, file: &SanitizedFile) -> Result<(), String> {
        let content_type = file.content_type().to_lowercase();
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        if self
            .allowed
            .iter()
            .any(|pattern| Self::matches(pattern, &essence))
        {
            Ok(())
        } else {
            Err(format!(
                "Invalid content type: {} (allowed: {:?})",
                content_type, self.allowed
            ))
        }
    }
}

/// Accept only files whose size lies in `[min, max]` bytes.
#[derive(Clone, Copy, Debug)]
pub struct SizeRange {
    min: u64,
    max: u64,
}

impl SizeRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn at_most(max: u64) -> Self {
        Self { min: 0, max }
    }
}

#[async_trait]
impl IntegrityCheck for SizeRange {
    fn name(&self) -> &'static str {
        "size_range"
    }

    async fn check(&self, file: &SanitizedFile) -> Result<(), String> {
        let size = file.size().await.map_err(|e| e.to_string())?;

        if size > self.max {
            return Err(format!("File too large: {} bytes (max: {} bytes)", size, self.max));
        }
        if size < self.min {
            return Err(format!("File too small: {} bytes (min: {} bytes)", size, self.min));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, data: &'static [u8]) -> SanitizedFile {
        SanitizedFile::from_bytes(data, name)
    }

    #[tokio::test]
    async fn test_extension_allowlist() {
        let check = ExtensionAllowlist::new([".JPG", "png"]);
        assert!(check.check(&file("a.jpg", b"x")).await.is_ok());
        assert!(check.check(&file("a.PNG", b"x")).await.is_ok());

        let err = check.check(&file("a.exe", b"x")).await.unwrap_err();
        assert!(err.contains("exe"));
        assert!(check.check(&file("README", b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_content_type_allowlist_wildcards() {
        let check = ContentTypeAllowlist::new(["image/*", "application/pdf"]);
        assert!(check.check(&file("a.png", b"x")).await.is_ok());
        assert!(check.check(&file("a.pdf", b"x")).await.is_ok());
        assert!(check
            .check(&file("a.bin", b"x").with_content_type("image/webp; q=1"))
            .await
            .is_ok());
        assert!(check.check(&file("a.txt", b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_size_range() {
        let check = SizeRange::new(2, 4);
        assert!(check.check(&file("a.txt", b"abc")).await.is_ok());
        assert!(check
            .check(&file("a.txt", b"abcde"))
            .await
            .unwrap_err()
            .contains("too large"));
        assert!(check
            .check(&file("a.txt", b"a"))
            .await
            .unwrap_err()
            .contains("too small"));
        assert!(SizeRange::at_most(1).check(&file("a", b"a")).await.is_ok());
    }
}
