//! Process-level settings
//!
//! Values that used to live in a global singleton (the application root and the
//! URL base path) are loaded once into [`Settings`] and handed to the uploader
//! configuration explicitly.

use std::env;
use std::path::PathBuf;

/// Process settings shared by every uploader class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Directory that relative `store_dir` / `cache_dir` values are resolved against.
    pub root: PathBuf,
    /// Prefix prepended to local file URLs (e.g. "/assets").
    pub base_path: Option<String>,
    /// Storage engine identifier to select instead of the default `file`.
    pub storage: Option<String>,
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_path: None,
            storage: None,
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Load settings from the environment (and a `.env` file if present).
    ///
    /// - `SATCHEL_ROOT`: defaults to the current working directory
    /// - `SATCHEL_BASE_PATH`: optional URL prefix
    /// - `SATCHEL_STORAGE`: optional storage engine identifier
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let root = match env::var("SATCHEL_ROOT") {
            Ok(root) if !root.trim().is_empty() => PathBuf::from(root),
            _ => env::current_dir()
                .map_err(|e| anyhow::anyhow!("Failed to determine current directory: {}", e))?,
        };

        let base_path = env::var("SATCHEL_BASE_PATH")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let storage = env::var("SATCHEL_STORAGE")
            .ok()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        Ok(Self {
            root,
            base_path,
            storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_base_path() {
        let settings = Settings::new("/srv/app").with_base_path("/assets");
        assert_eq!(settings.root, PathBuf::from("/srv/app"));
        assert_eq!(settings.base_path.as_deref(), Some("/assets"));
        assert_eq!(settings.storage, None);
    }
}
