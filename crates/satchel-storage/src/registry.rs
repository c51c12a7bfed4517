//! Storage engine registry
//!
//! Engines are kept in the `storage_engines` configuration map as
//! `ConfigValue::Object(StorageEngine)`, keyed by identifier. Backends whose
//! feature is disabled are still registered so that selecting them fails with
//! a clear "not available" error instead of an unknown identifier.

use crate::traits::{Storage, StorageContext, StorageError, StorageResult};
use satchel_core::ConfigValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const FILE_ENGINE: &str = "file";
pub const FOG_ENGINE: &str = "fog";
pub const S3_ENGINE: &str = "s3";
pub const GRID_FS_ENGINE: &str = "grid_fs";
pub const RIGHT_S3_ENGINE: &str = "right_s3";
pub const CLOUD_FILES_ENGINE: &str = "cloud_files";

/// Configuration keys read by the built-in backends.
pub const BACKEND_CONFIG_KEYS: &[&str] = &[
    "s3_access_policy",
    "s3_bucket",
    "s3_access_key_id",
    "s3_secret_access_key",
    "s3_cnamed",
    "s3_headers",
    "s3_region",
    "s3_use_ssl",
    "s3_authentication_timeout",
    "s3_endpoint",
    "cloud_files_username",
    "cloud_files_api_key",
    "cloud_files_container",
    "cloud_files_cdn_host",
    "cloud_files_auth_url",
    "cloud_files_snet",
    "grid_fs_connection",
    "grid_fs_database",
    "grid_fs_host",
    "grid_fs_port",
    "grid_fs_username",
    "grid_fs_password",
    "grid_fs_access_url",
    "fog_attributes",
    "fog_credentials",
    "fog_directory",
    "fog_host",
    "fog_public",
    "fog_authenticated_url_expiration",
];

type Factory = dyn Fn(&StorageContext) -> StorageResult<Arc<dyn Storage>> + Send + Sync;

/// A named constructor for a storage backend.
#[derive(Clone)]
pub struct StorageEngine {
    name: String,
    factory: Arc<Factory>,
}

impl StorageEngine {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&StorageContext) -> StorageResult<Arc<dyn Storage>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a backend instance for one uploader.
    pub fn build(&self, ctx: &StorageContext) -> StorageResult<Arc<dyn Storage>> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEngine")
            .field("name", &self.name)
            .finish()
    }
}

impl From<StorageEngine> for ConfigValue {
    fn from(engine: StorageEngine) -> Self {
        ConfigValue::object(engine)
    }
}

/// Extract an engine from a configuration value.
pub fn engine_from_value(value: &ConfigValue) -> Option<Arc<StorageEngine>> {
    value.as_object().and_then(|obj| obj.downcast::<StorageEngine>())
}

#[allow(dead_code)]
fn unavailable(name: &'static str, feature: &'static str) -> StorageEngine {
    StorageEngine::new(name, move |_| {
        Err(StorageError::ConfigError(format!(
            "{} storage backend not available ({} feature not enabled)",
            name, feature
        )))
    })
}

/// The built-in engines, keyed by identifier.
pub fn default_engines() -> BTreeMap<String, ConfigValue> {
    let mut engines = BTreeMap::new();

    #[cfg(feature = "storage-local")]
    let file = StorageEngine::new(FILE_ENGINE, |ctx| {
        Ok(Arc::new(crate::local::LocalStorage::new(ctx)?) as Arc<dyn Storage>)
    });
    #[cfg(not(feature = "storage-local"))]
    let file = unavailable(FILE_ENGINE, "storage-local");

    #[cfg(feature = "storage-fog")]
    let fog = StorageEngine::new(FOG_ENGINE, |ctx| {
        Ok(Arc::new(crate::fog::FogStorage::new(ctx)?) as Arc<dyn Storage>)
    });
    #[cfg(not(feature = "storage-fog"))]
    let fog = unavailable(FOG_ENGINE, "storage-fog");

    #[cfg(feature = "storage-s3")]
    let s3 = StorageEngine::new(S3_ENGINE, |ctx| {
        Ok(Arc::new(crate::s3::S3Storage::new(ctx)?) as Arc<dyn Storage>)
    });
    #[cfg(not(feature = "storage-s3"))]
    let s3 = unavailable(S3_ENGINE, "storage-s3");

    #[cfg(feature = "storage-s3")]
    let right_s3 = StorageEngine::new(RIGHT_S3_ENGINE, |ctx| {
        Ok(Arc::new(crate::legacy_s3::LegacyS3Storage::new(ctx)?) as Arc<dyn Storage>)
    });
    #[cfg(not(feature = "storage-s3"))]
    let right_s3 = unavailable(RIGHT_S3_ENGINE, "storage-s3");

    #[cfg(feature = "storage-grid-fs")]
    let grid_fs = StorageEngine::new(GRID_FS_ENGINE, |ctx| {
        Ok(Arc::new(crate::grid_fs::GridFsStorage::new(ctx)?) as Arc<dyn Storage>)
    });
    #[cfg(not(feature = "storage-grid-fs"))]
    let grid_fs = unavailable(GRID_FS_ENGINE, "storage-grid-fs");

    #[cfg(feature = "storage-cloud-files")]
    let cloud_files = StorageEngine::new(CLOUD_FILES_ENGINE, |ctx| {
        Ok(Arc::new(crate::cloud_files::CloudFilesStorage::new(ctx)?) as Arc<dyn Storage>)
    });
    #[cfg(not(feature = "storage-cloud-files"))]
    let cloud_files = unavailable(CLOUD_FILES_ENGINE, "storage-cloud-files");

    for engine in [file, fog, s3, grid_fs, right_s3, cloud_files] {
        engines.insert(engine.name().to_string(), ConfigValue::from(engine));
    }
    engines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engines_are_registered() {
        let engines = default_engines();
        let names: Vec<&str> = engines.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["cloud_files", "file", "fog", "grid_fs", "right_s3", "s3"]
        );

        for (name, value) in &engines {
            let engine = engine_from_value(value).expect("engine object");
            assert_eq!(engine.name(), name);
        }
    }

    #[test]
    fn test_non_engine_values_are_ignored() {
        assert!(engine_from_value(&ConfigValue::from("file")).is_none());
        assert!(engine_from_value(&ConfigValue::object(42u8)).is_none());
    }
}
