//! Satchel Storage Library
//!
//! This crate provides the storage abstraction and the built-in backends:
//! local filesystem, generic cloud (fog), S3, path-style S3, GridFS and
//! Cloud Files. Each backend is behind a cargo feature.
//!
//! # Storage key format
//!
//! Every backend stores a file under `{store_dir}/{filename}`, where the filename
//! is the sanitized name of the incoming file. The filename alone is the
//! identifier used to retrieve it again.
//!
//! Keys must not contain `..` segments or a leading `/`. Key generation is
//! centralized in the `keys` module so all backends stay consistent.

#[cfg(feature = "storage-cloud-files")]
pub mod cloud_files;
#[cfg(feature = "storage-fog")]
pub mod fog;
#[cfg(feature = "storage-grid-fs")]
pub mod grid_fs;
pub mod keys;
#[cfg(feature = "storage-s3")]
pub mod legacy_s3;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(any(
    feature = "storage-fog",
    feature = "storage-s3",
    feature = "storage-cloud-files"
))]
pub mod object;
pub mod registry;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-cloud-files")]
pub use cloud_files::CloudFilesStorage;
#[cfg(feature = "storage-fog")]
pub use fog::{FogProvider, FogStorage};
#[cfg(feature = "storage-grid-fs")]
pub use grid_fs::{GridFsBucket, GridFsStorage, MemoryGridFs};
#[cfg(feature = "storage-s3")]
pub use legacy_s3::LegacyS3Storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use registry::{default_engines, engine_from_value, StorageEngine, BACKEND_CONFIG_KEYS};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageContext, StorageError, StorageResult, StoredFile};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::traits::StorageContext;
    use crate::BACKEND_CONFIG_KEYS;
    use satchel_core::{ConfigScope, ConfigValue};
    use std::path::Path;

    /// Context with every backend key registered and `settings` applied.
    pub fn context(root: &Path, settings: Vec<(&str, ConfigValue)>) -> StorageContext {
        let scope = ConfigScope::base("StorageTest");
        for key in BACKEND_CONFIG_KEYS {
            scope.add_config(*key);
        }
        for (key, value) in settings {
            scope.set(key, value).expect("registered key");
        }
        StorageContext {
            root: root.to_path_buf(),
            store_dir: "uploads".to_string(),
            base_path: None,
            permissions: None,
            move_to_store: false,
            scope,
        }
    }
}
