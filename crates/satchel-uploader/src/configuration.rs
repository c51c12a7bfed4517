//! Uploader configuration keys and their defaults
//!
//! [`register_keys`] declares every setting an uploader reads, [`reset_config`]
//! restores the documented defaults, and [`UploaderConfig`] gives typed access
//! to the values the cache and store stages need.

use satchel_core::{ConfigError, ConfigScope, ConfigValue, Settings};
use satchel_storage::registry::FILE_ENGINE;
use satchel_storage::{default_engines, engine_from_value, StorageEngine, BACKEND_CONFIG_KEYS};
use std::path::PathBuf;
use std::sync::Arc;

/// Settings read by the uploader itself.
pub const UPLOADER_CONFIG_KEYS: &[&str] = &[
    "root",
    "base_path",
    "permissions",
    "storage",
    "storage_engines",
    "store_dir",
    "cache_dir",
    "enable_processing",
    "validate_integrity",
    "validate_processing",
    "ignore_integrity_errors",
    "ignore_processing_errors",
    "move_to_cache",
    "move_to_store",
    "delete_tmp_file_after_storage",
    "remove_previously_stored_files_after_update",
    "set_file_extension_by_mime_type",
];

pub const DEFAULT_PERMISSIONS: i64 = 0o644;
pub const DEFAULT_STORE_DIR: &str = "uploads";
pub const DEFAULT_CACHE_DIR: &str = "uploads/tmp";

/// Register every uploader and backend key on `scope`.
pub fn register_keys(scope: &ConfigScope) {
    for key in UPLOADER_CONFIG_KEYS.iter().chain(BACKEND_CONFIG_KEYS) {
        scope.add_config(*key);
    }
}

/// Build a root uploader scope with every key registered and the defaults applied.
pub fn base_scope(name: &str, settings: &Settings) -> Result<Arc<ConfigScope>, ConfigError> {
    let scope = ConfigScope::base(name);
    register_keys(&scope);
    reset_config(&scope, settings)?;
    Ok(scope)
}

/// Restore the documented defaults in one transaction.
///
/// Keys without a default are left as they are.
pub fn reset_config(scope: &ConfigScope, settings: &Settings) -> Result<(), ConfigError> {
    let root = settings.root.clone();
    let storage = settings
        .storage
        .clone()
        .unwrap_or_else(|| FILE_ENGINE.to_string());

    scope.configure(|cfg| {
        cfg.set("permissions", DEFAULT_PERMISSIONS)?;
        cfg.set("storage_engines", ConfigValue::Map(default_engines()))?;
        cfg.set("storage", ConfigValue::symbol(storage))?;

        cfg.set("s3_headers", ConfigValue::empty_map())?;
        cfg.set("s3_access_policy", ConfigValue::symbol("public_read"))?;
        cfg.set("s3_region", "us-east-1")?;
        cfg.set("s3_authentication_timeout", 600i64)?;

        cfg.set("grid_fs_database", "satchel")?;
        cfg.set("grid_fs_host", "localhost")?;
        cfg.set("grid_fs_port", 27017i64)?;

        cfg.set("fog_attributes", ConfigValue::empty_map())?;
        cfg.set("fog_credentials", ConfigValue::empty_map())?;
        cfg.set("fog_public", true)?;
        cfg.set("fog_authenticated_url_expiration", 600i64)?;

        cfg.set("store_dir", DEFAULT_STORE_DIR)?;
        cfg.set("cache_dir", DEFAULT_CACHE_DIR)?;
        cfg.set("delete_tmp_file_after_storage", true)?;
        cfg.set("move_to_cache", false)?;
        cfg.set("move_to_store", false)?;
        cfg.set("remove_previously_stored_files_after_update", true)?;
        cfg.set("set_file_extension_by_mime_type", true)?;
        cfg.set("ignore_integrity_errors", true)?;
        cfg.set("ignore_processing_errors", true)?;
        cfg.set("validate_integrity", true)?;
        cfg.set("validate_processing", true)?;
        cfg.set("enable_processing", true)?;

        cfg.set(
            "root",
            ConfigValue::lazy(move || ConfigValue::Path(root.clone())),
        )?;
        match settings.base_path {
            Some(ref base_path) => cfg.set("base_path", base_path.as_str())?,
            None => cfg.clear("base_path")?,
        }
        Ok(())
    })?;

    tracing::debug!(scope = scope.name(), "Uploader configuration reset");
    Ok(())
}

/// Backend selection: a registry identifier or a direct engine.
#[derive(Clone, Debug)]
pub enum StorageSelection {
    Named(String),
    Engine(StorageEngine),
}

impl From<&str> for StorageSelection {
    fn from(name: &str) -> Self {
        StorageSelection::Named(name.to_string())
    }
}

impl From<StorageEngine> for StorageSelection {
    fn from(engine: StorageEngine) -> Self {
        StorageSelection::Engine(engine)
    }
}

/// Select the active backend for `scope`.
///
/// Identifiers are looked up in `storage_engines`; unknown ones fail with
/// [`ConfigError::UnknownStorageEngine`] and leave the selection unchanged.
pub fn storage(
    scope: &ConfigScope,
    selection: impl Into<StorageSelection>,
) -> Result<Arc<StorageEngine>, ConfigError> {
    let engine = match selection.into() {
        StorageSelection::Named(name) => lookup_engine(scope, &name)?,
        StorageSelection::Engine(engine) => Arc::new(engine),
    };
    scope.set("storage", ConfigValue::from(StorageEngine::clone(&engine)))?;
    tracing::debug!(scope = scope.name(), engine = engine.name(), "Storage engine selected");
    Ok(engine)
}

fn lookup_engine(scope: &ConfigScope, name: &str) -> Result<Arc<StorageEngine>, ConfigError> {
    scope
        .read_map("storage_engines")?
        .and_then(|engines| engines.get(name).and_then(engine_from_value))
        .ok_or_else(|| ConfigError::UnknownStorageEngine(name.to_string()))
}

/// Typed accessors for the uploader settings.
pub trait UploaderConfig {
    fn root(&self) -> Result<PathBuf, ConfigError>;
    fn base_path(&self) -> Result<Option<String>, ConfigError>;
    fn store_dir(&self) -> Result<String, ConfigError>;
    fn cache_dir(&self) -> Result<String, ConfigError>;
    /// Absolute cache directory: `cache_dir` resolved against `root`.
    fn cache_path(&self) -> Result<PathBuf, ConfigError>;
    fn permissions(&self) -> Result<Option<u32>, ConfigError>;
    fn storage_engine(&self) -> Result<Arc<StorageEngine>, ConfigError>;
    fn flag(&self, name: &str) -> Result<bool, ConfigError>;

    fn enable_processing(&self) -> Result<bool, ConfigError> {
        self.flag("enable_processing")
    }
    fn validate_integrity(&self) -> Result<bool, ConfigError> {
        self.flag("validate_integrity")
    }
    fn validate_processing(&self) -> Result<bool, ConfigError> {
        self.flag("validate_processing")
    }
    fn ignore_integrity_errors(&self) -> Result<bool, ConfigError> {
        self.flag("ignore_integrity_errors")
    }
    fn ignore_processing_errors(&self) -> Result<bool, ConfigError> {
        self.flag("ignore_processing_errors")
    }
    fn move_to_cache(&self) -> Result<bool, ConfigError> {
        self.flag("move_to_cache")
    }
    fn move_to_store(&self) -> Result<bool, ConfigError> {
        self.flag("move_to_store")
    }
    fn delete_tmp_file_after_storage(&self) -> Result<bool, ConfigError> {
        self.flag("delete_tmp_file_after_storage")
    }
    fn remove_previously_stored_files_after_update(&self) -> Result<bool, ConfigError> {
        self.flag("remove_previously_stored_files_after_update")
    }
    fn set_file_extension_by_mime_type(&self) -> Result<bool, ConfigError> {
        self.flag("set_file_extension_by_mime_type")
    }
}

impl UploaderConfig for ConfigScope {
    fn root(&self) -> Result<PathBuf, ConfigError> {
        self.read_path("root")?
            .ok_or_else(|| ConfigError::Missing("root".to_string()))
    }

    fn base_path(&self) -> Result<Option<String>, ConfigError> {
        self.read_str("base_path")
    }

    fn store_dir(&self) -> Result<String, ConfigError> {
        Ok(self
            .read_str("store_dir")?
            .unwrap_or_else(|| DEFAULT_STORE_DIR.to_string()))
    }

    fn cache_dir(&self) -> Result<String, ConfigError> {
        Ok(self
            .read_str("cache_dir")?
            .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()))
    }

    fn cache_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.root()?.join(self.cache_dir()?))
    }

    fn permissions(&self) -> Result<Option<u32>, ConfigError> {
        match self.read_int("permissions")? {
            None => Ok(None),
            Some(mode) => u32::try_from(mode)
                .map(Some)
                .map_err(|_| ConfigError::TypeMismatch {
                    name: "permissions".to_string(),
                    expected: "file mode",
                }),
        }
    }

    fn storage_engine(&self) -> Result<Arc<StorageEngine>, ConfigError> {
        let value = self
            .read("storage")?
            .ok_or_else(|| ConfigError::Missing("storage".to_string()))?;
        if let Some(engine) = engine_from_value(&value) {
            return Ok(engine);
        }
        match value.as_str() {
            Some(name) => lookup_engine(self, name),
            None => Err(ConfigError::TypeMismatch {
                name: "storage".to_string(),
                expected: "storage engine",
            }),
        }
    }

    fn flag(&self, name: &str) -> Result<bool, ConfigError> {
        Ok(self.read_bool(name)?.unwrap_or(false))
    }
}
