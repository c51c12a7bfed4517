use anyhow::Context;
use satchel_core::{ConfigScope, Settings};
use satchel_uploader::{base_scope, storage};
use std::sync::Arc;

/// Name of the scope the CLI uploads through.
pub const SCOPE_NAME: &str = "SatchelCli";

/// Build the uploader scope from process settings, optionally overriding the
/// storage engine.
pub fn uploader_scope(
    settings: &Settings,
    storage_override: Option<&str>,
) -> anyhow::Result<Arc<ConfigScope>> {
    let scope = base_scope(SCOPE_NAME, settings).context("Failed to apply default configuration")?;
    if let Some(engine) = storage_override {
        storage(&scope, engine).with_context(|| format!("Failed to select storage {}", engine))?;
    }
    Ok(scope)
}

/// Every registered setting with its current value, lazy values evaluated.
pub fn config_snapshot(scope: &ConfigScope) -> anyhow::Result<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for name in scope.registered_names() {
        let value = scope
            .read(&name)
            .with_context(|| format!("Failed to read {}", name))?
            .map(|v| v.to_json())
            .unwrap_or(serde_json::Value::Null);
        out.insert(name, value);
    }
    Ok(serde_json::Value::Object(out))
}

/// Initialize tracing for the CLI.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_uploader::UploaderConfig;

    #[test]
    fn uploader_scope_applies_storage_override() {
        let scope = uploader_scope(&Settings::new("/srv/app"), Some("grid_fs")).unwrap();
        assert_eq!(scope.storage_engine().unwrap().name(), "grid_fs");

        let scope = uploader_scope(&Settings::new("/srv/app"), None).unwrap();
        assert_eq!(scope.storage_engine().unwrap().name(), "file");
    }

    #[test]
    fn uploader_scope_rejects_unknown_storage() {
        let err = uploader_scope(&Settings::new("/srv/app"), Some("ftp")).unwrap_err();
        assert!(format!("{:#}", err).contains("ftp"));
    }

    #[test]
    fn config_snapshot_lists_defaults() {
        let scope = uploader_scope(&Settings::new("/srv/app"), None).unwrap();
        let snapshot = config_snapshot(&scope).unwrap();

        assert_eq!(snapshot["store_dir"], "uploads");
        assert_eq!(snapshot["cache_dir"], "uploads/tmp");
        assert_eq!(snapshot["permissions"], 0o644);
        assert_eq!(snapshot["root"], "/srv/app");
        assert!(snapshot["base_path"].is_null());
    }
}
