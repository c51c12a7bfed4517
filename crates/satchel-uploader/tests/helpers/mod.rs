pub mod fixtures;

use satchel_core::{ConfigScope, Settings};
use satchel_uploader::{base_scope, Uploader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Uploader configuration rooted in a temporary directory
pub struct TestEnv {
    pub scope: Arc<ConfigScope>,
    pub _temp_dir: TempDir,
}

impl TestEnv {
    /// Application root all relative directories resolve against
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Default cache directory, `<root>/uploads/tmp`
    pub fn cache_path(&self) -> PathBuf {
        self.root().join("uploads/tmp")
    }

    /// Default local store directory, `<root>/uploads`
    pub fn store_path(&self) -> PathBuf {
        self.root().join("uploads")
    }

    /// Directory outside the application root for source files
    pub fn source_dir(&self) -> PathBuf {
        let dir = self.root().join("incoming");
        std::fs::create_dir_all(&dir).expect("create source dir");
        dir
    }

    pub fn uploader(&self) -> Uploader {
        Uploader::new(self.scope.clone()).expect("build uploader")
    }

    /// Make integrity and processing errors fatal.
    pub fn strict(self) -> Self {
        self.scope
            .set("ignore_integrity_errors", false)
            .expect("set ignore_integrity_errors");
        self.scope
            .set("ignore_processing_errors", false)
            .expect("set ignore_processing_errors");
        self
    }
}

/// Setup a fresh uploader configuration with the documented defaults
pub fn setup_test_env() -> TestEnv {
    let temp_dir = TempDir::new().expect("create temp dir");
    let scope = base_scope("TestUploader", &Settings::new(temp_dir.path()))
        .expect("build uploader scope");
    TestEnv {
        scope,
        _temp_dir: temp_dir,
    }
}
