//! Satchel Uploader
//!
//! Drives a file through the attachment lifecycle: an incoming file (or a
//! remote URL) is validated and staged in a uniquely named cache directory,
//! optionally processed, then handed to the storage backend selected in the
//! uploader's configuration scope.
//!
//! ```text
//! download ─┐
//!           ├─> cache (integrity, stage, process) ─> store (backend) ─> handle
//! file ─────┘
//! ```

pub mod cache;
pub mod configuration;
pub mod download;
pub mod error;
pub mod integrity;
pub mod processing;
pub mod store;
pub mod uploader;

// Re-export commonly used types
pub use cache::{clean_cached_files, CacheId};
pub use configuration::{base_scope, reset_config, storage, StorageSelection, UploaderConfig};
pub use download::{FetchedResource, HttpFetch, RemoteFile, ReqwestFetch};
pub use error::{UploadError, UploadResult};
pub use integrity::{ContentTypeAllowlist, ExtensionAllowlist, IntegrityCheck, SizeRange};
pub use processing::{step_fn, Pipeline, ProcessStep};
pub use uploader::{Uploader, UploaderState, UploaderSummary};
