use satchel_core::SanitizedFile;
use std::path::{Path, PathBuf};

/// Smallest valid PNG: signature plus IHDR chunk prefix
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52,
];

pub const TEXT_CONTENT: &[u8] = b"this is stuff";

/// Write `contents` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

/// In-memory upload with the given client filename
pub fn upload(name: &str, contents: &'static [u8]) -> SanitizedFile {
    SanitizedFile::from_bytes(contents, name)
}
