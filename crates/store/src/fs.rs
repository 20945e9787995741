//! Small filesystem helpers shared by the stores.

use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use pipeline::{StorageError, StorageResult};

/// Writes `contents` to `temp_path`, syncs it, then renames it over `path`.
///
/// Readers never observe a partially written `path`.
pub(crate) async fn atomic_write_file(
    temp_path: &Path,
    path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path)
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::file_io(temp_path, e))?;
    drop(file);

    fs::rename(temp_path, path)
        .await
        .map_err(|e| StorageError::file_io(path, e))
}

/// Creates `dir` and its parents if missing.
pub(crate) async fn ensure_dir(dir: &Path) -> StorageResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::file_io(dir, e))
}

/// Why `component` cannot be embedded in a file name, if it cannot.
pub(crate) fn file_name_problem(component: &str) -> Option<&'static str> {
    if component.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if component.contains("..") {
        Some("must not contain `..`")
    } else if component.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    }
}
