//! Atomic file writer.
//!
//! 1. Create the parent directory.
//! 2. Write to `<path>.stencil.tmp`.
//! 3. Rename to the final path (atomic on POSIX); remove the `.tmp` on failure.

use std::path::{Path, PathBuf};

use crate::error::{io_error, BackendError};

/// Write rendered text, normalising line endings to LF.
pub fn write_rendered(path: &Path, content: &str) -> Result<(), BackendError> {
    let normalized = content.replace("\r\n", "\n");
    atomic_write(path, normalized.as_bytes())
}

/// Write bytes verbatim.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let tmp = PathBuf::from(format!("{}.stencil.tmp", path.display()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create directory", parent, e))?;
    }
    std::fs::write(&tmp, bytes).map_err(|e| io_error("write", &tmp, e))?;

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_error("rename", path, e));
    }
    tracing::debug!(path = %path.display(), "wrote file");
    Ok(())
}
