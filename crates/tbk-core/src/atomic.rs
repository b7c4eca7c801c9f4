//! Crash-safe replacement of small state files

use std::io::Write;
use std::path::Path;

use crate::error::{VaultError, VaultResult};

/// Replace `path` with `bytes` in a single rename.
///
/// The bytes go to a uniquely named temp file in the same directory, which
/// is owner-only on unix and synced before the rename. The temp file is
/// removed if any step fails.
pub fn write_private(path: &Path, bytes: &[u8]) -> VaultResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VaultError::Io(e.error))?;
    Ok(())
}
