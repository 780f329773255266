//! Atomic file replacement
//!
//! Writes go to a temporary file in the target's directory, which is
//! fsynced and renamed over the target. Readers see either the old or the
//! new contents, never a mix.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;

/// Replace `path` with whatever `fill` writes
pub(crate) fn persist_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        fill(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)
}

/// Replace `path` with `bytes`
pub(crate) fn persist_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    persist_with(path, |writer| {
        writer.write_all(bytes)?;
        Ok(())
    })
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
