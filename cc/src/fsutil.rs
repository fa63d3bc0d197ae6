//! Atomic file replacement
//!
//! Content is written to a temporary file in the destination directory and
//! renamed over the target, so readers never observe a partial file.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{CoreError, Result};

/// Prefix of in-flight temporary files; the indexer skips these
pub const TEMP_PREFIX: &str = ".casttmp-";

/// Write `content` to `path` atomically, creating parent directories
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| CoreError::io(parent, e))?;
    write_all(&mut tmp, content).map_err(|e| CoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| CoreError::io(path, e.error))?;
    Ok(())
}

fn write_all(tmp: &mut NamedTempFile, content: &[u8]) -> std::io::Result<()> {
    tmp.write_all(content)?;
    tmp.as_file().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents_and_replaces() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("a").join("b").join("note.md");

        atomic_write(&target, b"first").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "first");

        atomic_write(&target, b"second").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "second");

        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }
}
