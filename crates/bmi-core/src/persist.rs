//! Atomic file replacement shared by the ledger, catalog, and boot writers.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `dest` with `contents` via a temp file in the same directory, so
/// readers see either the old file or the new one, never a partial write.
pub(crate) fn write_atomic(dest: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.as_file_mut().write_all(contents)?;
    temp.as_file_mut().flush()?;

    let mode = match mode {
        Some(mode) => Some(mode),
        None => fs::metadata(dest)
            .ok()
            .map(|meta| meta.permissions().mode() & 0o7777),
    };
    if let Some(mode) = mode {
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;
    }

    let _ = temp.as_file().sync_all();
    temp.persist(dest).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_contents_and_applies_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/file");
        write_atomic(&path, b"one", Some(0o755)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);

        write_atomic(&path, b"two", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);
    }
}
