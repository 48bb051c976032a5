//! Moving processed files out of the scanned directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Move `file` into `dir`, creating `dir` if needed.
///
/// An existing file of the same name is never overwritten; the moved file
/// gets a `_1`, `_2`, ... suffix before its extension instead.
pub fn archive(file: &Path, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", file.display()),
        )
    })?;
    let dest = free_destination(dir, Path::new(name));
    fs::rename(file, &dest)?;
    tracing::debug!(from = %file.display(), to = %dest.display(), "archived");
    Ok(dest)
}

fn free_destination(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_into_created_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.csv");
        fs::write(&file, "x").unwrap();

        let dest = archive(&file, &dir.path().join("interim")).unwrap();

        assert_eq!(dest, dir.path().join("interim/a.csv"));
        assert!(!file.exists());
        assert_eq!(fs::read_to_string(dest).unwrap(), "x");
    }

    #[test]
    fn collisions_get_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("interim");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("a.csv"), "old").unwrap();
        fs::write(target.join("a_1.csv"), "older").unwrap();
        let file = dir.path().join("a.csv");
        fs::write(&file, "new").unwrap();

        let dest = archive(&file, &target).unwrap();

        assert_eq!(dest, target.join("a_2.csv"));
        assert_eq!(fs::read_to_string(target.join("a.csv")).unwrap(), "old");
        assert_eq!(fs::read_to_string(dest).unwrap(), "new");
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(archive(&dir.path().join("nope.csv"), dir.path()).is_err());
    }
}
