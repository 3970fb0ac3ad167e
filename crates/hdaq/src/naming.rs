//! Collision-free output file names.

use std::path::{Path, PathBuf};

/// `base.ext` with the smallest numeric suffix (none for 0) such that no
/// file exists at the result: `run.h5`, `run1.h5`, `run2.h5`, ...
pub fn unique_path(base: impl AsRef<Path>, extension: &str) -> PathBuf {
    let base = base.as_ref().as_os_str();
    let mut suffix = 0u64;
    loop {
        let mut name = base.to_os_string();
        if suffix > 0 {
            name.push(suffix.to_string());
        }
        if !extension.is_empty() {
            name.push(".");
            name.push(extension);
        }
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run");
        assert_eq!(unique_path(&base, "h5"), dir.path().join("run.h5"));

        std::fs::write(dir.path().join("run.h5"), b"").unwrap();
        std::fs::write(dir.path().join("run1.h5"), b"").unwrap();
        assert_eq!(unique_path(&base, "h5"), dir.path().join("run2.h5"));
    }

    #[test]
    fn gap_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run1.h5"), b"").unwrap();
        assert_eq!(
            unique_path(dir.path().join("run"), "h5"),
            dir.path().join("run.h5")
        );
    }

    #[test]
    fn custom_extension() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_path(dir.path().join("log"), "hdf5"),
            dir.path().join("log.hdf5")
        );
    }
}
