//! Filesystem helpers shared by the file-backed adapters.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Replace `path` with `contents` via a sibling temp file and a rename.
///
/// The temp file is `path` with its extension replaced by `tmp_extension`.
/// Missing parent directories are created.
pub fn write_atomic(path: &Path, contents: &str, tmp_extension: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension(tmp_extension);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_through_missing_parents_and_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/state.json");
        write_atomic(&path, "first\n", "json.tmp").expect("write");
        write_atomic(&path, "second\n", "json.tmp").expect("rewrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second\n");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
