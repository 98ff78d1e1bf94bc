use std::path::Path;

use tracing::debug;

use crate::{Error, Index, Result};

/// Overwrites the snapshot at `path` with `index` as pretty JSON.
///
/// The new contents go to a sibling `.tmp` file that is then renamed over the
/// target, so readers see either the previous or the new snapshot in full.
pub fn write_snapshot(path: &Path, index: &Index) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(index)?;

    let tmp_path = path.with_extension("tmp");
    if let Err(err) = std::fs::write(&tmp_path, &json) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::io(&tmp_path, err));
    }
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        Error::io(path, e)
    })?;

    debug!(path = %path.display(), bytes = json.len(), "snapshot written");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Index> {
    let raw = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VaultPath;
    use crate::parse::parse_document;

    fn sample_index() -> Index {
        let a = VaultPath::try_from("a.md").unwrap();
        let b = VaultPath::try_from("b.md").unwrap();
        let docs = [
            parse_document(&a, "---\ntitle: A\n---\nsee [[b]]").unwrap(),
            parse_document(&b, "").unwrap(),
        ];
        crate::index::build(&docs)
    }

    #[test]
    fn snapshot_is_readable_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.json");
        let idx = sample_index();

        write_snapshot(&path, &idx).unwrap();
        let loaded = read_snapshot(&path).unwrap();
        assert_eq!(loaded, idx);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn snapshot_is_fully_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        write_snapshot(&path, &sample_index()).unwrap();
        write_snapshot(&path, &Index::default()).unwrap();

        let loaded = read_snapshot(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.targets().count(), 0);
    }

    #[test]
    fn failed_write_leaves_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let idx = sample_index();
        write_snapshot(&path, &idx).unwrap();

        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir_all(path.with_extension("tmp")).unwrap();
        assert!(write_snapshot(&path, &Index::default()).is_err());
        assert_eq!(read_snapshot(&path).unwrap(), idx);
    }
}
