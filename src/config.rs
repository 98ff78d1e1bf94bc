use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

const DEFAULT_DATA_DIR_NAME: &str = ".vaultlink";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexerConfig {
    /// File extensions (without dot) that are considered documents.
    pub note_extensions: Vec<String>,
    /// Directory levels below the vault root that the watcher observes.
    pub watch_depth: usize,
    /// Directory holding the snapshot file and the SQLite store.
    pub data_dir: PathBuf,
    /// Snapshot file name inside `data_dir`.
    pub snapshot_file: String,
    /// SQLite file name inside `data_dir`.
    pub db_file: String,
    /// Delete store rows for documents that are no longer in the vault.
    pub prune_deleted: bool,
    /// Buffer size of the broadcast side of the notification bus.
    pub bus_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            note_extensions: vec!["md".into()],
            watch_depth: 2,
            data_dir: default_data_dir(),
            snapshot_file: "index.json".into(),
            db_file: "vaultlink.db".into(),
            prune_deleted: false,
            bus_capacity: 64,
        }
    }
}

impl IndexerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    /// Same settings, with both persistence files under `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    pub fn is_note_extension(&self, ext: &str) -> bool {
        self.note_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DATA_DIR_NAME)
}
