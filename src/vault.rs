use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, IndexerConfig, Result};

/// A normalized, vault-relative path. Used as the identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultPath(PathBuf);

impl VaultPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn as_str_lossy(&self) -> String {
        self.0.to_string_lossy().to_string()
    }

    /// File name including extension, e.g. `a.md`.
    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File name without extension, e.g. `a`.
    pub fn file_stem(&self) -> String {
        self.0
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Number of directories between the vault root and this path.
    pub fn depth(&self) -> usize {
        self.0.components().count().saturating_sub(1)
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<&Path> for VaultPath {
    type Error = Error;

    fn try_from(value: &Path) -> Result<Self> {
        if value.as_os_str().is_empty() {
            return Err(Error::InvalidVaultPath("empty path".into()));
        }
        if value.is_absolute() {
            return Err(Error::InvalidVaultPath(
                "absolute paths are not allowed".into(),
            ));
        }

        let mut cleaned = PathBuf::new();
        for c in value.components() {
            match c {
                Component::Prefix(_) | Component::RootDir => {
                    return Err(Error::InvalidVaultPath(
                        "absolute paths are not allowed".into(),
                    ));
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::InvalidVaultPath(
                        "path traversal is not allowed".into(),
                    ));
                }
                Component::Normal(part) => cleaned.push(part),
            }
        }

        if cleaned.as_os_str().is_empty() {
            return Err(Error::InvalidVaultPath("empty path".into()));
        }

        Ok(Self(cleaned))
    }
}

impl TryFrom<&str> for VaultPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::try_from(Path::new(value))
    }
}

impl TryFrom<String> for VaultPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::try_from(Path::new(&value))
    }
}

impl From<VaultPath> for String {
    fn from(value: VaultPath) -> Self {
        value.as_str_lossy()
    }
}

#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    cfg: IndexerConfig,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(root, IndexerConfig::default())
    }

    /// Opens a vault root, failing if it is missing, not a directory or not listable.
    pub fn with_config(root: impl Into<PathBuf>, cfg: IndexerConfig) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(Error::VaultNotFound(root));
        }
        let root = std::fs::canonicalize(&root).map_err(|e| Error::io(&root, e))?;
        if !root.is_dir() {
            return Err(Error::NotADirectory(root));
        }
        std::fs::read_dir(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self { root, cfg })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.cfg
    }

    pub fn to_rel(&self, abs: &Path) -> Result<VaultPath> {
        let abs = if abs.is_absolute() {
            abs.to_path_buf()
        } else {
            self.root.join(abs)
        };

        // Removed files can no longer be canonicalized; fall back to the parent.
        let abs = std::fs::canonicalize(&abs).unwrap_or_else(|_| canonicalize_parent(&abs));
        if !abs.starts_with(&self.root) {
            return Err(Error::PathOutsideVault(abs));
        }
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| Error::PathOutsideVault(abs.clone()))?;
        VaultPath::try_from(rel)
    }

    /// Whether a vault-relative path names a document the scanner would pick up.
    pub fn is_document_rel(&self, rel: &Path) -> bool {
        let file_name = rel.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if file_name.is_empty() || file_name.starts_with('.') {
            return false;
        }
        rel.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.cfg.is_note_extension(e))
    }
}

fn canonicalize_parent(abs: &Path) -> PathBuf {
    match (abs.parent(), abs.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| abs.to_path_buf()),
        _ => abs.to_path_buf(),
    }
}
