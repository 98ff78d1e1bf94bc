use tracing::{debug, warn};

use crate::parse::{ParsedDocument, parse_document};
use crate::{Error, Result, Vault};

/// Reads and parses every document directly under the vault root.
///
/// A file that cannot be read as UTF-8 text or whose header does not parse is
/// logged and skipped. Only failing to list the root itself is an error.
/// The result is sorted by path.
pub fn scan(vault: &Vault) -> Result<Vec<ParsedDocument>> {
    let mut docs = Vec::new();
    let mut skipped = 0usize;

    for entry in walkdir::WalkDir::new(vault.root())
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
    {
        let entry = match entry {
            Ok(e) => e,
            Err(err) if err.depth() == 0 => {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("vault listing failed"));
                return Err(Error::io(vault.root(), source));
            }
            Err(err) => {
                warn!(error = %err, "skipping unreadable vault entry");
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let abs = entry.path();
        let rel = match vault.to_rel(abs) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !vault.is_document_rel(rel.as_path()) {
            continue;
        }

        let content = match std::fs::read_to_string(abs) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = %rel, error = %err, "skipping unreadable document");
                skipped += 1;
                continue;
            }
        };
        match parse_document(&rel, &content) {
            Ok(doc) => docs.push(doc),
            Err(err) => {
                warn!(path = %rel, error = %err, "skipping unparsable document");
                skipped += 1;
            }
        }
    }

    docs.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(
        root = %vault.root().display(),
        documents = docs.len(),
        skipped,
        "vault scanned"
    );
    Ok(docs)
}
