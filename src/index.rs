use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::VaultPath;
use crate::links::extract_links;
use crate::parse::ParsedDocument;

/// Per-document metadata as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub links: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub filepath: VaultPath,
}

impl Document {
    pub fn from_parsed(doc: &ParsedDocument, now: DateTime<Utc>) -> Self {
        Self {
            id: doc.header.id().unwrap_or_else(|| doc.path.file_name()),
            title: doc.header.title().unwrap_or_else(|| doc.path.file_stem()),
            tags: doc.header.tags(),
            links: extract_links(&doc.body),
            updated_at: now,
            filepath: doc.path.clone(),
        }
    }
}

/// Forward index of documents plus the inverted link graph.
///
/// Every occurrence of a target in some document's `links` corresponds to
/// exactly one entry for that document in `backlinks[target]`. Targets nobody
/// links to have no key at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    notes: BTreeMap<VaultPath, Document>,
    backlinks: BTreeMap<String, Vec<VaultPath>>,
}

impl Index {
    /// Builds a complete index from scratch, stamping every document with `now`.
    pub fn build(docs: &[ParsedDocument], now: DateTime<Utc>) -> Self {
        let mut idx = Self::default();
        for doc in docs {
            idx.notes
                .insert(doc.path.clone(), Document::from_parsed(doc, now));
        }

        for (path, note) in &idx.notes {
            for target in &note.links {
                idx.backlinks
                    .entry(target.clone())
                    .or_default()
                    .push(path.clone());
            }
        }

        idx
    }

    pub fn note(&self, path: &VaultPath) -> Option<&Document> {
        self.notes.get(path)
    }

    pub fn notes(&self) -> impl Iterator<Item = (&VaultPath, &Document)> {
        self.notes.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &VaultPath> {
        self.notes.keys()
    }

    /// Source documents referencing `target`, one entry per occurrence.
    pub fn backlinks_for(&self, target: &str) -> &[VaultPath] {
        self.backlinks
            .get(target)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn backlinks(&self) -> impl Iterator<Item = (&str, &[VaultPath])> {
        self.backlinks
            .iter()
            .map(|(t, sources)| (t.as_str(), sources.as_slice()))
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.backlinks.keys().map(|t| t.as_str())
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.backlinks.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Total number of (target, source) pairs.
    pub fn backlink_count(&self) -> usize {
        self.backlinks.values().map(Vec::len).sum()
    }
}

/// Builds an index stamped with the current time.
pub fn build(docs: &[ParsedDocument]) -> Index {
    Index::build(docs, Utc::now())
}
