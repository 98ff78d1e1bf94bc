use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};

use crate::parse::ParsedDocument;
use crate::scan::scan;
use crate::snapshot::write_snapshot;
use crate::store::SqliteIndexStore;
use crate::{Index, IndexBus, IndexerConfig, Result, Vault};

/// Runs full rebuilds: scan, build, persist to SQLite and snapshot, publish.
///
/// Rebuilds are serialized by one lock held for the whole cycle, so the
/// persisted state and the publication order always match a single scan.
/// Subscribers run under that lock and must not start another rebuild.
pub struct Indexer {
    cfg: IndexerConfig,
    bus: Arc<IndexBus>,
    store: Mutex<Option<SqliteIndexStore>>,
}

impl Indexer {
    pub fn new(cfg: IndexerConfig) -> Self {
        let bus = Arc::new(IndexBus::new(cfg.bus_capacity));
        Self {
            cfg,
            bus,
            store: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.cfg
    }

    pub fn bus(&self) -> &Arc<IndexBus> {
        &self.bus
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.cfg.snapshot_path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.cfg.db_path()
    }

    /// One complete rebuild of `vault`.
    ///
    /// A SQLite failure is logged and does not stop the snapshot write. A
    /// scan or snapshot failure is returned and nothing is published.
    pub fn rebuild(&self, vault: &Vault) -> Result<Arc<Index>> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let started = Instant::now();

        let docs = scan(vault)?;
        let index = Index::build(&docs, Utc::now());

        self.persist_relational(&mut store, &docs, &index);
        write_snapshot(&self.cfg.snapshot_path(), &index)?;

        let index = Arc::new(index);
        self.bus.publish(Arc::clone(&index));

        info!(
            root = %vault.root().display(),
            notes = index.len(),
            backlinks = index.backlink_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuilt"
        );
        Ok(index)
    }

    fn persist_relational(
        &self,
        store: &mut Option<SqliteIndexStore>,
        docs: &[ParsedDocument],
        index: &Index,
    ) {
        if store.is_none() {
            let path = self.cfg.db_path();
            match SqliteIndexStore::open_path(&path) {
                Ok(s) => *store = Some(s),
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to open index store");
                    return;
                }
            }
        }

        let Some(s) = store.as_mut() else {
            return;
        };
        if let Err(err) = s.write_index(docs, index, self.cfg.prune_deleted) {
            error!(error = %err, "index store write failed; snapshot is still updated");
            // Reopen on the next rebuild in case the connection went bad.
            *store = None;
        }
    }
}
