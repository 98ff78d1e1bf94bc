use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::bus::SubscriptionId;
use crate::{Error, Index, Indexer, IndexerConfig, Result, Vault};

type RebuildHandle = JoinHandle<Result<Arc<Index>>>;

/// Keeps the index of at most one vault in sync with the filesystem.
///
/// Starting a watch rebuilds the whole vault once and then again after every
/// relevant filesystem event. Events that arrive while a rebuild is running
/// are coalesced into one follow-up rebuild.
pub struct VaultWatcher {
    indexer: Arc<Indexer>,
    session: Option<WatchSession>,
}

struct WatchSession {
    vault: Vault,
    watcher: notify::RecommendedWatcher,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl VaultWatcher {
    pub fn new(cfg: IndexerConfig) -> Self {
        Self {
            indexer: Arc::new(Indexer::new(cfg)),
            session: None,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.session.is_some()
    }

    pub fn vault_root(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.vault.root())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.indexer.snapshot_path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.indexer.db_path()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<Index>) + Send + Sync + 'static,
    {
        self.indexer.bus().subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.indexer.bus().unsubscribe(id)
    }

    pub fn subscribe_stream(&self) -> broadcast::Receiver<Arc<Index>> {
        self.indexer.bus().subscribe_stream()
    }

    /// Stops any active session, then watches `root`.
    ///
    /// Fails without starting anything if `root` is not a readable directory
    /// or the data dir cannot be created.
    /// The initial rebuild is queued, not awaited.
    pub async fn start_watch(&mut self, root: impl Into<PathBuf>) -> Result<()> {
        self.stop_watch().await;

        let vault = Vault::with_config(root, self.indexer.config().clone())?;
        let filter = EventFilter::new(self.indexer.config())?;

        let (raw_tx, raw_rx) =
            mpsc::unbounded_channel::<std::result::Result<notify::Event, notify::Error>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(vault.root(), RecursiveMode::Recursive)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(session_loop(
            vault.clone(),
            Arc::clone(&self.indexer),
            filter,
            raw_rx,
            shutdown_rx,
        ));

        info!(root = %vault.root().display(), "watch started");
        self.session = Some(WatchSession {
            vault,
            watcher,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Releases the active session, if any.
    ///
    /// Waits for an in-flight rebuild to finish; it is not cancelled.
    pub async fn stop_watch(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let _ = session.shutdown_tx.send(true);
        drop(session.watcher);
        if let Err(err) = session.task.await {
            warn!(error = %err, "watch session task ended abnormally");
        }
        info!(root = %session.vault.root().display(), "watch stopped");
    }

    /// Rebuilds the watched vault now and returns the published index.
    pub async fn rebuild_now(&self) -> Result<Arc<Index>> {
        let session = self.session.as_ref().ok_or(Error::NotWatching)?;
        spawn_rebuild(&session.vault, &self.indexer)
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            let _ = session.shutdown_tx.send(true);
        }
    }
}

async fn session_loop(
    vault: Vault,
    indexer: Arc<Indexer>,
    filter: EventFilter,
    mut raw_rx: mpsc::UnboundedReceiver<std::result::Result<notify::Event, notify::Error>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut in_flight: Option<RebuildHandle> = Some(spawn_rebuild(&vault, &indexer));
    let mut pending = false;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            res = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                log_rebuild(res);
                if pending {
                    pending = false;
                    in_flight = Some(spawn_rebuild(&vault, &indexer));
                }
            }

            maybe = raw_rx.recv() => {
                let Some(res) = maybe else { break; };
                match res {
                    Ok(ev) => {
                        if !filter.is_relevant(&vault, &ev) {
                            continue;
                        }
                        trace!(kind = ?ev.kind, paths = ?ev.paths, "vault changed");
                        if in_flight.is_some() {
                            if !pending {
                                debug!("rebuild in flight; queueing one follow-up");
                            }
                            pending = true;
                        } else {
                            in_flight = Some(spawn_rebuild(&vault, &indexer));
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "watch backend error");
                    }
                }
            }
        }
    }

    if let Some(handle) = in_flight {
        log_rebuild(handle.await);
    }
}

fn spawn_rebuild(vault: &Vault, indexer: &Arc<Indexer>) -> RebuildHandle {
    let vault = vault.clone();
    let indexer = Arc::clone(indexer);
    tokio::task::spawn_blocking(move || indexer.rebuild(&vault))
}

async fn join_in_flight(
    handle: &mut Option<RebuildHandle>,
) -> std::result::Result<Result<Arc<Index>>, JoinError> {
    match handle {
        Some(h) => h.await,
        None => std::future::pending().await,
    }
}

fn log_rebuild(res: std::result::Result<Result<Arc<Index>>, JoinError>) {
    match res {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => error!(error = %err, "rebuild failed"),
        Err(err) => error!(error = %err, "rebuild task failed"),
    }
}

/// Decides which raw filesystem events warrant a rebuild.
struct EventFilter {
    depth: usize,
    ignored: Vec<PathBuf>,
}

impl EventFilter {
    /// Creates the data dir and ignores it by its canonical path, the form
    /// events under the canonical vault root arrive in.
    fn new(cfg: &IndexerConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir).map_err(|e| Error::io(&cfg.data_dir, e))?;
        let resolved =
            std::fs::canonicalize(&cfg.data_dir).map_err(|e| Error::io(&cfg.data_dir, e))?;

        let mut ignored = vec![resolved];
        if !ignored.contains(&cfg.data_dir) {
            ignored.push(cfg.data_dir.clone());
        }
        Ok(Self {
            depth: cfg.watch_depth,
            ignored,
        })
    }

    fn is_relevant(&self, vault: &Vault, ev: &notify::Event) -> bool {
        // Reads (including our own scans) produce access and metadata events.
        match &ev.kind {
            EventKind::Access(_) => return false,
            EventKind::Modify(ModifyKind::Metadata(_)) => return false,
            _ => {}
        }
        ev.paths.iter().any(|p| self.is_observed(vault, p))
    }

    fn is_observed(&self, vault: &Vault, path: &Path) -> bool {
        if self.ignored.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }
        match vault.to_rel(path) {
            Ok(rel) => rel.depth() <= self.depth,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, AccessMode, CreateKind, DataChange, MetadataKind, RemoveKind};

    use super::*;

    fn make_vault(depth: usize) -> (tempfile::TempDir, Vault, EventFilter) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("vault");
        std::fs::create_dir_all(&root).expect("create vault root");
        let mut cfg = IndexerConfig::default().with_data_dir(root.join(".vaultlink"));
        cfg.watch_depth = depth;
        let vault = Vault::with_config(&root, cfg.clone()).expect("open vault");
        let filter = EventFilter::new(&cfg).expect("event filter");
        (dir, vault, filter)
    }

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    #[test]
    fn access_and_metadata_events_are_ignored() {
        let (_temp, vault, filter) = make_vault(2);
        let p = vault.root().join("a.md");
        std::fs::write(&p, "hi").unwrap();

        let access = event(
            EventKind::Access(AccessKind::Open(AccessMode::Any)),
            vec![p.clone()],
        );
        let meta = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            vec![p],
        );
        assert!(!filter.is_relevant(&vault, &access));
        assert!(!filter.is_relevant(&vault, &meta));
    }

    #[test]
    fn create_modify_remove_are_relevant() {
        let (_temp, vault, filter) = make_vault(2);
        let p = vault.root().join("a.md");
        std::fs::write(&p, "hi").unwrap();

        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Remove(RemoveKind::File),
        ] {
            assert!(filter.is_relevant(&vault, &event(kind, vec![p.clone()])));
        }
    }

    #[test]
    fn events_below_watch_depth_are_ignored() {
        let (_temp, vault, filter) = make_vault(1);
        let shallow = vault.root().join("sub/a.md");
        let deep = vault.root().join("sub/deeper/a.md");
        std::fs::create_dir_all(deep.parent().unwrap()).unwrap();

        let kind = EventKind::Create(CreateKind::File);
        assert!(filter.is_relevant(&vault, &event(kind, vec![shallow])));
        assert!(!filter.is_relevant(&vault, &event(kind, vec![deep])));
    }

    #[test]
    fn writes_to_the_data_dir_are_ignored() {
        let (_temp, vault, filter) = make_vault(2);
        let data = vault.root().join(".vaultlink");
        std::fs::create_dir_all(&data).unwrap();
        let ev = event(
            EventKind::Create(CreateKind::File),
            vec![data.join("index.json")],
        );
        assert!(!filter.is_relevant(&vault, &ev));
    }

    #[cfg(unix)]
    #[test]
    fn data_dir_behind_a_symlink_is_ignored_before_it_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("vault");
        std::fs::create_dir_all(&root).unwrap();
        let link = dir.path().join("alias");
        std::os::unix::fs::symlink(&root, &link).unwrap();

        let cfg = IndexerConfig::default().with_data_dir(link.join("x/y"));
        let vault = Vault::with_config(&root, cfg.clone()).unwrap();
        let filter = EventFilter::new(&cfg).unwrap();

        let written = vault.root().join("x/y/index.json");
        std::fs::write(&written, "{}").unwrap();
        let ev = event(EventKind::Create(CreateKind::File), vec![written]);
        assert!(!filter.is_relevant(&vault, &ev));
    }

    #[tokio::test]
    async fn rebuild_now_requires_an_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = VaultWatcher::new(IndexerConfig::default().with_data_dir(dir.path()));
        assert!(matches!(watcher.rebuild_now().await, Err(Error::NotWatching)));
    }

    #[tokio::test]
    async fn start_watch_fails_fast_on_missing_vault() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = VaultWatcher::new(IndexerConfig::default().with_data_dir(dir.path()));
        let err = watcher
            .start_watch(dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VaultNotFound(_)));
        assert!(!watcher.is_watching());
    }
}
