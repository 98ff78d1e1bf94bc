use std::path::Path;
use std::sync::Arc;

use vaultlink::{
    Index, Indexer, IndexerConfig, SqliteIndexStore, Vault, VaultPath, read_snapshot,
};

fn vp(path: &str) -> VaultPath {
    VaultPath::try_from(path).expect("valid vault path")
}

fn setup(cfg: IndexerConfig) -> anyhow::Result<(tempfile::TempDir, Vault, Indexer)> {
    let temp = tempfile::tempdir()?;
    let root = temp.path().join("vault");
    std::fs::create_dir_all(&root)?;
    let cfg = cfg.with_data_dir(temp.path().join("data"));
    let vault = Vault::with_config(&root, cfg.clone())?;
    Ok((temp, vault, Indexer::new(cfg)))
}

fn store_rows(db: &Path) -> anyhow::Result<Vec<(String, String)>> {
    Ok(SqliteIndexStore::open_path(db)?.backlink_rows()?)
}

fn index_rows(index: &Index) -> Vec<(String, String)> {
    let mut rows: Vec<_> = index
        .backlinks()
        .flat_map(|(t, sources)| {
            sources
                .iter()
                .map(move |s| (t.to_string(), s.as_str_lossy()))
        })
        .collect();
    rows.sort();
    rows
}

#[test]
fn single_reference_builds_forward_and_backward_entries() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    std::fs::write(vault.root().join("a.md"), "see [[b]]")?;
    std::fs::write(vault.root().join("b.md"), "")?;

    let index = indexer.rebuild(&vault)?;

    assert_eq!(index.note(&vp("a.md")).expect("a indexed").links, vec!["b"]);
    assert_eq!(index.backlinks_for("b"), &[vp("a.md")]);
    assert!(!index.has_target("a.md"));
    assert_eq!(read_snapshot(&indexer.snapshot_path())?, *index);
    Ok(())
}

#[test]
fn repeated_reference_keeps_duplicates_everywhere() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    std::fs::write(vault.root().join("a.md"), "[[x]] and [[x]]")?;

    let index = indexer.rebuild(&vault)?;

    assert_eq!(index.backlinks_for("x"), &[vp("a.md"), vp("a.md")]);
    let store = SqliteIndexStore::open_path(indexer.db_path())?;
    assert_eq!(store.backlinks_for("x")?, vec!["a.md", "a.md"]);
    Ok(())
}

#[test]
fn rebuilding_unchanged_vault_only_moves_timestamps() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    std::fs::write(
        vault.root().join("a.md"),
        "---\ntitle: Alpha\ntags: [x, y]\n---\n[[b]] [[c|see c]]",
    )?;
    std::fs::write(vault.root().join("b.md"), "[[a]]")?;

    let first = indexer.rebuild(&vault)?;
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = indexer.rebuild(&vault)?;

    assert_eq!(first.len(), second.len());
    for (path, note) in second.notes() {
        let old = first.note(path).expect("same documents");
        assert_eq!(
            (&old.id, &old.title, &old.tags, &old.links),
            (&note.id, &note.title, &note.tags, &note.links)
        );
        assert!(note.updated_at > old.updated_at);
    }
    assert_eq!(index_rows(&first), index_rows(&second));
    assert_eq!(store_rows(&indexer.db_path())?, index_rows(&second));
    Ok(())
}

#[test]
fn deleted_document_disappears_from_snapshot() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    std::fs::write(vault.root().join("a.md"), "[[t]]")?;
    std::fs::write(vault.root().join("b.md"), "[[t]] [[a]]")?;
    indexer.rebuild(&vault)?;

    std::fs::remove_file(vault.root().join("b.md"))?;
    let index = indexer.rebuild(&vault)?;

    assert!(index.note(&vp("b.md")).is_none());
    assert_eq!(index.backlinks_for("t"), &[vp("a.md")]);
    assert!(!index.has_target("a"));
    let snapshot = read_snapshot(&indexer.snapshot_path())?;
    assert!(
        snapshot
            .backlinks()
            .all(|(_, sources)| !sources.contains(&vp("b.md")))
    );

    // Without pruning the relational store keeps the stale note row.
    let store = SqliteIndexStore::open_path(indexer.db_path())?;
    assert_eq!(store.note_paths()?, vec!["a.md", "b.md"]);
    Ok(())
}

#[test]
fn pruning_store_drops_deleted_documents() -> anyhow::Result<()> {
    let cfg = IndexerConfig {
        prune_deleted: true,
        ..IndexerConfig::default()
    };
    let (_temp, vault, indexer) = setup(cfg)?;
    std::fs::write(vault.root().join("a.md"), "[[t]]")?;
    std::fs::write(vault.root().join("b.md"), "[[t]]")?;
    indexer.rebuild(&vault)?;

    std::fs::remove_file(vault.root().join("b.md"))?;
    let index = indexer.rebuild(&vault)?;

    let store = SqliteIndexStore::open_path(indexer.db_path())?;
    assert_eq!(store.note_paths()?, vec!["a.md"]);
    assert_eq!(store_rows(&indexer.db_path())?, index_rows(&index));
    Ok(())
}

#[test]
fn unparsable_and_encrypted_documents_do_not_block_others() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    std::fs::write(vault.root().join("good.md"), "[[target]]")?;
    std::fs::write(vault.root().join("bad.md"), "---\ntitle: [unclosed\n---\n[[target]]")?;
    std::fs::write(vault.root().join("sealed.md"), [0x00, 0xc3, 0x28, 0xff, 0xfe])?;

    let index = indexer.rebuild(&vault)?;

    assert_eq!(index.len(), 1);
    assert_eq!(index.backlinks_for("target"), &[vp("good.md")]);
    Ok(())
}

#[test]
fn prose_between_rules_is_not_a_header_failure() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    std::fs::write(vault.root().join("rule.md"), "---\nIntro\n---\nsee [[x]]")?;

    let index = indexer.rebuild(&vault)?;

    let note = index.note(&vp("rule.md")).expect("rule indexed");
    assert_eq!(note.links, vec!["x"]);
    assert_eq!(note.id, "rule.md");
    assert_eq!(note.title, "rule");
    assert_eq!(index.backlinks_for("x"), &[vp("rule.md")]);
    Ok(())
}

#[test]
fn concurrent_rebuilds_persist_one_complete_scan() -> anyhow::Result<()> {
    let (_temp, vault, indexer) = setup(IndexerConfig::default())?;
    for i in 0..10 {
        std::fs::write(vault.root().join(format!("n{i}.md")), "[[hub]]")?;
    }

    let results: Vec<Arc<Index>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let vault = &vault;
                let indexer = &indexer;
                s.spawn(move || {
                    std::fs::write(vault.root().join(format!("extra{i}.md")), "[[hub]]")
                        .expect("write extra document");
                    indexer.rebuild(vault).expect("rebuild")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rebuild thread"))
            .collect()
    });

    let snapshot = read_snapshot(&indexer.snapshot_path())?;
    assert!(
        results.iter().any(|r| **r == snapshot),
        "snapshot must equal one complete rebuild"
    );
    assert_eq!(store_rows(&indexer.db_path())?, index_rows(&snapshot));
    Ok(())
}

#[test]
fn missing_vault_fails_fast() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = Vault::open(temp.path().join("absent")).unwrap_err();
    assert!(matches!(err, vaultlink::Error::VaultNotFound(_)));
}
