use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::debug;

use crate::parse::ParsedDocument;
use crate::{Error, Index, Result};

const SCHEMA_VERSION: &str = "1";

/// SQLite mirror of the index: `notes`, `backlinks` and a reserved `embeddings` table.
pub struct SqliteIndexStore {
    conn: Connection,
}

/// A row of the `notes` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRow {
    pub filepath: String,
    pub id: String,
    pub title: String,
    pub content: String,
    pub updated_at: String,
}

/// What a single [`SqliteIndexStore::write_index`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub notes_upserted: usize,
    pub backlinks_inserted: usize,
    pub stale_pruned: usize,
}

impl SqliteIndexStore {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let this = Self { conn };
        this.init_schema()?;
        Ok(this)
    }

    pub fn open_in_memory() -> Result<Self> {
        let this = Self {
            conn: Connection::open_in_memory()?,
        };
        this.init_schema()?;
        Ok(this)
    }

    /// Mirrors a freshly built index in one transaction.
    ///
    /// Notes are upserted, and every indexed document's backlink rows are
    /// replaced. Rows of documents missing from `index` are only removed when
    /// `prune_deleted` is set. On error the transaction is rolled back.
    pub fn write_index(
        &mut self,
        docs: &[ParsedDocument],
        index: &Index,
        prune_deleted: bool,
    ) -> Result<WriteStats> {
        let tx = self.conn.transaction()?;
        let mut stats = WriteStats::default();

        {
            let mut upsert = tx.prepare(
                "INSERT INTO notes(filepath, id, title, content, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(filepath) DO UPDATE SET
                   id=excluded.id,
                   title=excluded.title,
                   content=excluded.content,
                   updated_at=excluded.updated_at",
            )?;
            for doc in docs {
                let Some(note) = index.note(&doc.path) else {
                    continue;
                };
                upsert.execute(params![
                    doc.path.as_str_lossy(),
                    note.id,
                    note.title,
                    doc.body,
                    note.updated_at.to_rfc3339(),
                ])?;
                stats.notes_upserted += 1;
            }
        }

        {
            let mut delete = tx.prepare("DELETE FROM backlinks WHERE source_filepath=?1")?;
            for path in index.paths() {
                delete.execute(params![path.as_str_lossy()])?;
            }

            let mut insert =
                tx.prepare("INSERT INTO backlinks(target, source_filepath) VALUES(?1, ?2)")?;
            for (target, sources) in index.backlinks() {
                for source in sources {
                    insert.execute(params![target, source.as_str_lossy()])?;
                    stats.backlinks_inserted += 1;
                }
            }
        }

        if prune_deleted {
            stats.stale_pruned = prune_missing(&tx, index)?;
        }

        tx.commit()?;
        debug!(
            notes = stats.notes_upserted,
            backlinks = stats.backlinks_inserted,
            pruned = stats.stale_pruned,
            "sqlite index written"
        );
        Ok(stats)
    }

    /// Row counts of `notes`, `backlinks` and `embeddings`.
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        Ok((
            count(&self.conn, "notes")?,
            count(&self.conn, "backlinks")?,
            count(&self.conn, "embeddings")?,
        ))
    }

    pub fn embeddings_count(&self) -> Result<usize> {
        count(&self.conn, "embeddings")
    }

    pub fn note_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT filepath FROM notes ORDER BY filepath")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    pub fn note_row(&self, filepath: &str) -> Result<Option<NoteRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT filepath, id, title, content, updated_at FROM notes WHERE filepath=?1",
                params![filepath],
                |r| {
                    Ok(NoteRow {
                        filepath: r.get(0)?,
                        id: r.get(1)?,
                        title: r.get(2)?,
                        content: r.get(3)?,
                        updated_at: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Source paths referencing `target`, in insertion order.
    pub fn backlinks_for(&self, target: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_filepath FROM backlinks WHERE target=?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![target], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// All `(target, source_filepath)` rows, sorted.
    pub fn backlink_rows(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT target, source_filepath FROM backlinks ORDER BY target, source_filepath",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<(String, String)>>>()?)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta(
               key TEXT PRIMARY KEY,
               value TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS notes(
               filepath TEXT PRIMARY KEY,
               id TEXT,
               title TEXT,
               content TEXT,
               updated_at TEXT
             );

             CREATE TABLE IF NOT EXISTS backlinks(
               target TEXT,
               source_filepath TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_backlinks_target ON backlinks(target);
             CREATE INDEX IF NOT EXISTS idx_backlinks_source ON backlinks(source_filepath);

             CREATE TABLE IF NOT EXISTS embeddings(
               id TEXT PRIMARY KEY,
               filepath TEXT,
               vector BLOB,
               meta TEXT
             );",
        )?;

        let schema_version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        if schema_version.is_none() {
            self.conn.execute(
                "INSERT INTO meta(key,value) VALUES('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        debug!("sqlite schema ready");

        Ok(())
    }
}

fn prune_missing(tx: &Transaction<'_>, index: &Index) -> Result<usize> {
    let live: HashSet<String> = index.paths().map(|p| p.as_str_lossy()).collect();
    let stored: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT filepath FROM notes
             UNION
             SELECT source_filepath FROM backlinks",
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()?
    };

    let mut pruned = 0usize;
    for path in stored.iter().filter(|p| !live.contains(*p)) {
        tx.execute("DELETE FROM notes WHERE filepath=?1", params![path])?;
        tx.execute("DELETE FROM backlinks WHERE source_filepath=?1", params![path])?;
        pruned += 1;
    }
    Ok(pruned)
}

fn count(conn: &Connection, table: &str) -> Result<usize> {
    let sql = format!("SELECT COUNT(1) FROM {table}");
    let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n as usize)
}
