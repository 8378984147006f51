//! SQLite persistence layer.
//!
//! RULE: Only the store modules talk to the database.
//! Components read and write logical paths through `DocumentStore`;
//! they never execute SQL directly.
//!
//! The document tree is flattened to one row per leaf. Reading a path
//! gathers the row at that path plus every row beneath it and folds them
//! back into a JSON subtree.

mod memory;

pub use memory::MemoryStore;

use crate::{
    document::{check_updates, prune, split_path, tree_set, DocumentStore, Guard, Updates},
    error::FeedbackResult,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

pub struct SqliteStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SqliteStore {
    pub fn open(path: &str) -> FeedbackResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> FeedbackResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> FeedbackResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> FeedbackResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_documents.sql"))?;
        Ok(())
    }

    /// Number of leaf rows stored (for tests).
    pub fn leaf_count(&self) -> FeedbackResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM document", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &str) -> FeedbackResult<Option<Value>> {
        read_subtree(&self.conn, path)
    }

    fn set(&self, path: &str, value: Value) -> FeedbackResult<()> {
        split_path(path)?;
        let tx = self.conn.unchecked_transaction()?;
        write_subtree(&tx, path, value)?;
        tx.commit()?;
        Ok(())
    }

    fn update(&self, updates: &Updates) -> FeedbackResult<()> {
        check_updates(updates)?;
        let tx = self.conn.unchecked_transaction()?;
        for (path, value) in updates {
            write_subtree(&tx, path, value.clone())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update_if(&self, guards: &[Guard], updates: &Updates) -> FeedbackResult<bool> {
        check_updates(updates)?;
        // IMMEDIATE takes the write lock up front so the guard reads and
        // the writes see the same database state.
        let tx = rusqlite::Transaction::new_unchecked(
            &self.conn,
            rusqlite::TransactionBehavior::Immediate,
        )?;
        for guard in guards {
            let actual = read_subtree(&tx, &guard.path)?;
            if actual != guard.expected {
                log::debug!("guard failed on {}", guard.path);
                return Ok(false); // tx dropped → rolled back
            }
        }
        for (path, value) in updates {
            write_subtree(&tx, path, value.clone())?;
        }
        tx.commit()?;
        Ok(true)
    }
}

// ── Row-level tree helpers ─────────────────────────────────────────────────

fn read_subtree(conn: &Connection, path: &str) -> FeedbackResult<Option<Value>> {
    split_path(path)?;

    let exact: Option<String> = conn
        .query_row(
            "SELECT value FROM document WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(raw) = exact {
        return Ok(Some(serde_json::from_str(&raw)?));
    }

    let prefix = format!("{path}/");
    let mut stmt = conn.prepare(
        "SELECT path, value FROM document
         WHERE substr(path, 1, length(?1)) = ?1
         ORDER BY path ASC",
    )?;
    let rows = stmt
        .query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut tree = Value::Object(Map::new());
    for (full_path, raw) in rows {
        let relative: Vec<&str> = full_path[prefix.len()..].split('/').collect();
        tree_set(&mut tree, &relative, serde_json::from_str(&raw)?);
    }
    Ok(prune(tree))
}

fn write_subtree(conn: &Connection, path: &str, value: Value) -> FeedbackResult<()> {
    let segments = split_path(path)?;

    // Clear the target subtree and any leaf sitting on an ancestor.
    conn.execute(
        "DELETE FROM document WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        params![path, format!("{path}/")],
    )?;
    for depth in 1..segments.len() {
        conn.execute(
            "DELETE FROM document WHERE path = ?1",
            params![segments[..depth].join("/")],
        )?;
    }

    let mut leaves = Vec::new();
    if let Some(value) = prune(value) {
        flatten(path.to_string(), value, &mut leaves);
    }
    let mut stmt = conn.prepare("INSERT INTO document (path, value) VALUES (?1, ?2)")?;
    for (leaf_path, leaf) in leaves {
        stmt.execute(params![leaf_path, serde_json::to_string(&leaf)?])?;
    }
    Ok(())
}

fn flatten(prefix: String, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(format!("{prefix}/{key}"), child, out);
            }
        }
        leaf => out.push((prefix, leaf)),
    }
}
