//! Persistent key-value storage
//!
//! Holds the learned gear ratio table across power cycles. The store is a
//! small key-value namespace with staged writes: `set` and `erase_all` take
//! effect for readers immediately but only reach the backing file on
//! `commit`.
//!
//! Layout of the ratio table:
//!
//! ```text
//! "0" .. "{n-1}"   ratio of gear 1 .. n
//! "version"        layout version
//! ```

use crate::constants::storage::{LAYOUT_VERSION, VERSION_KEY};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt value for key {key}: {value}")]
    Corrupt { key: String, value: String },
}

/// Staged key-value store of 16-bit values
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<u16>, StorageError>;
    fn set(&mut self, key: &str, value: u16) -> Result<(), StorageError>;
    fn erase_all(&mut self) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;

    /// When a key was last committed
    fn updated_at(&self, _key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Set(String, u16),
    EraseAll,
}

/// Staged value for `key`: `Some(Some(v))` set, `Some(None)` erased, `None` untouched
fn staged(pending: &[Pending], key: &str) -> Option<Option<u16>> {
    pending.iter().rev().find_map(|op| match op {
        Pending::Set(k, v) if k == key => Some(Some(*v)),
        Pending::EraseAll => Some(None),
        _ => None,
    })
}

// ============================================================================
// SQLITE BACKEND
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
    pending: Vec<Pending>,
}

impl SqliteStore {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            pending: Vec::new(),
        };
        store.initialize()?;
        info!("Opened settings store {}", path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            pending: Vec::new(),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn write(&mut self, pending: &[Pending]) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for op in pending {
            match op {
                Pending::Set(key, value) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                        params![key, value.to_string(), now],
                    )?;
                }
                Pending::EraseAll => {
                    tx.execute("DELETE FROM settings", [])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn committed(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<u16>, StorageError> {
        if let Some(value) = staged(&self.pending, key) {
            return Ok(value);
        }

        match self.committed(key)? {
            Some(text) => text.parse().map(Some).map_err(|_| StorageError::Corrupt {
                key: key.to_string(),
                value: text,
            }),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, value: u16) -> Result<(), StorageError> {
        self.pending.push(Pending::Set(key.to_string(), value));
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), StorageError> {
        self.pending.push(Pending::EraseAll);
        Ok(())
    }

    /// Apply staged writes in one transaction; a failure rolls all of them back
    fn commit(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        if let Err(e) = self.write(&pending) {
            warn!("Commit failed, {} staged writes discarded: {}", pending.len(), e);
            return Err(e);
        }

        debug!("Committed {} staged writes", pending.len());
        Ok(())
    }

    fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT updated_at FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            Ok(parse_datetime(&text))
        } else {
            Ok(None)
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// Volatile store with failure injection
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: BTreeMap<String, (u16, DateTime<Utc>)>,
    pending: Vec<Pending>,
    /// Make `commit` fail without touching committed data
    pub fail_commits: bool,
    /// Make `get` fail
    pub fail_reads: bool,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful commits so far
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Committed key/value pairs in key order
    pub fn entries(&self) -> Vec<(String, u16)> {
        self.committed
            .iter()
            .map(|(k, (v, _))| (k.clone(), *v))
            .collect()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<u16>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Unavailable("read failure injected".to_string()));
        }
        if let Some(value) = staged(&self.pending, key) {
            return Ok(value);
        }
        Ok(self.committed.get(key).map(|(v, _)| *v))
    }

    fn set(&mut self, key: &str, value: u16) -> Result<(), StorageError> {
        self.pending.push(Pending::Set(key.to_string(), value));
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), StorageError> {
        self.pending.push(Pending::EraseAll);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_commits {
            self.pending.clear();
            return Err(StorageError::Unavailable("commit failure injected".to_string()));
        }

        let now = Utc::now();
        for op in self.pending.drain(..) {
            match op {
                Pending::Set(key, value) => {
                    self.committed.insert(key, (value, now));
                }
                Pending::EraseAll => self.committed.clear(),
            }
        }
        self.commits += 1;
        Ok(())
    }

    fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.committed.get(key).map(|(_, at)| *at))
    }
}

// ============================================================================
// RATIO TABLE LAYOUT
// ============================================================================

/// Load a complete ratio table; `None` when absent, partial or of another layout
pub fn load_ratio_table<S: KvStore + ?Sized>(
    store: &S,
    max_gears: usize,
) -> Result<Option<Vec<u16>>, StorageError> {
    match store.get(VERSION_KEY)? {
        None => {
            debug!("No stored gear ratios");
            return Ok(None);
        }
        Some(version) if version != LAYOUT_VERSION => {
            warn!(
                "Stored gear ratios use layout {} (expected {}), ignoring",
                version, LAYOUT_VERSION
            );
            return Ok(None);
        }
        Some(_) => {}
    }

    let mut ratios = Vec::with_capacity(max_gears);
    for index in 0..max_gears {
        match store.get(&index.to_string())? {
            Some(ratio) => ratios.push(ratio),
            None => break,
        }
    }

    if ratios.len() != max_gears {
        warn!(
            "Stored gear table holds {} of {} gears, ignoring",
            ratios.len(),
            max_gears
        );
        return Ok(None);
    }

    info!("Loaded gear ratios {:?}", ratios);
    Ok(Some(ratios))
}

/// Replace the stored table with `ratios`
pub fn persist_ratio_table<S: KvStore + ?Sized>(
    store: &mut S,
    ratios: &[u16],
) -> Result<(), StorageError> {
    store.erase_all()?;
    for (index, ratio) in ratios.iter().enumerate() {
        store.set(&index.to_string(), *ratio)?;
    }
    store.set(VERSION_KEY, LAYOUT_VERSION)?;
    store.commit()?;
    info!("Stored {} gear ratios", ratios.len());
    Ok(())
}

/// Remove the stored table
pub fn erase_ratio_table<S: KvStore + ?Sized>(store: &mut S) -> Result<(), StorageError> {
    store.erase_all()?;
    store.commit()
}
