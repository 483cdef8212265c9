//! Database layer for pathmark
//!
//! This module provides the storage layer using SQLite with:
//! - Schema creation and validation for the `hosts`, `urls` and `visits` tables
//! - Per-table accessors that map rows to [`crate::types`] values
//! - Manual transaction control for the long-running write transaction
//!
//! A [`HistoryStore`] is owned by exactly one thread at a time. The history
//! service moves it into its worker thread and never hands out references.

pub mod hosts;
pub mod query;
pub mod schema;
pub mod urls;
pub mod visits;

pub use hosts::{host_candidates, HostCandidates};
pub use query::SqlBuilder;

use crate::error::{Error, Result};
use crate::types::{Host, Url, UNSAVED_ID};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// Addresses a row either by id or by its unique url column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKey<'a> {
    Id(i64),
    Url(&'a str),
}

impl<'a> RowKey<'a> {
    /// Prefers the id; falls back to the url. Neither is a caller bug.
    pub fn resolve(id: i64, url: &'a str) -> Result<Self> {
        if id != UNSAVED_ID {
            Ok(RowKey::Id(id))
        } else if !url.is_empty() {
            Ok(RowKey::Url(url))
        } else {
            Err(Error::InvalidArgument(
                "row has neither an id nor a url".to_string(),
            ))
        }
    }
}

impl Host {
    pub fn key(&self) -> Result<RowKey<'_>> {
        RowKey::resolve(self.id, &self.url)
    }
}

impl Url {
    pub fn key(&self) -> Result<RowKey<'_>> {
        RowKey::resolve(self.id, &self.url)
    }
}

/// Exclusive handle on the history database
pub struct HistoryStore {
    conn: Connection,
    read_only: bool,
    in_transaction: bool,
}

impl HistoryStore {
    /// Open or create a database at the given path.
    ///
    /// Read-only stores never create the file and refuse every mutation.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let conn = if read_only {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA cache_size = -16000;  -- 16MB cache
                ",
            )?;
            conn
        };

        // Cascading deletes depend on this for every connection
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        tracing::debug!(path = %path.display(), read_only, "Opened history database");

        Ok(Self {
            conn,
            read_only,
            in_transaction: false,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn,
            read_only: false,
            in_transaction: false,
        })
    }

    /// Make sure all three tables exist.
    ///
    /// Writable stores create missing tables and return whether anything was
    /// created. Read-only stores only verify, and a missing table is an error.
    pub fn initialize(&self) -> Result<bool> {
        if self.read_only {
            schema::verify_tables(&self.conn)?;
            return Ok(false);
        }
        schema::ensure_all_tables(&self.conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Schema version stamped in `user_version`, 0 for an uninitialized file
    pub fn schema_version(&self) -> Result<i32> {
        schema::get_schema_version(&self.conn)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    // ============================================
    // Transactions
    // ============================================

    /// Open the long-running transaction. No-op for read-only stores.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.read_only || self.in_transaction {
            return Ok(());
        }
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction, if any.
    ///
    /// A COMMIT refused with `SQLITE_BUSY` leaves the transaction open with
    /// all staged writes, so it can be retried.
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let result = self.conn.execute_batch("COMMIT");
        self.in_transaction = !self.conn.is_autocommit();
        result?;
        Ok(())
    }

    /// Roll back the open transaction, if any
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let result = self.conn.execute_batch("ROLLBACK");
        self.in_transaction = !self.conn.is_autocommit();
        result?;
        Ok(())
    }

    /// How long a statement waits on another connection's lock before
    /// failing with `SQLITE_BUSY`
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    // ============================================
    // Whole-database operations
    // ============================================

    /// Delete every row of every table
    pub fn clear_all(&self) -> Result<()> {
        self.ensure_writable()?;
        self.conn.execute_batch(
            "
            DELETE FROM visits;
            DELETE FROM urls;
            DELETE FROM hosts;
            ",
        )?;
        tracing::info!("Cleared all history");
        Ok(())
    }

    /// Row counts for (hosts, urls, visits)
    pub fn counts(&self) -> Result<(i64, i64, i64)> {
        let count = |table: &str| -> Result<i64> {
            let n = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                    r.get(0)
                })?;
            Ok(n)
        };
        Ok((count("hosts")?, count("urls")?, count("visits")?))
    }
}
