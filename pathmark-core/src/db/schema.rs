//! Database schema
//!
//! Each table is checked for and created on its own so that a database with
//! some tables missing is repaired in place. Fresh databases are stamped with
//! PRAGMA user_version.

use crate::error::{Error, Result};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const HOSTS_TABLE: &str = r#"
    CREATE TABLE hosts (
        id               INTEGER PRIMARY KEY,
        url              TEXT NOT NULL UNIQUE,
        title            TEXT,
        visit_count      INTEGER NOT NULL DEFAULT 0 CHECK (visit_count >= 0),
        zoom_level       REAL NOT NULL DEFAULT 1.0
    );
    "#;

const URLS_TABLE: &str = r#"
    CREATE TABLE urls (
        id                   INTEGER PRIMARY KEY,
        host                 INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        url                  TEXT NOT NULL UNIQUE,
        title                TEXT,
        visit_count          INTEGER NOT NULL DEFAULT 0 CHECK (visit_count >= 0),
        typed_count          INTEGER NOT NULL DEFAULT 0 CHECK (typed_count >= 0),
        last_visit_time      INTEGER,
        zoom_level           REAL NOT NULL DEFAULT 1.0,
        hidden_from_overview INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_urls_host ON urls(host);
    "#;

const VISITS_TABLE: &str = r#"
    CREATE TABLE visits (
        id               INTEGER PRIMARY KEY,
        url              INTEGER NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
        visit_time       INTEGER NOT NULL,
        visit_type       INTEGER NOT NULL,
        referring_visit  INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_visits_url ON visits(url);
    CREATE INDEX IF NOT EXISTS idx_visits_time ON visits(visit_time);
    "#;

/// Check whether a table exists
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
        [table],
        |r| r.get(0),
    )?;
    Ok(exists == 1)
}

fn ensure_table(conn: &Connection, table: &str, ddl: &str) -> Result<bool> {
    if table_exists(conn, table)? {
        return Ok(false);
    }

    tracing::info!(table, "Creating table");
    conn.execute_batch(ddl).map_err(|e| {
        tracing::error!(table, error = %e, "Could not create table");
        e
    })?;
    Ok(true)
}

/// Create the `hosts` table if it is missing. Returns true when created.
pub fn ensure_hosts_table(conn: &Connection) -> Result<bool> {
    ensure_table(conn, "hosts", HOSTS_TABLE)
}

/// Create the `urls` table if it is missing. Returns true when created.
pub fn ensure_urls_table(conn: &Connection) -> Result<bool> {
    ensure_table(conn, "urls", URLS_TABLE)
}

/// Create the `visits` table if it is missing. Returns true when created.
pub fn ensure_visits_table(conn: &Connection) -> Result<bool> {
    ensure_table(conn, "visits", VISITS_TABLE)
}

/// Ensure all tables, in dependency order.
///
/// Returns true when any table was created; the caller owes a commit.
pub fn ensure_all_tables(conn: &Connection) -> Result<bool> {
    let mut created = ensure_hosts_table(conn)?;
    created |= ensure_urls_table(conn)?;
    created |= ensure_visits_table(conn)?;

    if get_schema_version(conn)? == 0 {
        conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        created = true;
    }

    Ok(created)
}

/// Fail unless all three tables are present (read-only databases)
pub fn verify_tables(conn: &Connection) -> Result<()> {
    for table in ["hosts", "urls", "visits"] {
        if !table_exists(conn, table)? {
            return Err(Error::NotFound(format!("table {} is missing", table)));
        }
    }
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_tables_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        assert!(ensure_all_tables(&conn).unwrap());
        assert!(!ensure_all_tables(&conn).unwrap());

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_all_tables(&conn).unwrap();

        for table in ["hosts", "urls", "visits"] {
            assert!(table_exists(&conn, table).unwrap(), "Table {} should exist", table);
        }
        verify_tables(&conn).unwrap();
    }

    #[test]
    fn test_missing_table_recreated() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_all_tables(&conn).unwrap();
        conn.execute_batch("DROP TABLE visits").unwrap();

        assert!(verify_tables(&conn).is_err());
        assert!(ensure_visits_table(&conn).unwrap());
        verify_tables(&conn).unwrap();
    }

    #[test]
    fn test_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        ensure_all_tables(&conn).unwrap();

        let fk_targets = |table: &str| -> Vec<(String, String)> {
            conn.prepare(&format!("PRAGMA foreign_key_list({})", table))
                .unwrap()
                .query_map([], |row| {
                    // (referenced table, on_delete)
                    Ok((row.get::<_, String>(2)?, row.get::<_, String>(6)?))
                })
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        assert_eq!(
            fk_targets("urls"),
            vec![("hosts".to_string(), "CASCADE".to_string())]
        );
        assert_eq!(
            fk_targets("visits"),
            vec![("urls".to_string(), "CASCADE".to_string())]
        );
    }
}
