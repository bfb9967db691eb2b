use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE connections (
    repo_key            TEXT PRIMARY KEY COLLATE NOCASE,
    credential          TEXT NOT NULL,
    workspace_endpoint  TEXT NOT NULL,
    document_id         TEXT NULL,
    document_title      TEXT NOT NULL,
    collection_ids      TEXT NOT NULL,
    owner_user          TEXT NOT NULL,
    connected_at        TEXT NOT NULL,
    last_updated_at     TEXT NOT NULL,
    last_synced_at      TEXT NULL,
    last_processed_pr   INTEGER NULL,
    confidence          REAL NULL,
    auto_sync_enabled   INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE sync_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_key        TEXT NOT NULL,
    pr_number       INTEGER NULL,
    commit_sha      TEXT NULL,
    sync_type       TEXT NOT NULL CHECK (sync_type IN ('pr', 'commit', 'manual')),
    is_significant  INTEGER NOT NULL,
    change_type     TEXT NOT NULL,
    summary         TEXT NOT NULL,
    synced_at       TEXT NOT NULL
);

CREATE INDEX sync_history_repo_idx ON sync_history (repo_key, synced_at);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

/// The SQLite database behind the connection store.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database parent directory `{}`", parent.display())
            })?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open database at `{}`", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Database;
    use tempfile::TempDir;

    const EXPECTED_TABLES: &[&str] = &["schema_migrations", "connections", "sync_history"];

    #[test]
    fn open_creates_schema() {
        let dir = TempDir::new().expect("temp dir should be created");
        let db = Database::open(dir.path().join("engram.db")).expect("db should open");

        for table in EXPECTED_TABLES {
            let exists: i64 = db
                .connection()
                .query_row(
                    "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("table existence query should succeed");
            assert_eq!(exists, 1, "expected `{table}` table to exist");
        }

        assert_eq!(db.schema_version().expect("schema version should be readable"), 1);
    }

    #[test]
    fn opening_twice_is_idempotent() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("engram.db");
        {
            let first = Database::open(&path).expect("first open should succeed");
            assert_eq!(first.schema_version().unwrap(), 1);
        }

        let second = Database::open(&path).expect("second open should succeed");
        let migration_rows: i64 = second
            .connection()
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("migration count query should succeed");
        assert_eq!(migration_rows, 1);
    }

    #[test]
    fn repo_key_uniqueness_is_case_insensitive() {
        let dir = TempDir::new().expect("temp dir should be created");
        let db = Database::open(dir.path().join("engram.db")).expect("db should open");

        let insert = "INSERT INTO connections \
             (repo_key, credential, workspace_endpoint, document_title, collection_ids, \
              owner_user, connected_at, last_updated_at) \
             VALUES (?1, 't', 'e', 'd', '{}', '{}', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        db.connection().execute(insert, ["octocat/hello"]).expect("first insert should work");
        let error = db.connection().execute(insert, ["Octocat/Hello"]).expect_err("duplicate");
        assert!(error.to_string().to_lowercase().contains("unique"));
    }
}
