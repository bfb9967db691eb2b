// Durable repoKey → ConnectionRecord mapping.
//
// Write-through: an in-memory index serves reads, every mutation lands in
// SQLite (or, when the database cannot be opened, a JSON file at the
// configured fallback path). A per-key async lock registry serialises
// whole sync cycles per connection; the index lock only guards the map.

pub mod db;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use chrono::{DateTime, Utc};
use engram_common::types::{ConnectionRecord, RepoKey, SyncHistoryEntry};
use rusqlite::params;
use tracing::{debug, warn};

use db::Database;

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StoreError {
    /// Attempt to move `last_processed_pr` backwards. Invariant violation;
    /// callers must treat this as a programming error.
    CursorRegression { repo_key: String, from: i64, to: i64 },
    /// Cursor update for a repository that is not connected.
    UnknownConnection { repo_key: String },
    /// The backing store failed.
    Backend { message: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CursorRegression { repo_key, from, to } => {
                write!(f, "cursor regression for {repo_key}: {from} -> {to}")
            }
            Self::UnknownConnection { repo_key } => {
                write!(f, "no connection record for {repo_key}")
            }
            Self::Backend { message } => write!(f, "store backend error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

fn backend_error(error: impl std::fmt::Display) -> StoreError {
    StoreError::Backend { message: error.to_string() }
}

/// Partial cursor update applied after a sync cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorUpdate {
    pub last_processed_pr: Option<i64>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

// ── Store ──────────────────────────────────────────────────────────

enum Backend {
    Sqlite(StdMutex<Database>),
    JsonFile(PathBuf),
}

struct StoreInner {
    index: RwLock<HashMap<String, ConnectionRecord>>,
    backend: Backend,
    locks: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct ConnectionStore {
    inner: Arc<StoreInner>,
}

impl ConnectionStore {
    /// Open the store at `db_path`, degrading to a JSON map at
    /// `fallback_path` when the database cannot be opened.
    pub fn open(db_path: &Path, fallback_path: &Path) -> Self {
        let backend = match Database::open(db_path) {
            Ok(database) => Backend::Sqlite(StdMutex::new(database)),
            Err(error) => {
                warn!(
                    db_path = %db_path.display(),
                    fallback = %fallback_path.display(),
                    %error,
                    "database unavailable, using JSON fallback store"
                );
                Backend::JsonFile(fallback_path.to_path_buf())
            }
        };
        Self::with_backend(backend)
    }

    /// An in-memory-only store for tests: JSON backend pointed at a path
    /// inside `dir`.
    pub fn open_in(dir: &Path) -> Self {
        Self::open(&dir.join("engram.db"), &dir.join("connections.json"))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                index: RwLock::new(HashMap::new()),
                backend,
                locks: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Load every persisted record into the in-memory index. Returns the
    /// number of connections loaded.
    pub fn initialize(&self) -> Result<usize, StoreError> {
        let records = match &self.inner.backend {
            Backend::Sqlite(database) => {
                let database = database.lock().expect("store database lock poisoned");
                load_all_rows(&database)?
            }
            Backend::JsonFile(path) => load_json_file(path)?,
        };

        let mut index = self.inner.index.write().expect("store index lock poisoned");
        index.clear();
        for record in records {
            index.insert(record.repo_key.normalized(), record);
        }
        debug!(connections = index.len(), "connection store initialized");
        Ok(index.len())
    }

    /// The per-key lock serialising sync cycles for one repository.
    pub fn lock_for(&self, repo_key: &RepoKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.locks.lock().expect("store lock registry poisoned");
        Arc::clone(locks.entry(repo_key.normalized()).or_default())
    }

    pub fn get(&self, repo_key: &RepoKey) -> Option<ConnectionRecord> {
        self.inner
            .index
            .read()
            .expect("store index lock poisoned")
            .get(&repo_key.normalized())
            .cloned()
    }

    pub fn all(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> =
            self.inner.index.read().expect("store index lock poisoned").values().cloned().collect();
        records.sort_by(|a, b| a.repo_key.normalized().cmp(&b.repo_key.normalized()));
        records
    }

    pub fn all_for_user(&self, user_id: i64) -> Vec<ConnectionRecord> {
        self.all().into_iter().filter(|record| record.owner_user.id == user_id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.index.read().expect("store index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a record, write-through.
    pub fn put(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        self.persist(&record)?;
        self.inner
            .index
            .write()
            .expect("store index lock poisoned")
            .insert(record.repo_key.normalized(), record);
        Ok(())
    }

    /// Remove a record. Returns whether anything was removed.
    pub fn delete(&self, repo_key: &RepoKey) -> Result<bool, StoreError> {
        let removed = self
            .inner
            .index
            .write()
            .expect("store index lock poisoned")
            .remove(&repo_key.normalized())
            .is_some();
        if removed {
            match &self.inner.backend {
                Backend::Sqlite(database) => {
                    let database = database.lock().expect("store database lock poisoned");
                    database
                        .connection()
                        .execute(
                            "DELETE FROM connections WHERE repo_key = ?1",
                            [repo_key.normalized()],
                        )
                        .map_err(backend_error)?;
                }
                Backend::JsonFile(path) => self.rewrite_json(path)?,
            }
        }
        Ok(removed)
    }

    /// Advance the sync cursor. Idempotent; a decrease of
    /// `last_processed_pr` is rejected as a `CursorRegression`.
    pub fn update_cursor(
        &self,
        repo_key: &RepoKey,
        update: CursorUpdate,
    ) -> Result<ConnectionRecord, StoreError> {
        let mut record = self
            .get(repo_key)
            .ok_or_else(|| StoreError::UnknownConnection { repo_key: repo_key.to_string() })?;

        if let Some(new_pr) = update.last_processed_pr {
            let old_pr = record.last_processed_pr.unwrap_or(0);
            if new_pr < old_pr {
                return Err(StoreError::CursorRegression {
                    repo_key: repo_key.to_string(),
                    from: old_pr,
                    to: new_pr,
                });
            }
            record.last_processed_pr = Some(new_pr);
        }
        if let Some(synced_at) = update.last_synced_at {
            record.last_synced_at = Some(synced_at);
        }
        record.last_updated_at = Utc::now();

        self.put(record.clone())?;
        Ok(record)
    }

    /// Append a sync-history row. Best-effort: the JSON fallback keeps no
    /// history and backend failures only log.
    pub fn record_history(&self, entry: &SyncHistoryEntry) {
        let Backend::Sqlite(database) = &self.inner.backend else {
            return;
        };
        let database = database.lock().expect("store database lock poisoned");
        let result = database.connection().execute(
            "INSERT INTO sync_history \
             (repo_key, pr_number, commit_sha, sync_type, is_significant, change_type, \
              summary, synced_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.repo_key.normalized(),
                entry.pr_number,
                entry.commit_sha,
                entry.sync_type.as_str(),
                entry.is_significant,
                entry.change_type,
                entry.summary,
                entry.synced_at.to_rfc3339(),
            ],
        );
        if let Err(error) = result {
            warn!(repo_key = %entry.repo_key, %error, "failed to record sync history");
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    fn persist(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        match &self.inner.backend {
            Backend::Sqlite(database) => {
                let database = database.lock().expect("store database lock poisoned");
                upsert_row(&database, record)
            }
            Backend::JsonFile(path) => {
                // The index may not contain this record yet; include it.
                let mut records: HashMap<String, ConnectionRecord> =
                    self.inner.index.read().expect("store index lock poisoned").clone();
                records.insert(record.repo_key.normalized(), record.clone());
                write_json_file(path, records.into_values().collect())
            }
        }
    }

    fn rewrite_json(&self, path: &Path) -> Result<(), StoreError> {
        let records: Vec<ConnectionRecord> =
            self.inner.index.read().expect("store index lock poisoned").values().cloned().collect();
        write_json_file(path, records)
    }
}

// ── SQLite row mapping ─────────────────────────────────────────────

fn upsert_row(database: &Database, record: &ConnectionRecord) -> Result<(), StoreError> {
    let collection_ids =
        serde_json::to_string(&record.collection_ids).map_err(backend_error)?;
    let owner_user = serde_json::to_string(&record.owner_user).map_err(backend_error)?;

    database
        .connection()
        .execute(
            "INSERT INTO connections \
             (repo_key, credential, workspace_endpoint, document_id, document_title, \
              collection_ids, owner_user, connected_at, last_updated_at, last_synced_at, \
              last_processed_pr, confidence, auto_sync_enabled) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT(repo_key) DO UPDATE SET \
              credential = excluded.credential, \
              workspace_endpoint = excluded.workspace_endpoint, \
              document_id = excluded.document_id, \
              document_title = excluded.document_title, \
              collection_ids = excluded.collection_ids, \
              owner_user = excluded.owner_user, \
              last_updated_at = excluded.last_updated_at, \
              last_synced_at = excluded.last_synced_at, \
              last_processed_pr = excluded.last_processed_pr, \
              confidence = excluded.confidence, \
              auto_sync_enabled = excluded.auto_sync_enabled",
            params![
                record.repo_key.as_str(),
                record.credential.expose(),
                record.workspace_endpoint,
                record.document_id,
                record.document_title,
                collection_ids,
                owner_user,
                record.connected_at.to_rfc3339(),
                record.last_updated_at.to_rfc3339(),
                record.last_synced_at.map(|t| t.to_rfc3339()),
                record.last_processed_pr,
                record.confidence,
                record.auto_sync_enabled,
            ],
        )
        .map_err(backend_error)?;
    Ok(())
}

fn load_all_rows(database: &Database) -> Result<Vec<ConnectionRecord>, StoreError> {
    let mut stmt = database
        .connection()
        .prepare(
            "SELECT repo_key, credential, workspace_endpoint, document_id, document_title, \
             collection_ids, owner_user, connected_at, last_updated_at, last_synced_at, \
             last_processed_pr, confidence, auto_sync_enabled \
             FROM connections",
        )
        .map_err(backend_error)?;

    let rows = stmt
        .query_map([], |row| {
            let repo_key: String = row.get(0)?;
            let credential: String = row.get(1)?;
            let workspace_endpoint: String = row.get(2)?;
            let document_id: Option<String> = row.get(3)?;
            let document_title: String = row.get(4)?;
            let collection_ids: String = row.get(5)?;
            let owner_user: String = row.get(6)?;
            let connected_at: String = row.get(7)?;
            let last_updated_at: String = row.get(8)?;
            let last_synced_at: Option<String> = row.get(9)?;
            let last_processed_pr: Option<i64> = row.get(10)?;
            let confidence: Option<f64> = row.get(11)?;
            let auto_sync_enabled: bool = row.get(12)?;
            Ok((
                repo_key,
                credential,
                workspace_endpoint,
                document_id,
                document_title,
                collection_ids,
                owner_user,
                connected_at,
                last_updated_at,
                last_synced_at,
                last_processed_pr,
                confidence,
                auto_sync_enabled,
            ))
        })
        .map_err(backend_error)?;

    let mut records = Vec::new();
    for row in rows {
        let (
            repo_key,
            credential,
            workspace_endpoint,
            document_id,
            document_title,
            collection_ids,
            owner_user,
            connected_at,
            last_updated_at,
            last_synced_at,
            last_processed_pr,
            confidence,
            auto_sync_enabled,
        ) = row.map_err(backend_error)?;

        let Some(repo_key) = RepoKey::parse(&repo_key) else {
            warn!(repo_key, "skipping row with malformed repo key");
            continue;
        };

        records.push(ConnectionRecord {
            repo_key,
            credential: engram_common::types::Credential::new(credential),
            workspace_endpoint,
            document_id,
            document_title,
            collection_ids: serde_json::from_str(&collection_ids).map_err(backend_error)?,
            owner_user: serde_json::from_str(&owner_user).map_err(backend_error)?,
            connected_at: parse_instant(&connected_at)?,
            last_updated_at: parse_instant(&last_updated_at)?,
            last_synced_at: last_synced_at.as_deref().map(parse_instant).transpose()?,
            last_processed_pr,
            auto_sync_enabled,
            confidence: confidence.unwrap_or(0.0),
        });
    }
    Ok(records)
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, StoreError> {
    value
        .parse::<DateTime<Utc>>()
        .map_err(|error| backend_error(format!("bad timestamp `{value}`: {error}")))
}

// ── JSON fallback ──────────────────────────────────────────────────

fn load_json_file(path: &Path) -> Result<Vec<ConnectionRecord>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path).map_err(backend_error)?;
    serde_json::from_str(&contents).map_err(backend_error)
}

fn write_json_file(path: &Path, mut records: Vec<ConnectionRecord>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(backend_error)?;
    }
    records.sort_by(|a, b| a.repo_key.normalized().cmp(&b.repo_key.normalized()));
    let contents = serde_json::to_string_pretty(&records).map_err(backend_error)?;
    std::fs::write(path, contents).map_err(backend_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_common::types::{Credential, OwnerUser};
    use tempfile::TempDir;

    fn record(owner: &str, name: &str) -> ConnectionRecord {
        ConnectionRecord::new(
            RepoKey::new(owner, name),
            Credential::new("ghp_test"),
            "https://workspace.example/rpc",
            OwnerUser { id: 7, login: owner.into(), display_name: owner.into(), email: None },
            Utc::now(),
        )
    }

    fn sqlite_store(dir: &TempDir) -> ConnectionStore {
        let store = ConnectionStore::open(
            &dir.path().join("engram.db"),
            &dir.path().join("connections.json"),
        );
        store.initialize().expect("store should initialize");
        store
    }

    // ── Basic CRUD ─────────────────────────────────────────────────

    #[test]
    fn put_get_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);

        let rec = record("octocat", "hello");
        store.put(rec.clone()).expect("put should work");
        assert_eq!(store.get(&rec.repo_key), Some(rec.clone()));
        assert_eq!(store.len(), 1);

        assert!(store.delete(&rec.repo_key).expect("delete should work"));
        assert!(store.get(&rec.repo_key).is_none());
        assert!(!store.delete(&rec.repo_key).expect("second delete is a no-op"));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);

        store.put(record("Octocat", "Hello")).expect("put should work");
        let found = store.get(&RepoKey::new("octocat", "hello")).expect("should find");
        assert_eq!(found.repo_key.as_str(), "Octocat/Hello");
    }

    #[test]
    fn initialize_rebuilds_index_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let store = sqlite_store(&dir);
            store.put(record("octocat", "hello")).expect("put should work");
            store.put(record("octocat", "world")).expect("put should work");
        }

        let reopened = ConnectionStore::open(
            &dir.path().join("engram.db"),
            &dir.path().join("connections.json"),
        );
        let loaded = reopened.initialize().expect("initialize should load rows");
        assert_eq!(loaded, 2);
        assert!(reopened.get(&RepoKey::new("octocat", "world")).is_some());
    }

    #[test]
    fn missing_database_degrades_to_json_file() {
        let dir = TempDir::new().unwrap();
        // A directory where the db file should be forces the fallback.
        let db_path = dir.path().join("engram.db");
        std::fs::create_dir_all(&db_path).unwrap();
        let fallback = dir.path().join("connections.json");

        let store = ConnectionStore::open(&db_path, &fallback);
        store.initialize().expect("fallback store should initialize");
        store.put(record("octocat", "hello")).expect("put should persist to json");
        assert!(fallback.exists(), "fallback file should be written");

        // A fresh store over the same fallback sees the record.
        let reopened = ConnectionStore::open(&db_path, &fallback);
        assert_eq!(reopened.initialize().expect("reload"), 1);
    }

    // ── Cursor semantics ───────────────────────────────────────────

    #[test]
    fn cursor_advances_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        let rec = record("octocat", "hello");
        store.put(rec.clone()).expect("put should work");

        let now = Utc::now();
        let updated = store
            .update_cursor(
                &rec.repo_key,
                CursorUpdate { last_processed_pr: Some(44), last_synced_at: Some(now) },
            )
            .expect("cursor should advance");
        assert_eq!(updated.last_processed_pr, Some(44));
        assert_eq!(updated.last_synced_at, Some(now));

        // Same value again: idempotent.
        let again = store
            .update_cursor(
                &rec.repo_key,
                CursorUpdate { last_processed_pr: Some(44), ..CursorUpdate::default() },
            )
            .expect("equal cursor is fine");
        assert_eq!(again.last_processed_pr, Some(44));
    }

    #[test]
    fn cursor_regression_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        let rec = record("octocat", "hello");
        store.put(rec.clone()).expect("put should work");
        store
            .update_cursor(
                &rec.repo_key,
                CursorUpdate { last_processed_pr: Some(44), ..CursorUpdate::default() },
            )
            .expect("advance");

        let error = store
            .update_cursor(
                &rec.repo_key,
                CursorUpdate { last_processed_pr: Some(41), ..CursorUpdate::default() },
            )
            .expect_err("regression must fail");
        assert!(matches!(error, StoreError::CursorRegression { from: 44, to: 41, .. }));

        // The stored cursor is untouched.
        let current = store.get(&rec.repo_key).unwrap();
        assert_eq!(current.last_processed_pr, Some(44));
    }

    #[test]
    fn cursor_update_for_unknown_repo_fails() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        let error = store
            .update_cursor(&RepoKey::new("ghost", "repo"), CursorUpdate::default())
            .expect_err("unknown repo must fail");
        assert!(matches!(error, StoreError::UnknownConnection { .. }));
    }

    // ── Per-key locks ──────────────────────────────────────────────

    #[tokio::test]
    async fn lock_for_returns_the_same_lock_per_key() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);

        let a = store.lock_for(&RepoKey::new("octocat", "hello"));
        let b = store.lock_for(&RepoKey::new("Octocat", "Hello"));
        assert!(Arc::ptr_eq(&a, &b), "case-insensitive keys share a lock");

        let guard = a.lock().await;
        assert!(b.try_lock().is_err(), "second acquisition must block");
        drop(guard);
        assert!(b.try_lock().is_ok());
    }

    // ── History & user filtering ───────────────────────────────────

    #[test]
    fn history_rows_are_recorded() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);
        let rec = record("octocat", "hello");
        store.put(rec.clone()).expect("put should work");

        store.record_history(&SyncHistoryEntry {
            repo_key: rec.repo_key.clone(),
            pr_number: Some(43),
            commit_sha: None,
            sync_type: engram_common::types::SyncType::Pr,
            is_significant: true,
            change_type: "feature".into(),
            summary: "adds auth".into(),
            synced_at: Utc::now(),
        });

        // Verify through a second handle on the same database.
        let db = Database::open(dir.path().join("engram.db")).expect("db should open");
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM sync_history", [], |row| row.get(0))
            .expect("history count query should succeed");
        assert_eq!(count, 1);
    }

    #[test]
    fn all_for_user_filters_by_owner_id() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir);

        let mut mine = record("octocat", "hello");
        mine.owner_user.id = 7;
        let mut theirs = record("alice", "world");
        theirs.owner_user.id = 8;
        store.put(mine).unwrap();
        store.put(theirs).unwrap();

        let visible = store.all_for_user(7);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].repo_key.as_str(), "octocat/hello");
    }
}
