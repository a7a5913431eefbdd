//! Identity persistence.
//!
//! The gallery lives in a single SQLite table. Embeddings are stored as JSON
//! arrays; `name` carries a UNIQUE constraint so concurrent enrollments that
//! both passed the existence check still cannot create two identities with
//! one name.

use faceid_core::{Embedding, Identity};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("name already registered: {0}")]
    DuplicateName(String),
    #[error("corrupt embedding for {identity_id}: {reason}")]
    CorruptEmbedding { identity_id: String, reason: String },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Partial update of an identity. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

/// Gallery persistence used by enrollment and identification.
pub trait IdentityStore: Send + Sync {
    /// Active identities in enrollment order.
    fn list_active(&self) -> Result<Vec<Identity>, StoreError>;
    fn exists_by_name(&self, name: &str) -> Result<bool, StoreError>;
    /// Append all `staged` identities in one transaction; nothing is written
    /// if any insert fails.
    fn commit(&self, staged: &[Identity]) -> Result<(), StoreError>;
    fn get(&self, identity_id: &str) -> Result<Option<Identity>, StoreError>;
    fn list(&self, skip: usize, limit: usize) -> Result<Vec<Identity>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
    fn update(&self, identity_id: &str, update: &IdentityUpdate) -> Result<Option<Identity>, StoreError>;
    /// Remove one identity, returning it so the caller can release artifacts.
    fn delete(&self, identity_id: &str) -> Result<Option<Identity>, StoreError>;
    /// Remove every identity, returning what was removed.
    fn delete_all(&self) -> Result<Vec<Identity>, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    identity_id            TEXT PRIMARY KEY,
    name                   TEXT NOT NULL UNIQUE,
    embedding              TEXT NOT NULL,
    is_active              INTEGER NOT NULL DEFAULT 1,
    face_image_path        TEXT,
    face_preprocessed_path TEXT,
    created_at             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_active ON identities(is_active);
";

const COLUMNS: &str =
    "identity_id, name, embedding, is_active, face_image_path, face_preprocessed_path, created_at";

/// SQLite-backed [`IdentityStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawIdentity::from_row)?;
        let identities = rows.map(|r| r?.into_identity()).collect();
        identities
    }
}

impl IdentityStore for SqliteStore {
    fn list_active(&self) -> Result<Vec<Identity>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM identities WHERE is_active = 1 ORDER BY rowid"),
            [],
        )
    }

    fn exists_by_name(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM identities WHERE name = ?1", [name], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn commit(&self, staged: &[Identity]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO identities ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))?;
            for identity in staged {
                let embedding = serde_json::to_string(&identity.embedding).map_err(|e| {
                    StoreError::CorruptEmbedding {
                        identity_id: identity.identity_id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                stmt.execute(params![
                    identity.identity_id,
                    identity.name,
                    embedding,
                    identity.is_active,
                    identity.face_image_path,
                    identity.face_preprocessed_path,
                    identity.created_at,
                ])
                .map_err(|e| map_unique(e, &identity.name))?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = staged.len(), "committed identities");
        Ok(())
    }

    fn get(&self, identity_id: &str) -> Result<Option<Identity>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM identities WHERE identity_id = ?1"),
                [identity_id],
                RawIdentity::from_row,
            )
            .optional()?;
        raw.map(RawIdentity::into_identity).transpose()
    }

    fn list(&self, skip: usize, limit: usize) -> Result<Vec<Identity>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM identities ORDER BY rowid LIMIT ?1 OFFSET ?2"),
            params![limit as i64, skip as i64],
        )
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM identities", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn update(&self, identity_id: &str, update: &IdentityUpdate) -> Result<Option<Identity>, StoreError> {
        {
            let conn = self.conn()?;
            let changed = conn
                .execute(
                    "UPDATE identities SET name = COALESCE(?2, name), is_active = COALESCE(?3, is_active)
                     WHERE identity_id = ?1",
                    params![identity_id, update.name, update.is_active],
                )
                .map_err(|e| map_unique(e, update.name.as_deref().unwrap_or_default()))?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get(identity_id)
    }

    fn delete(&self, identity_id: &str) -> Result<Option<Identity>, StoreError> {
        let existing = self.get(identity_id)?;
        if existing.is_some() {
            self.conn()?
                .execute("DELETE FROM identities WHERE identity_id = ?1", [identity_id])?;
        }
        Ok(existing)
    }

    fn delete_all(&self) -> Result<Vec<Identity>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = {
            let mut stmt = tx.prepare(&format!("SELECT {COLUMNS} FROM identities ORDER BY rowid"))?;
            let rows = stmt.query_map([], RawIdentity::from_row)?;
            let removed = rows.map(|r| r?.into_identity()).collect::<Result<Vec<_>, StoreError>>()?;
            removed
        };
        tx.execute("DELETE FROM identities", [])?;
        tx.commit()?;
        Ok(removed)
    }
}

fn map_unique(err: rusqlite::Error, name: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == ErrorCode::ConstraintViolation && msg.contains("identities.name") =>
        {
            StoreError::DuplicateName(name.to_string())
        }
        _ => StoreError::Sqlite(err),
    }
}

/// Row as read from SQLite, before the embedding JSON is parsed.
struct RawIdentity {
    identity_id: String,
    name: String,
    embedding: String,
    is_active: bool,
    face_image_path: Option<String>,
    face_preprocessed_path: Option<String>,
    created_at: String,
}

impl RawIdentity {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity_id: row.get(0)?,
            name: row.get(1)?,
            embedding: row.get(2)?,
            is_active: row.get(3)?,
            face_image_path: row.get(4)?,
            face_preprocessed_path: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_identity(self) -> Result<Identity, StoreError> {
        let embedding: Embedding =
            serde_json::from_str(&self.embedding).map_err(|e| StoreError::CorruptEmbedding {
                identity_id: self.identity_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Identity {
            identity_id: self.identity_id,
            name: self.name,
            embedding,
            is_active: self.is_active,
            face_image_path: self.face_image_path,
            face_preprocessed_path: self.face_preprocessed_path,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str, values: Vec<f32>) -> Identity {
        Identity {
            identity_id: id.into(),
            name: name.into(),
            embedding: Embedding::new(values),
            is_active: true,
            face_image_path: Some(format!("face_images/{id}.jpg")),
            face_preprocessed_path: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_commit_and_list_active_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .commit(&[identity("b", "Bob", vec![0.0, 1.0]), identity("a", "Alice", vec![1.0, 0.5])])
            .unwrap();

        let active = store.list_active().unwrap();
        let names: Vec<_> = active.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Alice"]);
        assert_eq!(active[1].embedding.values, vec![1.0, 0.5]);
        assert_eq!(active[0].face_image_path.as_deref(), Some("face_images/b.jpg"));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_exists_by_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.exists_by_name("Alice").unwrap());
        store.commit(&[identity("a", "Alice", vec![1.0])]).unwrap();
        assert!(store.exists_by_name("Alice").unwrap());
        assert!(!store.exists_by_name("alice").unwrap());
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.commit(&[identity("a", "Alice", vec![1.0])]).unwrap();

        let err = store
            .commit(&[identity("c", "Carol", vec![1.0]), identity("d", "Alice", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "Alice"));
        assert!(!store.exists_by_name("Carol").unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_inactive_excluded_from_gallery() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .commit(&[identity("a", "Alice", vec![1.0]), identity("b", "Bob", vec![1.0])])
            .unwrap();
        let updated = store
            .update("a", &IdentityUpdate { is_active: Some(false), ..Default::default() })
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.name, "Alice");

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].identity_id, "b");
    }

    #[test]
    fn test_update_rename_conflict_and_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .commit(&[identity("a", "Alice", vec![1.0]), identity("b", "Bob", vec![1.0])])
            .unwrap();
        let err = store
            .update("b", &IdentityUpdate { name: Some("Alice".into()), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(_)));
        assert!(store.update("zzz", &IdentityUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn test_delete_returns_removed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.commit(&[identity("a", "Alice", vec![1.0])]).unwrap();
        let removed = store.delete("a").unwrap().unwrap();
        assert_eq!(removed.name, "Alice");
        assert!(store.delete("a").unwrap().is_none());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_delete_all() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .commit(&[identity("a", "Alice", vec![1.0]), identity("b", "Bob", vec![1.0])])
            .unwrap();
        let removed = store.delete_all().unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_list_pagination() {
        let store = SqliteStore::open_in_memory().unwrap();
        let batch: Vec<_> = (0..5)
            .map(|i| identity(&format!("id{i}"), &format!("user{i}"), vec![i as f32]))
            .collect();
        store.commit(&batch).unwrap();
        let page = store.list(1, 2).unwrap();
        let ids: Vec<_> = page.iter().map(|i| i.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["id1", "id2"]);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/faces.db");
        let store = SqliteStore::open(&path).unwrap();
        store.commit(&[identity("a", "Alice", vec![1.0])]).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.exists_by_name("Alice").unwrap());
    }
}
