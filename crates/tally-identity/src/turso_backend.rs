//! Turso (SQLite-compatible) coordination backend
//!
//! Instances that share the database file agree on values through
//! `INSERT ... ON CONFLICT DO NOTHING`, which the database applies atomically.

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use tally_core::{Result, TallyError};
use tokio::sync::Mutex;
use tracing::instrument;
use turso::{params, Builder, Connection};

use crate::backend::KeyValueBackend;

/// Coordination backend stored in a Turso database
pub struct TursoBackend {
    name: String,
    path: String,
    conn: Mutex<Connection>,
}

fn db_error(e: turso::Error) -> TallyError {
    TallyError::Coordination(format!("turso error: {}", e))
}

impl TursoBackend {
    /// Open (or create) the coordination database at `path`
    pub async fn open<P: AsRef<Path>>(name: impl Into<String>, path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = Builder::new_local(&path_str).build().await.map_err(db_error)?;
        let conn = db.connect().map_err(db_error)?;

        let _ = conn
            .query("PRAGMA journal_mode=WAL", params![])
            .await
            .map_err(db_error)?;
        let _ = conn
            .query("PRAGMA busy_timeout=5000", params![])
            .await
            .map_err(db_error)?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS coordination (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            params![],
        )
        .await
        .map_err(db_error)?;

        Ok(Self {
            name: name.into(),
            path: path_str,
            conn: Mutex::new(conn),
        })
    }

    /// Returns the database file path
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl KeyValueBackend for TursoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT value FROM coordination WHERE key = ?", params![key])
            .await
            .map_err(db_error)?;

        match rows.next().await.map_err(db_error)? {
            Some(row) => {
                let value: String = row.get(0).map_err(db_error)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                r#"INSERT INTO coordination (key, value, created_at)
                   VALUES (?, ?, ?)
                   ON CONFLICT(key) DO NOTHING"#,
                params![key, value, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(db_error)?;

        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_turso_first_write_wins() {
        let dir = TempDir::new().unwrap();
        let backend = TursoBackend::open("primaryDefault", dir.path().join("coord.db"))
            .await
            .unwrap();

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.set_if_absent("k", "first").await.unwrap());
        assert!(!backend.set_if_absent("k", "second").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_turso_value_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coord.db");

        {
            let backend = TursoBackend::open("primaryDefault", &path).await.unwrap();
            assert!(backend.set_if_absent("k", "first").await.unwrap());
        }

        let backend = TursoBackend::open("primaryDefault", &path).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("first"));
    }
}
