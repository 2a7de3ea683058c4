//! Transcript records and the fingerprint index, backed by sqlite.
//!
//! The two tables are written in one transaction from the persist stage, so
//! a fingerprint can never exist without its transcript record (and a failed
//! persist leaves neither behind).

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::pipeline::stages::{Persister, StageError, Transcript};

#[derive(Debug, Error)]
pub enum TranscriptDbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Sqlite-backed transcript store + fingerprint index
pub struct TranscriptDb {
    conn: Mutex<Connection>,
}

impl TranscriptDb {
    /// Open (or create) the database at the given path
    pub fn open(path: &Path) -> Result<Self, TranscriptDbError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests
    pub fn open_in_memory() -> Result<Self, TranscriptDbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), TranscriptDbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                language TEXT NOT NULL,
                duration_seconds REAL NOT NULL,
                completed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fingerprints (
                key TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                completed_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Whether a fingerprint is recorded as successfully processed
    pub async fn fingerprint_exists(&self, key: &str) -> Result<bool, TranscriptDbError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fingerprints WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert (or overwrite) a transcript record and its fingerprint in a
    /// single transaction.
    pub async fn insert_transcript(
        &self,
        key: &str,
        title: &str,
        transcript: &Transcript,
    ) -> Result<(), TranscriptDbError> {
        let completed_at = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO transcripts (fingerprint, title, content, language, duration_seconds, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (fingerprint) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 language = excluded.language,
                 duration_seconds = excluded.duration_seconds,
                 completed_at = excluded.completed_at",
            params![
                key,
                title,
                transcript.text,
                transcript.language,
                transcript.duration_seconds,
                completed_at
            ],
        )?;
        tx.execute(
            "INSERT INTO fingerprints (key, title, completed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET
                 title = excluded.title,
                 completed_at = excluded.completed_at",
            params![key, title, completed_at],
        )?;
        tx.commit()?;

        info!(%key, %title, "transcript persisted");
        Ok(())
    }

    /// Number of stored transcripts
    pub async fn transcript_count(&self) -> Result<i64, TranscriptDbError> {
        let conn = self.conn.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transcripts", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl Persister for TranscriptDb {
    async fn lookup(&self, key: &str) -> Result<bool, StageError> {
        self.fingerprint_exists(key)
            .await
            .map_err(|e| StageError::Persist(e.to_string()))
    }

    async fn persist(
        &self,
        key: &str,
        title: &str,
        transcript: &Transcript,
    ) -> Result<(), StageError> {
        self.insert_transcript(key, title, transcript)
            .await
            .map_err(|e| StageError::Persist(e.to_string()))
    }
}
