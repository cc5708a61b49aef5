//! # Turn log persistence
//!
//! A session's log is saved and loaded wholesale under a [`SessionId`]. Two
//! stores are provided:
//!
//! - [`InMemoryTurnStore`]: a map behind a mutex, for tests and throwaway runs.
//! - [`SqliteTurnStore`]: one row per turn in a SQLite database via `sqlx`, so a
//!   conversation survives restarts. The table is created on connect.
//!
//! ```rust,no_run
//! use tower_scribe::store::{SessionId, SqliteTurnStore, TurnStore};
//! use tower_scribe::turn::{Turn, TurnLog};
//!
//! # #[tokio::main]
//! # async fn main() -> tower_scribe::Result<()> {
//! let store = SqliteTurnStore::open("scribe.db").await?;
//! let id = SessionId::new("weekly-report");
//! let mut log = store.load(&id).await?;
//! log.append(Turn::user_task("Write a weekly report", None));
//! store.save(&id, &log).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::turn::{Turn, TurnLog};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait TurnStore: Send + Sync {
    /// The saved log, or an empty one if nothing was saved under `id`.
    async fn load(&self, id: &SessionId) -> Result<TurnLog>;

    /// Replace whatever was saved under `id` with `log`.
    async fn save(&self, id: &SessionId, log: &TurnLog) -> Result<()>;

    async fn clear(&self, id: &SessionId) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryTurnStore {
    logs: Mutex<HashMap<SessionId, TurnLog>>,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    async fn load(&self, id: &SessionId) -> Result<TurnLog> {
        let logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        Ok(logs.get(id).cloned().unwrap_or_default())
    }

    async fn save(&self, id: &SessionId, log: &TurnLog) -> Result<()> {
        let mut logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        logs.insert(id.clone(), log.clone());
        Ok(())
    }

    async fn clear(&self, id: &SessionId) -> Result<()> {
        let mut logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        logs.remove(id);
        Ok(())
    }
}

/// SQLite-backed store. Each turn is a JSON row ordered by `seq`.
#[derive(Debug, Clone)]
pub struct SqliteTurnStore {
    pool: Pool<Sqlite>,
}

impl SqliteTurnStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query on the
    /// same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                turn_id TEXT NOT NULL,
                producer TEXT NOT NULL,
                turn_data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Sessions with at least one saved turn.
    pub async fn sessions(&self) -> Result<Vec<SessionId>> {
        let rows = sqlx::query("SELECT DISTINCT session_id FROM turns ORDER BY session_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| SessionId::new(r.get::<String, _>("session_id")))
            .collect())
    }
}

#[async_trait]
impl TurnStore for SqliteTurnStore {
    #[instrument(level = "debug", skip(self), fields(session = %id))]
    async fn load(&self, id: &SessionId) -> Result<TurnLog> {
        let rows = sqlx::query(
            r#"
            SELECT turn_data
            FROM turns
            WHERE session_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("turn_data");
            turns.push(serde_json::from_str::<Turn>(&data)?);
        }
        debug!(turns = turns.len(), "loaded log");
        Ok(TurnLog::from_turns(turns))
    }

    #[instrument(level = "debug", skip(self, log), fields(session = %id, turns = log.len()))]
    async fn save(&self, id: &SessionId, log: &TurnLog) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        for (seq, turn) in log.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO turns (session_id, seq, turn_id, producer, turn_data, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.as_str())
            .bind(seq as i64)
            .bind(&turn.id)
            .bind(turn.producer.as_str())
            .bind(serde_json::to_string(turn)?)
            .bind(turn.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
