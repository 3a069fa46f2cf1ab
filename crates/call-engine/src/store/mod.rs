//! # Persistent Call Store (sqlx + SQLite)
//!
//! Every fact the engine acts on lives here: campaigns with their counters,
//! the lead queue, transfer rosters and settings, cascades and their
//! append-only attempt audit. All state transitions are guarded updates
//! (`UPDATE ... WHERE status = expected`) checked via `rows_affected`, so a
//! transition that lost a race reports failure instead of silently clobbering
//! a newer state. Counter maintenance happens in the same transaction as the
//! status write it accounts for.
//!
//! The store is `Clone` and fully `Send`; handles can be passed freely into
//! `tokio::spawn`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{OrchestratorError, Result};

mod campaigns;
mod leads;
mod transfers;

pub use leads::ClaimedLead;

/// Shared handle to the orchestrator database.
#[derive(Clone)]
pub struct CallStore {
    pool: SqlitePool,
}

impl CallStore {
    /// Open (creating if necessary) the database at the configured path and
    /// bring the schema up to date.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::open(&config.database_path, config.max_connections).await
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::open(":memory:", 1).await
    }

    async fn open(path: &str, max_connections: u32) -> Result<Self> {
        info!("🗄️ Opening call store: {}", path);

        let in_memory = path == ":memory:" || path == "sqlite::memory:";
        let file_path = if in_memory {
            // A uniquely named throwaway database file per store. A single
            // pinned `:memory:` connection deadlocks the paused-clock test
            // runtime (the pool's acquire deadline is a tokio timer, and
            // auto-advance jumps straight to it while SQLite works on its
            // blocking thread), and a multi-connection shared-cache memory
            // database hits immediate `database table is locked` errors
            // that `busy_timeout` does not cover. A WAL-mode temp file
            // supports several connections whose busy waits happen on the
            // blocking worker thread, in real time.
            static NEXT_DB: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
            std::env::temp_dir()
                .join(format!(
                    "callstore_test_{}_{}.db",
                    std::process::id(),
                    NEXT_DB.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                ))
                .to_string_lossy()
                .into_owned()
        } else {
            path.to_string()
        };
        let options = SqliteConnectOptions::new()
            .filename(&file_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        // The shared-cache memory database lives as long as at least one
        // connection stays open, so test connections are never recycled.
        // `test_before_acquire` is disabled for tests: the liveness ping
        // parks on the acquire-deadline timer, which a paused test clock
        // auto-advances past instantly.
        const TEST_POOL_CONNECTIONS: u32 = 8;
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(TEST_POOL_CONNECTIONS)
                .min_connections(TEST_POOL_CONNECTIONS)
                .idle_timeout(None)
                .max_lifetime(None)
                .test_before_acquire(false)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;

        if in_memory {
            // Open every connection up front; lazily opening one mid-test
            // would again park on the acquire-deadline timer.
            let mut warm = Vec::new();
            for _ in 0..TEST_POOL_CONNECTIONS {
                warm.push(pool.acquire().await?);
            }
            drop(warm);
        }

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("✅ Call store ready (schema migrated)");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Decode a stored status string, failing loudly on anything the enums do
/// not recognize. Corrupt rows must never pass as valid states.
fn decode_status<T, F>(column: &str, raw: &str, parse: F) -> Result<T>
where
    F: FnOnce(&str) -> Option<T>,
{
    parse(raw).ok_or_else(|| {
        OrchestratorError::database(format!("unrecognized {} value: {:?}", column, raw))
    })
}
