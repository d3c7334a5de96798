//! SQLite store for SAGE: databoxes, authorized senders, execution records
//! and the processed-file ledger.
//!
//! [`SageStore`] is async over an `sqlx` pool. The daemon is blocking, so it
//! talks to [`BlockingStore`], which drives the same operations on a
//! current-thread runtime and implements [`Registry`] and
//! [`sage_monitor::ProcessedFiles`].
//!
//! ```rust,ignore
//! let store = BlockingStore::connect("sqlite:/var/lib/sage/sage.db?mode=rwc")?;
//! for databox in store.list_active_endpoints()? { /* ... */ }
//! store.close();
//! ```

mod blocking;
mod error;
mod schema;
mod store;
mod types;

pub use blocking::BlockingStore;
pub use error::{Result, StoreError};
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Persistence operations the daemon depends on.
pub trait Registry {
    fn list_active_endpoints(&self) -> Result<Vec<Databox>>;
    fn is_sender_authorized(&self, sender: &str, databox_id: i64) -> Result<bool>;
    fn record_execution(&self, record: &ExecutionRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct SageStore {
    pool: SqlitePool,
}

impl SageStore {
    /// Connect to a database URL and create missing tables.
    pub async fn connect(url: &str) -> Result<Self> {
        // Every in-memory connection is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("SAGE store connected");
        Ok(store)
    }

    /// Open or create a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.display())).await
    }

    /// In-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}
