//! All CREATE TABLE statements for the SAGE store.

use crate::error::Result;
use crate::SageStore;
use tracing::info;

impl SageStore {
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        // Databoxes: one channel bound to one package of a YAML config
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS databoxes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                channel_json TEXT NOT NULL,
                package TEXT NOT NULL,
                config_yaml TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Senders allowed to deliver to a databox, stored lowercased
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS authorized_senders (
                databox_id INTEGER NOT NULL REFERENCES databoxes(id) ON DELETE CASCADE,
                sender TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (databox_id, sender)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // One row per processed candidate file
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                databox_id INTEGER NOT NULL REFERENCES databoxes(id) ON DELETE CASCADE,
                sender TEXT NOT NULL,
                file_name TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                errors INTEGER NOT NULL DEFAULT 0,
                warnings INTEGER NOT NULL DEFAULT 0,
                detail TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Deliveries already handled, by monitor processing key
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS processed_files (
                databox_id INTEGER NOT NULL,
                processing_key TEXT NOT NULL,
                processed_at INTEGER NOT NULL,
                PRIMARY KEY (databox_id, processing_key)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_databox ON executions(databox_id)")
            .execute(&self.pool)
            .await?;

        info!("SAGE schema verified");
        Ok(())
    }
}
