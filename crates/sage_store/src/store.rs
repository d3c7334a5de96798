//! Databox, sender, execution and processed-file operations.

use crate::error::{Result, StoreError};
use crate::types::*;
use crate::SageStore;
use sage_monitor::ChannelConfig;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, warn};

fn normalize_sender(sender: &str) -> String {
    sender.trim().to_lowercase()
}

impl SageStore {
    // ========================================================================
    // Databoxes
    // ========================================================================

    pub async fn create_databox(&self, databox: &NewDatabox) -> Result<i64> {
        let now = Self::now_millis();
        let channel_json = serde_json::to_string(&databox.channel)?;

        let id = sqlx::query(
            r#"
            INSERT INTO databoxes (name, channel_json, package, config_yaml, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&databox.name)
        .bind(&channel_json)
        .bind(&databox.package)
        .bind(&databox.config_yaml)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(databox_id = id, name = %databox.name, "databox created");
        Ok(id)
    }

    pub async fn get_databox(&self, id: i64) -> Result<Option<Databox>> {
        let row = sqlx::query("SELECT * FROM databoxes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_databox).transpose()
    }

    pub async fn set_databox_active(&self, id: i64, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE databoxes SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Self::now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("databox {}", id)));
        }
        Ok(())
    }

    /// Active databoxes ordered by id. Rows with unreadable channel JSON are
    /// skipped with a warning rather than failing the whole listing.
    pub async fn list_active_databoxes(&self) -> Result<Vec<Databox>> {
        let rows = sqlx::query("SELECT * FROM databoxes WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut databoxes = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_databox(row) {
                Ok(d) => databoxes.push(d),
                Err(e) => {
                    let id: i64 = row.try_get("id").unwrap_or_default();
                    warn!(databox_id = id, error = %e, "skipping databox with unreadable row");
                }
            }
        }
        Ok(databoxes)
    }

    // ========================================================================
    // Authorized senders
    // ========================================================================

    pub async fn authorize_sender(&self, databox_id: i64, sender: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO authorized_senders (databox_id, sender, created_at) VALUES (?, ?, ?)",
        )
        .bind(databox_id)
        .bind(normalize_sender(sender))
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke_sender(&self, databox_id: i64, sender: &str) -> Result<()> {
        sqlx::query("DELETE FROM authorized_senders WHERE databox_id = ? AND sender = ?")
            .bind(databox_id)
            .bind(normalize_sender(sender))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Case-insensitive and scoped to one databox.
    pub async fn is_sender_authorized(&self, sender: &str, databox_id: i64) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM authorized_senders WHERE databox_id = ? AND sender = ? LIMIT 1",
        )
        .bind(databox_id)
        .bind(normalize_sender(sender))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    // ========================================================================
    // Executions
    // ========================================================================

    pub async fn record_execution(&self, record: &ExecutionRecord) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO executions
                (databox_id, sender, file_name, started_at, finished_at, status, errors, warnings, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.databox_id)
        .bind(&record.sender)
        .bind(&record.file_name)
        .bind(record.started_at.timestamp_millis())
        .bind(record.finished_at.timestamp_millis())
        .bind(record.status.as_str())
        .bind(record.errors as i64)
        .bind(record.warnings as i64)
        .bind(&record.detail)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Executions of one databox, oldest first.
    pub async fn list_executions(&self, databox_id: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE databox_id = ? ORDER BY id")
            .bind(databox_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_execution).collect()
    }

    // ========================================================================
    // Processed files
    // ========================================================================

    pub async fn is_processed(&self, databox_id: i64, key: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM processed_files WHERE databox_id = ? AND processing_key = ? LIMIT 1",
        )
        .bind(databox_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn mark_processed(&self, databox_id: i64, key: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO processed_files (databox_id, processing_key, processed_at) VALUES (?, ?, ?)",
        )
        .bind(databox_id)
        .bind(key)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_databox(row: &SqliteRow) -> Result<Databox> {
    let channel_json: String = row.try_get("channel_json")?;
    let channel = ChannelConfig::from_json(&channel_json).map_err(|e| StoreError::InvalidValue {
        column: "channel_json",
        value: e.to_string(),
    })?;
    let active: i64 = row.try_get("active")?;

    Ok(Databox {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        channel,
        package: row.try_get("package")?,
        config_yaml: row.try_get("config_yaml")?,
        active: active != 0,
    })
}

fn row_to_execution(row: &SqliteRow) -> Result<ExecutionRecord> {
    let status: String = row.try_get("status")?;
    let status: ExecutionStatus = status.parse().map_err(|_| StoreError::InvalidValue {
        column: "status",
        value: status.clone(),
    })?;
    let errors: i64 = row.try_get("errors")?;
    let warnings: i64 = row.try_get("warnings")?;

    Ok(ExecutionRecord {
        databox_id: row.try_get("databox_id")?,
        sender: row.try_get("sender")?,
        file_name: row.try_get("file_name")?,
        started_at: SageStore::millis_to_datetime(row.try_get("started_at")?),
        finished_at: SageStore::millis_to_datetime(row.try_get("finished_at")?),
        status,
        errors: errors.max(0) as u64,
        warnings: warnings.max(0) as u64,
        detail: row.try_get("detail")?,
    })
}
