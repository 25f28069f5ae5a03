//! SQLx-based storage backend for `whatsapp-rust`, one database per number.
//!
//! Implements the library's `Backend` trait surface (SignalStore +
//! AppSyncStore + ProtocolStore + DeviceStore) against SQLite. The session
//! material itself is opaque — the gateway only persists and retrieves the
//! blobs the library hands it.

mod app_sync;
mod device;
mod protocol;
mod signal;

use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use wacore::store::error::db_err;
use wagate_core::config::shellexpand;
use wagate_core::error::GatewayError;

const SCHEMA: &str = include_str!("schema.sql");

/// SQLx-backed session store for a single number.
pub struct SqliteSessionStore {
    pool: Pool<Sqlite>,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `db_path` and apply the schema.
    pub async fn new(db_path: &Path) -> Result<Self, sqlx::Error> {
        let pool =
            SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path.display())).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Fetch a single blob column keyed by a text address.
    async fn blob_for(
        &self,
        sql: &str,
        address: &str,
    ) -> wacore::store::error::Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(sql)
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(data,)| data))
    }

    /// Upsert a blob column keyed by a text address.
    async fn put_blob(
        &self,
        sql: &str,
        address: &str,
        data: &[u8],
    ) -> wacore::store::error::Result<()> {
        sqlx::query(sql)
            .bind(address)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Delete rows keyed by a text address.
    async fn delete_for(&self, sql: &str, address: &str) -> wacore::store::error::Result<()> {
        sqlx::query(sql)
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// A session key must be a bare phone number. Anything else (path
/// separators, `..`, `@`-suffixed JIDs) stays out of the filesystem layout —
/// `purge_session_dir` removes the directory this resolves to.
fn checked_number(number: &str) -> Result<(), GatewayError> {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::Store(format!(
            "invalid session number '{number}': digits only"
        )));
    }
    Ok(())
}

/// Directory holding one number's session database.
pub fn session_dir(data_dir: &str, number: &str) -> PathBuf {
    Path::new(&shellexpand(data_dir))
        .join("sessions")
        .join(number)
}

/// Path to one number's session database, creating the directory if needed.
pub fn session_db_path(data_dir: &str, number: &str) -> Result<PathBuf, GatewayError> {
    checked_number(number)?;
    let dir = session_dir(data_dir, number);
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("session.db"))
}

/// Remove a number's persisted session entirely. Missing directory is fine.
pub fn purge_session_dir(data_dir: &str, number: &str) -> Result<(), GatewayError> {
    checked_number(number)?;
    let dir = session_dir(data_dir, number);
    if dir.exists() {
        tracing::info!("purging session data at {}", dir.display());
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}
