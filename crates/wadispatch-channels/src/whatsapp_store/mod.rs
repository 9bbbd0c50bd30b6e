//! SQLx-based storage backend for `whatsapp-rust`.
//!
//! Implements the library's store traits (SignalStore + AppSyncStore +
//! ProtocolStore + DeviceStore) over one SQLite file. Most records are opaque
//! blobs and live in a single bucketed key-value table; only LID mappings and
//! app-state sync keys, which carry typed columns, get their own tables.
//!
//! The whole file is the session: [`SqlxWhatsAppStore::snapshot`] exports it
//! for use as a credential blob.

mod app_sync_store;
mod device_store;
mod protocol_store;
mod signal_store;

use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;
use wacore::store::error::db_err;

type Result<T> = wacore::store::error::Result<T>;

/// SQLx-backed WhatsApp session store.
pub struct SqlxWhatsAppStore {
    pool: Pool<Sqlite>,
}

impl SqlxWhatsAppStore {
    /// Open (or create) a store and initialize the schema.
    pub async fn open(db_path: &Path) -> std::result::Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path.display())).await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> std::result::Result<(), sqlx::Error> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS wa_kv (
                bucket TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, key)
            );
            CREATE TABLE IF NOT EXISTS wa_lid_mappings (
                lid TEXT PRIMARY KEY,
                phone_number TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                learning_source TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_wa_lid_phone ON wa_lid_mappings(phone_number);
            CREATE TABLE IF NOT EXISTS wa_app_sync_keys (
                key_id BLOB PRIMARY KEY,
                key_data BLOB NOT NULL,
                timestamp INTEGER NOT NULL DEFAULT 0,
                fingerprint BLOB
            );",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Write a self-contained copy of the database to `dest` and return its bytes.
    ///
    /// `VACUUM INTO` folds any WAL content into the copy, so the result can be
    /// restored with a plain file write.
    pub async fn snapshot(&self, dest: &Path) -> std::result::Result<Vec<u8>, sqlx::Error> {
        if dest.exists() {
            std::fs::remove_file(dest)?;
        }
        sqlx::query("VACUUM INTO ?")
            .bind(dest.display().to_string())
            .execute(&self.pool)
            .await?;
        Ok(std::fs::read(dest)?)
    }

    /// Close the pool. Later queries fail with `PoolClosed`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Whether a paired device identity is present.
    pub async fn has_device(&self) -> std::result::Result<bool, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM wa_kv WHERE bucket = 'device' LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    // --- bucketed key-value helpers shared by the trait impls ---

    async fn kv_get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM wa_kv WHERE bucket = ? AND key = ?")
                .bind(bucket)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(v,)| v))
    }

    async fn kv_put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO wa_kv (bucket, key, value) VALUES (?, ?, ?)")
            .bind(bucket)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn kv_delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        sqlx::query("DELETE FROM wa_kv WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn kv_entries(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        sqlx::query_as("SELECT key, value FROM wa_kv WHERE bucket = ? ORDER BY rowid")
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn kv_clear(&self, bucket: &str) -> Result<()> {
        sqlx::query("DELETE FROM wa_kv WHERE bucket = ?")
            .bind(bucket)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Keys of a bucket decoded as UTF-8 strings.
    async fn kv_string_keys(&self, bucket: &str) -> Result<Vec<String>> {
        Ok(self
            .kv_entries(bucket)
            .await?
            .into_iter()
            .map(|(k, _)| String::from_utf8_lossy(&k).into_owned())
            .collect())
    }
}

/// Bucket name scoped to one owner (group, collection, address).
fn scoped(bucket: &str, owner: &str) -> String {
    format!("{bucket}:{owner}")
}
