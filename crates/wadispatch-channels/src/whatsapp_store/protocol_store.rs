//! Group fan-out state, LID/phone mappings, base keys and device lists.

use async_trait::async_trait;
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::{DeviceListRecord, LidPnMappingEntry, ProtocolStore};

use super::{scoped, Result, SqlxWhatsAppStore};

const SKDM: &str = "skdm";
const FORGET: &str = "forget";
const BASE_KEY: &str = "base_key";
const DEVICE_LIST: &str = "device_list";

type LidRow = (String, String, i64, i64, String);

fn lid_entry((lid, phone_number, created_at, updated_at, learning_source): LidRow) -> LidPnMappingEntry {
    LidPnMappingEntry {
        lid,
        phone_number,
        created_at,
        updated_at,
        learning_source,
    }
}

const LID_COLUMNS: &str = "lid, phone_number, created_at, updated_at, learning_source";

#[async_trait]
impl ProtocolStore for SqlxWhatsAppStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        self.kv_string_keys(&scoped(SKDM, group_jid)).await
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        let bucket = scoped(SKDM, group_jid);
        for device in device_jids {
            self.kv_put(&bucket, device.as_bytes(), &[]).await?;
        }
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        self.kv_clear(&scoped(SKDM, group_jid)).await
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        let row: Option<LidRow> =
            sqlx::query_as(&format!("SELECT {LID_COLUMNS} FROM wa_lid_mappings WHERE lid = ?"))
                .bind(lid)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(lid_entry))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        let row: Option<LidRow> = sqlx::query_as(&format!(
            "SELECT {LID_COLUMNS} FROM wa_lid_mappings WHERE phone_number = ? \
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO wa_lid_mappings ({LID_COLUMNS}) VALUES (?, ?, ?, ?, ?)"
        ))
        .bind(&entry.lid)
        .bind(&entry.phone_number)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(&entry.learning_source)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        let rows: Vec<LidRow> =
            sqlx::query_as(&format!("SELECT {LID_COLUMNS} FROM wa_lid_mappings"))
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(lid_entry).collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        self.kv_put(&scoped(BASE_KEY, address), message_id.as_bytes(), base_key)
            .await
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        let stored = self
            .kv_get(&scoped(BASE_KEY, address), message_id.as_bytes())
            .await?;
        Ok(stored.is_some_and(|k| k == current_base_key))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        self.kv_delete(&scoped(BASE_KEY, address), message_id.as_bytes())
            .await
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let data =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv_put(DEVICE_LIST, record.user.as_bytes(), &data).await
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        self.kv_get(DEVICE_LIST, user.as_bytes())
            .await?
            .map(|data| {
                serde_json::from_slice(&data).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        self.kv_put(&scoped(FORGET, group_jid), participant.as_bytes(), &[])
            .await
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let bucket = scoped(FORGET, group_jid);
        let marks = self.kv_string_keys(&bucket).await?;
        self.kv_clear(&bucket).await?;
        Ok(marks)
    }
}
