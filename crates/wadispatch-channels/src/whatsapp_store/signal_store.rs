//! Signal protocol records: identities, sessions, prekeys and sender keys.

use async_trait::async_trait;
use wacore::store::traits::SignalStore;

use super::{Result, SqlxWhatsAppStore};

const IDENTITY: &str = "identity";
const SESSION: &str = "session";
const PREKEY: &str = "prekey";
const SIGNED_PREKEY: &str = "signed_prekey";
const SENDER_KEY: &str = "sender_key";

fn id_key(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

#[async_trait]
impl SignalStore for SqlxWhatsAppStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.kv_put(IDENTITY, address.as_bytes(), &key).await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.kv_get(IDENTITY, address.as_bytes()).await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.kv_delete(IDENTITY, address.as_bytes()).await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.kv_get(SESSION, address.as_bytes()).await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.kv_put(SESSION, address.as_bytes(), session).await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.kv_delete(SESSION, address.as_bytes()).await
    }

    // Upload state is tracked server-side; only the record is kept.
    async fn store_prekey(&self, id: u32, record: &[u8], _uploaded: bool) -> Result<()> {
        self.kv_put(PREKEY, &id_key(id), record).await
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.kv_get(PREKEY, &id_key(id)).await
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.kv_delete(PREKEY, &id_key(id)).await
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        self.kv_put(SIGNED_PREKEY, &id_key(id), record).await
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.kv_get(SIGNED_PREKEY, &id_key(id)).await
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        Ok(self
            .kv_entries(SIGNED_PREKEY)
            .await?
            .into_iter()
            .filter_map(|(key, record)| {
                let id: [u8; 4] = key.as_slice().try_into().ok()?;
                Some((u32::from_be_bytes(id), record))
            })
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.kv_delete(SIGNED_PREKEY, &id_key(id)).await
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.kv_put(SENDER_KEY, address.as_bytes(), record).await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.kv_get(SENDER_KEY, address.as_bytes()).await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.kv_delete(SENDER_KEY, address.as_bytes()).await
    }
}
