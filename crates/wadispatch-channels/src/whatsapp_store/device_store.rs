//! Paired device identity.

use async_trait::async_trait;
use wacore::store::error::StoreError;
use wacore::store::traits::DeviceStore;
use wacore::store::Device;

use super::{Result, SqlxWhatsAppStore};

const DEVICE: &str = "device";
const PRIMARY: &[u8] = b"primary";

#[async_trait]
impl DeviceStore for SqlxWhatsAppStore {
    async fn save(&self, device: &Device) -> Result<()> {
        // Key material uses byte-oriented serde; bincode round-trips it, JSON does not.
        let data =
            bincode::serialize(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv_put(DEVICE, PRIMARY, &data).await
    }

    async fn load(&self) -> Result<Option<Device>> {
        self.kv_get(DEVICE, PRIMARY)
            .await?
            .map(|data| {
                bincode::deserialize(&data).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.kv_get(DEVICE, PRIMARY).await?.is_some())
    }

    async fn create(&self) -> Result<i32> {
        // Single-device store. Device contents arrive later through save().
        Ok(1)
    }
}
