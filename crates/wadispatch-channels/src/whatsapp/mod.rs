//! WhatsApp transport via `whatsapp-rust` (WhatsApp Web protocol).
//!
//! Credentials carry a snapshot of a paired session store. Every connection
//! restores that snapshot into its own directory under `sessions_dir`, so
//! concurrent or repeated connects never share mutable protocol state.

mod bot;
mod pairing;
mod session;


pub use pairing::{pair, render_qr_terminal, PAIRING_TIMEOUT};
pub use session::{decode_session, encode_session, SESSION_FORMAT};

use crate::whatsapp_store::SqlxWhatsAppStore;
use async_trait::async_trait;
use bot::{Link, LinkState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wacore_binary::jid::Jid;
use wadispatch_core::{
    config::{shellexpand, WhatsAppConfig},
    credentials::Credentials,
    error::DispatchError,
    traits::{Connection, ConnectionState, Connector},
};

/// Opens WhatsApp connections from session credentials.
pub struct WhatsAppConnector {
    sessions_dir: PathBuf,
    connect_timeout: Duration,
}

impl WhatsAppConnector {
    pub fn new(config: &WhatsAppConfig, connect_timeout: Duration) -> Self {
        Self {
            sessions_dir: PathBuf::from(shellexpand(&config.sessions_dir)),
            connect_timeout,
        }
    }

    async fn open_link(&self, dir: &Path, snapshot: &[u8]) -> Result<Link, DispatchError> {
        let db_path = dir.join("whatsapp.db");
        std::fs::write(&db_path, snapshot)?;

        let store = SqlxWhatsAppStore::open(&db_path)
            .await
            .map_err(|e| DispatchError::Transport(format!("whatsapp store init failed: {e}")))?;
        let paired = match store.has_device().await {
            Ok(paired) => paired,
            Err(e) => {
                store.close().await;
                return Err(DispatchError::Transport(format!(
                    "whatsapp store read failed: {e}"
                )));
            }
        };
        if !paired {
            store.close().await;
            return Err(DispatchError::Transport(
                "session snapshot holds no paired device".into(),
            ));
        }

        let link = bot::launch(Arc::new(store), None).await?;
        if let Err(e) = link.wait_connected(self.connect_timeout).await {
            link.shutdown().await;
            return Err(e);
        }
        Ok(link)
    }
}

#[async_trait]
impl Connector for WhatsAppConnector {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn Connection>, DispatchError> {
        let snapshot = decode_session(credentials)?;

        let dir = self.sessions_dir.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)?;
        info!("WhatsApp connecting (session dir: {})", dir.display());

        match self.open_link(&dir, &snapshot).await {
            Ok(link) => Ok(Arc::new(WhatsAppConnection { link, session_dir: dir })),
            Err(e) => {
                remove_session_dir(&dir);
                Err(e)
            }
        }
    }
}

/// A live WhatsApp Web session.
pub struct WhatsAppConnection {
    link: Link,
    session_dir: PathBuf,
}

#[async_trait]
impl Connection for WhatsAppConnection {
    async fn send(&self, address: &str, text: &str) -> Result<(), DispatchError> {
        let closed = *self.link.state_rx.borrow() == LinkState::Closed;
        if closed {
            return Err(DispatchError::Transport("connection closed".into()));
        }

        let jid: Jid = address
            .parse()
            .map_err(|e| DispatchError::Transport(format!("invalid whatsapp JID '{address}': {e}")))?;

        let client = self
            .link
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| DispatchError::Transport("whatsapp client not connected".into()))?;

        let msg = waproto::whatsapp::Message {
            conversation: Some(text.to_string()),
            ..Default::default()
        };
        client
            .send_message(jid, msg)
            .await
            .map_err(|e| DispatchError::Transport(format!("whatsapp send failed: {e}")))?;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.link.state_rx.borrow().connection_state()
    }

    async fn disconnect(&self) -> Result<(), DispatchError> {
        self.link.shutdown().await;
        remove_session_dir(&self.session_dir);
        info!("WhatsApp connection closed");
        Ok(())
    }
}

fn remove_session_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("failed to remove session dir {}: {e}", dir.display());
        }
    }
}
