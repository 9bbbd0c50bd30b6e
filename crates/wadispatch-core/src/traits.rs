use crate::{credentials::Credentials, error::DispatchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Coarse status of the transport connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messaging transport factory: the authenticate-and-connect half.
///
/// Every protocol client (WhatsApp Web today) implements this trait so the
/// dispatcher never sees protocol details.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Authenticate with `credentials` and return a live connection.
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn Connection>, DispatchError>;
}

/// A live, stateful transport session.
///
/// Sends must be issued one at a time; the engine never overlaps them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one text message to a canonical address.
    async fn send(&self, address: &str, text: &str) -> Result<(), DispatchError>;

    /// Current connection status, updated by the transport's own callbacks.
    fn state(&self) -> ConnectionState;

    /// Tear down the connection. Later sends fail.
    async fn disconnect(&self) -> Result<(), DispatchError>;
}
