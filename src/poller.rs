//! Client-side status poller.
//!
//! Polls `GET /status` while a dispatch is believed active. A `disconnected`
//! reading clears the messaging flag and ends the watch; the poller never
//! retries or resumes anything itself.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wadispatch_core::{error::DispatchError, traits::ConnectionState};

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Source of connection status readings.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn status(&self) -> Result<ConnectionState, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: ConnectionState,
}

/// Reads status from a running server over HTTP.
pub struct HttpStatusProbe {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpStatusProbe {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/status", base_url.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn status(&self) -> Result<ConnectionState, DispatchError> {
        let mut req = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("status request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(DispatchError::Transport(format!(
                "status request returned {}",
                resp.status()
            )));
        }
        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("unreadable status response: {e}")))?;
        Ok(body.status)
    }
}

/// Why a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEnd {
    /// The server reported `disconnected`.
    Disconnected,
    /// The messaging flag was cleared by someone else.
    Cleared,
}

/// Periodic status watcher.
pub struct StatusPoller<P> {
    probe: P,
    interval: Duration,
    messaging: Arc<AtomicBool>,
}

impl<P: StatusProbe> StatusPoller<P> {
    /// The poller starts with the messaging flag set.
    pub fn new(probe: P, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            messaging: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared "is messaging" flag. Clearing it ends [`run`](Self::run) at the next tick.
    pub fn messaging(&self) -> Arc<AtomicBool> {
        self.messaging.clone()
    }

    /// Poll until disconnected or the flag is cleared. `on_reading` sees every
    /// successful reading.
    pub async fn run<F>(&self, mut on_reading: F) -> PollEnd
    where
        F: FnMut(ConnectionState),
    {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            ticker.tick().await;
            if !self.messaging.load(Ordering::SeqCst) {
                return PollEnd::Cleared;
            }

            match self.probe.status().await {
                Ok(ConnectionState::Disconnected) => {
                    self.messaging.store(false, Ordering::SeqCst);
                    warn!("WhatsApp disconnected; messaging stopped");
                    on_reading(ConnectionState::Disconnected);
                    return PollEnd::Disconnected;
                }
                Ok(state) => {
                    debug!("status: {state}");
                    on_reading(state);
                }
                Err(e) => warn!("status poll failed: {e}"),
            }
        }
    }
}
