//! Bot lifecycle: build, run, and track link state from library events.

use crate::whatsapp_store::SqlxWhatsAppStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use wadispatch_core::{error::DispatchError, traits::ConnectionState};
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

/// Link state as reported by the bot's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    /// The server asked for a QR scan: the store holds no usable device.
    NeedsPairing,
    LoggedOut,
    /// Torn down locally. Terminal; later events are ignored.
    Closed,
}

impl LinkState {
    pub(super) fn connection_state(self) -> ConnectionState {
        match self {
            Self::Connecting => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Connected,
            Self::Disconnected | Self::NeedsPairing | Self::LoggedOut | Self::Closed => {
                ConnectionState::Disconnected
            }
        }
    }

    pub(super) fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut | Self::Closed)
    }

    /// No longer waiting on the server: connected, or never going to be.
    fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::NeedsPairing) || self.is_terminal()
    }
}

/// Grace period for the bot's run loop to exit after a disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared handles onto a running bot.
pub(super) struct Link {
    pub(super) state_tx: Arc<watch::Sender<LinkState>>,
    pub(super) state_rx: watch::Receiver<LinkState>,
    /// Set once connected; used for sending.
    pub(super) client: Arc<Mutex<Option<Arc<Client>>>>,
    bot_client: Arc<Client>,
    run_task: Mutex<Option<JoinHandle<()>>>,
    store: Arc<SqlxWhatsAppStore>,
}

impl Link {
    /// Move to `next` unless the link is already terminal.
    fn transition(&self, next: LinkState) {
        apply_transition(&self.state_tx, next);
    }

    /// Close the socket, end the run loop and release the store.
    ///
    /// Idempotent. The store file can be removed once this returns.
    pub(super) async fn shutdown(&self) {
        self.transition(LinkState::Closed);
        *self.client.lock().await = None;

        let Some(task) = self.run_task.lock().await.take() else {
            return;
        };
        self.bot_client.disconnect().await;
        let abort = task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("WhatsApp run loop did not exit in time, aborting");
            abort.abort();
        }
        self.store.close().await;
        debug!("WhatsApp bot shut down");
    }

    /// Wait until the bot connects, fails, or the timeout elapses.
    pub(super) async fn wait_connected(
        &self,
        timeout: std::time::Duration,
    ) -> Result<(), DispatchError> {
        let mut rx = self.state_rx.clone();
        let outcome = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.is_settled()),
        )
        .await;

        match outcome {
            Err(_) => Err(DispatchError::Transport(format!(
                "WhatsApp did not connect within {}s",
                timeout.as_secs()
            ))),
            Ok(Err(_)) => Err(DispatchError::Transport("WhatsApp bot stopped".into())),
            Ok(Ok(state)) => match *state {
                LinkState::Connected => Ok(()),
                LinkState::NeedsPairing => Err(DispatchError::Transport(
                    "session is not paired; run `wadispatch pair` to create new credentials".into(),
                )),
                LinkState::LoggedOut => Err(DispatchError::Transport(
                    "session was logged out from the phone".into(),
                )),
                _ => Err(DispatchError::Transport("connection closed".into())),
            },
        }
    }
}

fn apply_transition(tx: &watch::Sender<LinkState>, next: LinkState) {
    tx.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Build a bot over `store` and run it in the background.
///
/// QR codes are forwarded to `qr_tx` when given (pairing); otherwise a QR
/// request just marks the link as needing pairing.
pub(super) async fn launch(
    store: Arc<SqlxWhatsAppStore>,
    qr_tx: Option<mpsc::Sender<String>>,
) -> Result<Link, DispatchError> {
    let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
    let state_tx = Arc::new(state_tx);
    let client: Arc<Mutex<Option<Arc<Client>>>> = Arc::new(Mutex::new(None));

    let state_for_event = state_tx.clone();
    let client_for_event = client.clone();

    let mut bot = Bot::builder()
        .with_backend(store.clone())
        .with_transport_factory(TokioWebSocketTransportFactory::new())
        .with_http_client(UreqHttpClient::new())
        .on_event(move |event, event_client| {
            let state = state_for_event.clone();
            let client_slot = client_for_event.clone();
            let qr_fwd = qr_tx.clone();
            async move {
                let terminal = state.borrow().is_terminal();
                if terminal {
                    return;
                }
                match event {
                    Event::PairingQrCode { code, .. } => {
                        debug!("WhatsApp requested a QR scan");
                        apply_transition(&state, LinkState::NeedsPairing);
                        if let Some(sender) = qr_fwd.as_ref() {
                            let _ = sender.send(code).await;
                        }
                    }
                    Event::PairSuccess(_) => {
                        info!("WhatsApp pairing successful");
                        apply_transition(&state, LinkState::Connecting);
                    }
                    Event::Connected(_) => {
                        info!("WhatsApp connected");
                        *client_slot.lock().await = Some(event_client);
                        apply_transition(&state, LinkState::Connected);
                    }
                    Event::Disconnected(_) => {
                        warn!("WhatsApp disconnected");
                        apply_transition(&state, LinkState::Disconnected);
                    }
                    Event::LoggedOut(_) => {
                        warn!("WhatsApp logged out, session invalidated");
                        *client_slot.lock().await = None;
                        apply_transition(&state, LinkState::LoggedOut);
                    }
                    _ => {}
                }
            }
        })
        .build()
        .await
        .map_err(|e| DispatchError::Transport(format!("whatsapp bot build failed: {e}")))?;

    let bot_client = bot.client();
    let run_task = bot
        .run()
        .await
        .map_err(|e| DispatchError::Transport(format!("whatsapp bot run failed: {e}")))?;

    Ok(Link {
        state_tx,
        state_rx,
        client,
        bot_client,
        run_task: Mutex::new(Some(run_task)),
        store,
    })
}
