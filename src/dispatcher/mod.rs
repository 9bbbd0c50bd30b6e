//! Dispatch controller: owns the single transport connection and the
//! in-flight delivery task.
//!
//! One dispatch runs at a time. `start` connects, records the session and
//! spawns the engine; the session row is the source of truth for how the
//! dispatch ended. `stop` marks active sessions stopped and tears the
//! connection down, so an in-flight loop fails on its next send.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wadispatch_core::{
    credentials::Credentials,
    engine::{DeliveryEngine, DeliveryOutcome},
    error::DispatchError,
    policy::DeliveryPolicy,
    segment::segment,
    target::{resolve_targets, TargetKind},
    traits::{Connection, ConnectionState, Connector},
};
use wadispatch_memory::{NewSession, Session, SessionStatus, Store};

/// Everything needed to run one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub credentials: Credentials,
    pub user_phone: String,
    pub target_kind: TargetKind,
    /// Newline-delimited raw targets; blank means self-send.
    pub target_phones: String,
    pub message: String,
    pub policy: DeliveryPolicy,
}

/// A running dispatch task.
///
/// Dropping the handle detaches the task; it keeps running and records its
/// outcome on the session row.
pub struct DispatchHandle {
    session_id: String,
    task: JoinHandle<Result<DeliveryOutcome, DispatchError>>,
}

impl DispatchHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the dispatch to end.
    pub async fn join(self) -> Result<DeliveryOutcome, DispatchError> {
        self.task
            .await
            .map_err(|e| DispatchError::Transport(format!("dispatch task panicked: {e}")))?
    }
}

/// Result of an explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// Sessions moved from `active` to `stopped`.
    pub stopped_sessions: u64,
    /// Whether a live connection was torn down.
    pub disconnected: bool,
}

enum Slot {
    Idle,
    Connecting,
    /// A stop arrived while connecting; the pending start must back out.
    Cancelled,
    Active {
        connection: Arc<dyn Connection>,
        session_id: String,
        running: Arc<AtomicBool>,
    },
}

/// Single-connection dispatch controller.
pub struct Dispatcher {
    connector: Arc<dyn Connector>,
    store: Store,
    engine: DeliveryEngine,
    slot: Mutex<Slot>,
}

impl Dispatcher {
    pub fn new(connector: Arc<dyn Connector>, store: Store, engine: DeliveryEngine) -> Self {
        Self {
            connector,
            store,
            engine,
            slot: Mutex::new(Slot::Idle),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Validate, connect, record the session and spawn delivery.
    pub async fn start(&self, request: DispatchRequest) -> Result<DispatchHandle, DispatchError> {
        let user_phone = request.user_phone.trim().to_string();
        if user_phone.is_empty() {
            return Err(DispatchError::Validation("Phone number is required".into()));
        }
        let lines = segment(&request.message);
        if lines.is_empty() {
            return Err(DispatchError::Validation(
                "Message content is required".into(),
            ));
        }
        let targets = resolve_targets(&request.target_phones, &user_phone, request.target_kind);

        let previous = self.claim().await?;
        if let Some(old) = previous {
            if let Err(e) = old.disconnect().await {
                warn!("failed to close previous connection: {e}");
            }
        }

        info!(
            "connecting via {} (credentials from {})",
            self.connector.name(),
            request.credentials.source()
        );
        let connection = match self.connector.connect(&request.credentials).await {
            Ok(c) => c,
            Err(e) => {
                error!("transport initialization failed: {e}");
                *self.slot.lock().await = Slot::Idle;
                return Err(e);
            }
        };

        let session = match self
            .store
            .create_session(&NewSession {
                user_phone,
                target_type: request.target_kind,
                target_phones: request.target_phones.clone(),
                policy: request.policy,
            })
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.abandon(&connection).await;
                return Err(e);
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        {
            let mut slot = self.slot.lock().await;
            if matches!(*slot, Slot::Cancelled) {
                *slot = Slot::Idle;
                drop(slot);
                if let Err(e) = self
                    .store
                    .finish_session(&session.id, SessionStatus::Stopped, None)
                    .await
                {
                    warn!("failed to mark {} stopped: {e}", session.id);
                }
                if let Err(e) = connection.disconnect().await {
                    warn!("failed to close connection after stop: {e}");
                }
                return Err(DispatchError::Transport(
                    "dispatch stopped while connecting".into(),
                ));
            }
            *slot = Slot::Active {
                connection: connection.clone(),
                session_id: session.id.clone(),
                running: running.clone(),
            };
        }

        info!(
            "dispatch {} started: {} target(s) x {} line(s)",
            session.id,
            targets.len(),
            lines.len()
        );

        let engine = self.engine.clone();
        let store = self.store.clone();
        let session_id = session.id.clone();
        let policy = request.policy;
        let task = tokio::spawn(async move {
            let result = engine
                .dispatch(connection.as_ref(), &targets, &lines, &policy)
                .await;

            let (status, reason) = match &result {
                Ok(outcome) => {
                    info!(
                        "dispatch {session_id} completed: {} sent, {} attempts",
                        outcome.sent, outcome.attempts
                    );
                    (SessionStatus::Completed, None)
                }
                Err(e) => {
                    error!("dispatch {session_id} failed: {e}");
                    (SessionStatus::Failed, Some(e.to_string()))
                }
            };
            if let Err(e) = store
                .finish_session(&session_id, status, reason.as_deref())
                .await
            {
                error!("failed to record outcome of {session_id}: {e}");
            }
            running.store(false, Ordering::SeqCst);
            result
        });

        Ok(DispatchHandle {
            session_id: session.id,
            task,
        })
    }

    /// Reserve the slot for a new dispatch. Returns a finished dispatch's
    /// connection for the caller to close.
    async fn claim(&self) -> Result<Option<Arc<dyn Connection>>, DispatchError> {
        let mut slot = self.slot.lock().await;
        let previous = match &*slot {
            Slot::Connecting => {
                return Err(DispatchError::Conflict(
                    "A dispatch is already connecting".into(),
                ))
            }
            // The cancelled start still owns the slot until it backs out.
            Slot::Cancelled => {
                return Err(DispatchError::Conflict(
                    "A stopped dispatch is still shutting down".into(),
                ))
            }
            Slot::Active {
                running,
                session_id,
                ..
            } if running.load(Ordering::SeqCst) => {
                return Err(DispatchError::Conflict(format!(
                    "Dispatch {session_id} is still running; stop it first"
                )))
            }
            Slot::Active { connection, .. } => Some(connection.clone()),
            Slot::Idle => None,
        };
        *slot = Slot::Connecting;
        Ok(previous)
    }

    async fn abandon(&self, connection: &Arc<dyn Connection>) {
        if let Err(e) = connection.disconnect().await {
            warn!("failed to close connection: {e}");
        }
        *self.slot.lock().await = Slot::Idle;
    }

    /// Mark every active session stopped and tear down the connection.
    ///
    /// Sessions are marked before the disconnect so the in-flight loop's
    /// failure cannot record the stop as `failed`. A disconnect error is
    /// logged; the slot is released either way.
    pub async fn stop(&self) -> Result<StopOutcome, DispatchError> {
        let connection = {
            let mut slot = self.slot.lock().await;
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Active {
                    connection,
                    session_id,
                    ..
                } => {
                    info!("stopping dispatch {session_id}");
                    Some(connection)
                }
                Slot::Connecting | Slot::Cancelled => {
                    *slot = Slot::Cancelled;
                    None
                }
                Slot::Idle => None,
            }
        };

        let stopped = self.store.stop_active_sessions().await;

        let disconnected = match connection {
            Some(c) => match c.disconnect().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("failed to close connection on stop: {e}");
                    false
                }
            },
            None => false,
        };

        let stopped_sessions = stopped?;
        info!("stop: {stopped_sessions} session(s) stopped, disconnected={disconnected}");
        Ok(StopOutcome {
            stopped_sessions,
            disconnected,
        })
    }

    /// Live connection status.
    pub async fn status(&self) -> ConnectionState {
        match &*self.slot.lock().await {
            Slot::Idle | Slot::Cancelled => ConnectionState::Disconnected,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Active { connection, .. } => connection.state(),
        }
    }

    /// Whether a dispatch task is still delivering.
    pub async fn is_dispatching(&self) -> bool {
        matches!(
            &*self.slot.lock().await,
            Slot::Active { running, .. } if running.load(Ordering::SeqCst)
        )
    }

    pub async fn active_sessions(&self) -> Result<Vec<Session>, DispatchError> {
        self.store.active_sessions().await
    }

    /// Set a session's status directly. `None` if the id is unknown.
    pub async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<Option<Session>, DispatchError> {
        self.store.update_status(id, status).await
    }
}
