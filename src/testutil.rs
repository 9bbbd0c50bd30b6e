//! Recording transport doubles shared by the binary's tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use wadispatch_core::{
    credentials::Credentials,
    error::DispatchError,
    traits::{Connection, ConnectionState, Connector},
};

/// Calls observed by a [`MockConnection`].
#[derive(Default)]
pub struct Record {
    pub sends: Mutex<Vec<(String, String)>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl Record {
    pub fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }
}

/// Connector whose connections record every call.
pub struct MockConnector {
    pub record: Arc<Record>,
    /// Fail `connect` with a transport error.
    pub fail_connect: bool,
    /// Sends that fail before the first success.
    pub failures: usize,
    /// When set, each send waits for a permit.
    pub gate: Option<Arc<Semaphore>>,
    /// When set, each connect waits for a permit.
    pub connect_gate: Option<Arc<Semaphore>>,
    /// `disconnect` closes the connection but reports an error.
    pub fail_disconnect: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            record: Arc::new(Record::default()),
            fail_connect: false,
            failures: 0,
            gate: None,
            connect_gate: None,
            fail_disconnect: false,
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, _credentials: &Credentials) -> Result<Arc<dyn Connection>, DispatchError> {
        self.record.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.connect_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_connect {
            return Err(DispatchError::Transport("handshake rejected".into()));
        }
        Ok(Arc::new(MockConnection {
            record: self.record.clone(),
            failures_left: AtomicUsize::new(self.failures),
            gate: self.gate.clone(),
            closed: AtomicBool::new(false),
            fail_disconnect: self.fail_disconnect,
        }))
    }
}

pub struct MockConnection {
    record: Arc<Record>,
    failures_left: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    closed: AtomicBool,
    fail_disconnect: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&self, address: &str, text: &str) -> Result<(), DispatchError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Transport("connection closed".into()));
        }
        self.record
            .sends
            .lock()
            .unwrap()
            .push((address.to_string(), text.to_string()));
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DispatchError::Transport("send timed out".into()));
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }

    async fn disconnect(&self) -> Result<(), DispatchError> {
        self.closed.store(true, Ordering::SeqCst);
        self.record.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(DispatchError::Transport("close frame not acknowledged".into()));
        }
        Ok(())
    }
}
