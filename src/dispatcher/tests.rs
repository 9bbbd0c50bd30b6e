use super::*;
use crate::testutil::MockConnector;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Semaphore;
use wadispatch_core::credentials::CredentialSource;

fn request(targets: &str, message: &str, policy: DeliveryPolicy) -> DispatchRequest {
    DispatchRequest {
        credentials: Credentials::parse("{}", CredentialSource::Upload).unwrap(),
        user_phone: "401111111".into(),
        target_kind: TargetKind::Individual,
        target_phones: targets.into(),
        message: message.into(),
        policy,
    }
}

fn no_retry(delay_ms: u64) -> DeliveryPolicy {
    DeliveryPolicy::new(delay_ms, false, 3).unwrap()
}

async fn dispatcher(connector: MockConnector) -> (Dispatcher, Arc<crate::testutil::Record>) {
    let record = connector.record.clone();
    let store = Store::in_memory().await.unwrap();
    let d = Dispatcher::new(
        Arc::new(connector),
        store,
        DeliveryEngine::new(Duration::from_millis(1000)),
    );
    (d, record)
}

#[tokio::test]
async fn test_dispatch_completes_and_records_session() {
    let (d, record) = dispatcher(MockConnector::new()).await;

    let handle = d
        .start(request("401111111\n402222222", "hello\nworld", no_retry(500)))
        .await
        .unwrap();
    let id = handle.session_id().to_string();
    let outcome = handle.join().await.unwrap();
    assert_eq!(outcome.sent, 4);

    let sends = record.sends();
    assert_eq!(
        sends,
        vec![
            ("401111111@s.whatsapp.net".to_string(), "hello".to_string()),
            ("401111111@s.whatsapp.net".to_string(), "world".to_string()),
            ("402222222@s.whatsapp.net".to_string(), "hello".to_string()),
            ("402222222@s.whatsapp.net".to_string(), "world".to_string()),
        ]
    );

    let session = d.store().get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.target_phones, "401111111\n402222222");
    assert_eq!(session.message_delay, 500);
    assert!(!d.is_dispatching().await);
}

#[tokio::test]
async fn test_blank_targets_send_to_own_phone() {
    let (d, record) = dispatcher(MockConnector::new()).await;
    let handle = d.start(request("  \n", "ping", no_retry(0))).await.unwrap();
    handle.join().await.unwrap();
    assert_eq!(
        record.sends(),
        vec![("401111111@s.whatsapp.net".to_string(), "ping".to_string())]
    );
}

#[tokio::test]
async fn test_validation_happens_before_connecting() {
    let (d, record) = dispatcher(MockConnector::new()).await;

    let mut missing_phone = request("", "hi", no_retry(0));
    missing_phone.user_phone = "  ".into();
    let err = d.start(missing_phone).await.err().unwrap();
    assert!(matches!(err, DispatchError::Validation(_)));

    let err = d.start(request("", "\n  \n", no_retry(0))).await.err().unwrap();
    assert!(matches!(err, DispatchError::Validation(_)));

    assert_eq!(record.connects.load(Ordering::SeqCst), 0);
    assert!(d.active_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_failure_resets_state() {
    let connector = MockConnector {
        fail_connect: true,
        ..MockConnector::new()
    };
    let (d, _record) = dispatcher(connector).await;

    let err = d.start(request("", "hi", no_retry(0))).await.err().unwrap();
    assert!(matches!(err, DispatchError::Transport(_)));
    assert_eq!(d.status().await, ConnectionState::Disconnected);
    assert!(d.store().recent_sessions(10).await.unwrap().is_empty());

    // The slot is free again.
    let err = d.start(request("", "hi", no_retry(0))).await.err().unwrap();
    assert!(matches!(err, DispatchError::Transport(_)));
}

#[tokio::test]
async fn test_exhausted_delivery_marks_session_failed() {
    let connector = MockConnector {
        failures: 1,
        ..MockConnector::new()
    };
    let (d, record) = dispatcher(connector).await;

    let handle = d
        .start(request("401111111\n402222222", "hi", no_retry(0)))
        .await
        .unwrap();
    let id = handle.session_id().to_string();
    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, DispatchError::Delivery { attempts: 1, .. }));
    assert_eq!(record.sends().len(), 1);

    let session = d.store().get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.error.unwrap().contains("401111111@s.whatsapp.net"));
}

#[tokio::test]
async fn test_retry_recovers_within_budget() {
    let connector = MockConnector {
        failures: 2,
        ..MockConnector::new()
    };
    let (d, record) = dispatcher(connector).await;

    let policy = DeliveryPolicy::new(0, true, 3).unwrap();
    let handle = d.start(request("", "hi", policy)).await.unwrap();
    let outcome = handle.join().await.unwrap();
    assert_eq!(outcome.sent, 1);
    assert_eq!(record.sends().len(), 3);
}

#[tokio::test]
async fn test_second_start_while_running_conflicts() {
    let gate = Arc::new(Semaphore::new(0));
    let (d, record) = dispatcher(MockConnector::gated(gate.clone())).await;

    let handle = d.start(request("", "one\ntwo", no_retry(0))).await.unwrap();
    assert!(d.is_dispatching().await);
    assert_eq!(d.status().await, ConnectionState::Connected);

    let err = d.start(request("", "again", no_retry(0))).await.err().unwrap();
    assert!(matches!(err, DispatchError::Conflict(_)));
    assert_eq!(record.connects.load(Ordering::SeqCst), 1);

    gate.add_permits(100);
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_stop_tears_down_and_keeps_stopped_status() {
    let gate = Arc::new(Semaphore::new(0));
    let (d, record) = dispatcher(MockConnector::gated(gate.clone())).await;

    let handle = d.start(request("", "one\ntwo", no_retry(0))).await.unwrap();
    let id = handle.session_id().to_string();

    let outcome = d.stop().await.unwrap();
    assert_eq!(
        outcome,
        StopOutcome {
            stopped_sessions: 1,
            disconnected: true
        }
    );
    assert_eq!(d.status().await, ConnectionState::Disconnected);

    // The in-flight loop fails on its next send.
    gate.add_permits(100);
    assert!(handle.join().await.is_err());
    assert!(record.sends().is_empty());

    let session = d.store().get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
    assert_eq!(record.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_without_dispatch_is_harmless() {
    let (d, _record) = dispatcher(MockConnector::new()).await;
    let outcome = d.stop().await.unwrap();
    assert_eq!(outcome.stopped_sessions, 0);
    assert!(!outcome.disconnected);
}

#[tokio::test]
async fn test_new_start_closes_finished_connection() {
    let (d, record) = dispatcher(MockConnector::new()).await;

    d.start(request("", "first", no_retry(0)))
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    d.start(request("", "second", no_retry(0)))
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    assert_eq!(record.connects.load(Ordering::SeqCst), 2);
    assert_eq!(record.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(d.store().recent_sessions(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_update_status_unknown_session() {
    let (d, _record) = dispatcher(MockConnector::new()).await;
    assert!(d
        .update_status("missing", SessionStatus::Stopped)
        .await
        .unwrap()
        .is_none());
}

/// Start a dispatch in the background and wait until it is inside `connect`.
async fn start_held_in_connect(
    d: &Arc<Dispatcher>,
    record: &crate::testutil::Record,
) -> tokio::task::JoinHandle<Result<String, DispatchError>> {
    let pending = tokio::spawn({
        let d = d.clone();
        async move {
            d.start(request("", "hi", no_retry(0)))
                .await
                .map(|h| h.session_id().to_string())
        }
    });
    while record.connects.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    pending
}

fn connect_gated(gate: Arc<Semaphore>) -> MockConnector {
    MockConnector {
        connect_gate: Some(gate),
        ..MockConnector::new()
    }
}

#[tokio::test]
async fn test_stop_while_connecting_cancels_pending_start() {
    let connect_gate = Arc::new(Semaphore::new(0));
    let (d, record) = dispatcher(connect_gated(connect_gate.clone())).await;
    let d = Arc::new(d);

    let pending = start_held_in_connect(&d, &record).await;
    assert_eq!(d.status().await, ConnectionState::Connecting);

    let outcome = d.stop().await.unwrap();
    assert_eq!(
        outcome,
        StopOutcome {
            stopped_sessions: 0,
            disconnected: false
        }
    );
    assert_eq!(d.status().await, ConnectionState::Disconnected);

    connect_gate.add_permits(1);
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)));

    let sessions = d.store().recent_sessions(10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Stopped);
    assert_eq!(record.disconnects.load(Ordering::SeqCst), 1);
    assert!(record.sends().is_empty());

    // The slot is free once the cancelled start has backed out.
    connect_gate.add_permits(1);
    d.start(request("", "after", no_retry(0)))
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(record.sends().len(), 1);
}

#[tokio::test]
async fn test_start_during_cancelled_connect_conflicts() {
    let connect_gate = Arc::new(Semaphore::new(0));
    let (d, record) = dispatcher(connect_gated(connect_gate.clone())).await;
    let d = Arc::new(d);

    let pending = start_held_in_connect(&d, &record).await;
    d.stop().await.unwrap();

    let err = d.start(request("", "second", no_retry(0))).await.err().unwrap();
    assert!(matches!(err, DispatchError::Conflict(_)));
    assert_eq!(record.connects.load(Ordering::SeqCst), 1);

    connect_gate.add_permits(1);
    assert!(pending.await.unwrap().is_err());

    assert!(d.active_sessions().await.unwrap().is_empty());
    assert!(!d.is_dispatching().await);
    assert_eq!(d.status().await, ConnectionState::Disconnected);
    assert_eq!(record.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_survives_disconnect_failure() {
    let gate = Arc::new(Semaphore::new(0));
    let connector = MockConnector {
        fail_disconnect: true,
        ..MockConnector::gated(gate.clone())
    };
    let (d, record) = dispatcher(connector).await;

    let handle = d.start(request("", "one\ntwo", no_retry(0))).await.unwrap();
    let id = handle.session_id().to_string();

    let outcome = d.stop().await.unwrap();
    assert_eq!(
        outcome,
        StopOutcome {
            stopped_sessions: 1,
            disconnected: false
        }
    );
    assert_eq!(d.status().await, ConnectionState::Disconnected);

    gate.add_permits(100);
    assert!(handle.join().await.is_err());
    let session = d.store().get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);

    // The slot was released despite the error.
    d.start(request("", "again", no_retry(0)))
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(
        record.sends(),
        vec![("401111111@s.whatsapp.net".to_string(), "again".to_string())]
    );
}
