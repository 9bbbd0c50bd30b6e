use super::*;
use wadispatch_core::policy::DeliveryPolicy;
use wadispatch_core::target::TargetKind;

fn new_session(phone: &str) -> NewSession {
    NewSession {
        user_phone: phone.to_string(),
        target_type: TargetKind::Individual,
        target_phones: "401111111\n402222222".to_string(),
        policy: DeliveryPolicy::new(500, true, 2).unwrap(),
    }
}

#[tokio::test]
async fn test_create_and_get_session() {
    let store = Store::in_memory().await.unwrap();
    let created = store.create_session(&new_session("401111111")).await.unwrap();

    assert_eq!(created.status, SessionStatus::Active);
    assert_eq!(created.user_phone, "401111111");
    assert_eq!(created.target_type, TargetKind::Individual);
    assert_eq!(created.message_delay, 500);
    assert!(created.enable_retry);
    assert_eq!(created.max_retries, 2);
    assert!(created.finished_at.is_none());

    let fetched = store.get_session(&created.id).await.unwrap().unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_get_missing_session() {
    let store = Store::in_memory().await.unwrap();
    assert!(store.get_session("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_status() {
    let store = Store::in_memory().await.unwrap();
    let s = store.create_session(&new_session("1")).await.unwrap();

    let updated = store
        .update_status(&s.id, SessionStatus::Completed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, SessionStatus::Completed);
    assert!(updated.finished_at.is_some());

    assert!(store
        .update_status("missing", SessionStatus::Failed)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stop_active_sessions_only_touches_active() {
    let store = Store::in_memory().await.unwrap();
    let a = store.create_session(&new_session("1")).await.unwrap();
    let b = store.create_session(&new_session("2")).await.unwrap();
    store
        .update_status(&b.id, SessionStatus::Completed)
        .await
        .unwrap();

    assert_eq!(store.active_sessions().await.unwrap().len(), 1);
    assert_eq!(store.stop_active_sessions().await.unwrap(), 1);
    assert!(store.active_sessions().await.unwrap().is_empty());

    let a = store.get_session(&a.id).await.unwrap().unwrap();
    let b = store.get_session(&b.id).await.unwrap().unwrap();
    assert_eq!(a.status, SessionStatus::Stopped);
    assert_eq!(b.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_finish_session_does_not_override_stop() {
    let store = Store::in_memory().await.unwrap();
    let s = store.create_session(&new_session("1")).await.unwrap();
    store.stop_active_sessions().await.unwrap();

    let changed = store
        .finish_session(&s.id, SessionStatus::Failed, Some("connection closed"))
        .await
        .unwrap();
    assert!(!changed);

    let s = store.get_session(&s.id).await.unwrap().unwrap();
    assert_eq!(s.status, SessionStatus::Stopped);
    assert!(s.error.is_none());
}

#[tokio::test]
async fn test_finish_session_records_error() {
    let store = Store::in_memory().await.unwrap();
    let s = store.create_session(&new_session("1")).await.unwrap();

    assert!(store
        .finish_session(&s.id, SessionStatus::Failed, Some("retries exhausted"))
        .await
        .unwrap());

    let s = store.get_session(&s.id).await.unwrap().unwrap();
    assert_eq!(s.status, SessionStatus::Failed);
    assert_eq!(s.error.as_deref(), Some("retries exhausted"));
}

#[tokio::test]
async fn test_recent_sessions_newest_first() {
    let store = Store::in_memory().await.unwrap();
    let first = store.create_session(&new_session("1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store.create_session(&new_session("2")).await.unwrap();

    let recent = store.recent_sessions(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, second.id);
    assert_eq!(recent[1].id, first.id);

    assert_eq!(store.recent_sessions(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let store = Store::in_memory().await.unwrap();
    Store::run_migrations(store.pool()).await.unwrap();
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn test_status_round_trip_strings() {
    for status in [
        SessionStatus::Active,
        SessionStatus::Stopped,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ] {
        assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
    }
    assert!("paused".parse::<SessionStatus>().is_err());
}
