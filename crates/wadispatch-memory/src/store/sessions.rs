//! Session record CRUD and status transitions.

use super::Store;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use wadispatch_core::error::DispatchError;
use wadispatch_core::policy::DeliveryPolicy;
use wadispatch_core::target::TargetKind;

/// Lifecycle status of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "stopped" => Ok(Self::Stopped),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DispatchError::Storage(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// Fields supplied when a dispatch starts.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_phone: String,
    pub target_type: TargetKind,
    pub target_phones: String,
    pub policy: DeliveryPolicy,
}

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_phone: String,
    pub target_type: TargetKind,
    pub target_phones: String,
    pub message_delay: u64,
    pub enable_retry: bool,
    pub max_retries: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

type SessionRow = (
    String,
    String,
    String,
    String,
    i64,
    bool,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
);

const SESSION_COLUMNS: &str = "id, user_phone, target_type, target_phones, message_delay, \
     enable_retry, max_retries, status, created_at, finished_at, error";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, DispatchError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DispatchError::Storage(format!("bad timestamp '{value}': {e}")))
}

impl TryFrom<SessionRow> for Session {
    type Error = DispatchError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let (
            id,
            user_phone,
            target_type,
            target_phones,
            message_delay,
            enable_retry,
            max_retries,
            status,
            created_at,
            finished_at,
            error,
        ) = row;

        Ok(Self {
            id,
            user_phone,
            target_type: target_type
                .parse()
                .map_err(|e| DispatchError::Storage(format!("bad target_type: {e}")))?,
            target_phones,
            message_delay: message_delay.max(0) as u64,
            enable_retry,
            max_retries: max_retries.max(0) as u32,
            status: status.parse()?,
            created_at: parse_time(&created_at)?,
            finished_at: finished_at.as_deref().map(parse_time).transpose()?,
            error,
        })
    }
}

impl Store {
    /// Persist a new session with status `active`.
    pub async fn create_session(&self, new: &NewSession) -> Result<Session, DispatchError> {
        let id = Uuid::new_v4().to_string();
        let created_at = now();

        sqlx::query(
            "INSERT INTO sessions \
             (id, user_phone, target_type, target_phones, message_delay, enable_retry, \
              max_retries, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?)",
        )
        .bind(&id)
        .bind(&new.user_phone)
        .bind(new.target_type.as_str())
        .bind(&new.target_phones)
        .bind(new.policy.delay_ms as i64)
        .bind(new.policy.retry_enabled)
        .bind(new.policy.max_retries as i64)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DispatchError::Storage(format!("create session failed: {e}")))?;

        self.get_session(&id)
            .await?
            .ok_or_else(|| DispatchError::Storage(format!("session {id} vanished after insert")))
    }

    /// Fetch one session by id.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, DispatchError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DispatchError::Storage(format!("get session failed: {e}")))?;

        row.map(Session::try_from).transpose()
    }

    /// All sessions currently `active`, oldest first.
    pub async fn active_sessions(&self) -> Result<Vec<Session>, DispatchError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'active' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DispatchError::Storage(format!("list active sessions failed: {e}")))?;

        rows.into_iter().map(Session::try_from).collect()
    }

    /// Most recent sessions of any status, newest first.
    pub async fn recent_sessions(&self, limit: i64) -> Result<Vec<Session>, DispatchError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DispatchError::Storage(format!("list sessions failed: {e}")))?;

        rows.into_iter().map(Session::try_from).collect()
    }

    /// Set a session's status unconditionally. Returns the updated record,
    /// or `None` if no session has that id.
    pub async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<Option<Session>, DispatchError> {
        let finished_at = (status != SessionStatus::Active).then(now);

        let result = sqlx::query("UPDATE sessions SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&finished_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DispatchError::Storage(format!("update session failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_session(id).await
    }

    /// Move every `active` session to `stopped`. Returns how many changed.
    pub async fn stop_active_sessions(&self) -> Result<u64, DispatchError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'stopped', finished_at = ? WHERE status = 'active'",
        )
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| DispatchError::Storage(format!("stop sessions failed: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Record a dispatch outcome. Only an `active` session moves; a session
    /// already stopped by the operator keeps its status. Returns whether the
    /// row changed.
    pub async fn finish_session(
        &self,
        id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<bool, DispatchError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, finished_at = ?, error = ? \
             WHERE id = ? AND status = 'active'",
        )
        .bind(status.as_str())
        .bind(now())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DispatchError::Storage(format!("finish session failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
