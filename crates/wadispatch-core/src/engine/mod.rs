//! Delivery engine: sequential, paced, retrying dispatch over targets × lines.
//!
//! Sends happen strictly in (target, then line) order through a single
//! connection. The first (target, line) pair that runs out of attempts aborts
//! the whole dispatch; nothing after it is sent.


use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::DispatchError;
use crate::policy::DeliveryPolicy;
use crate::segment::MessageLine;
use crate::target::Target;
use crate::traits::Connection;

/// Fixed pause between retry attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

/// Characters of message text included in per-attempt log lines.
const LOG_PREVIEW_CHARS: usize = 30;

/// Aggregate result of a dispatch that ran to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Messages delivered.
    pub sent: usize,
    /// Transport calls made, including failed attempts.
    pub attempts: usize,
}

/// Drives a dispatch through a [`Connection`].
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    retry_backoff: Duration,
}

impl Default for DeliveryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BACKOFF)
    }
}

impl DeliveryEngine {
    pub fn new(retry_backoff: Duration) -> Self {
        Self { retry_backoff }
    }

    /// Send every line to every target.
    ///
    /// Pacing: `policy.line_delay()` between consecutive lines of one target,
    /// `policy.target_delay()` between consecutive targets. Retries wait a
    /// fixed backoff regardless of the policy delay.
    pub async fn dispatch(
        &self,
        connection: &dyn Connection,
        targets: &[Target],
        lines: &[MessageLine],
        policy: &DeliveryPolicy,
    ) -> Result<DeliveryOutcome, DispatchError> {
        let mut outcome = DeliveryOutcome::default();

        for (target_idx, target) in targets.iter().enumerate() {
            if target_idx > 0 {
                tokio::time::sleep(policy.target_delay()).await;
            }
            info!("Sending messages to target: {}", target.address);

            for (line_idx, line) in lines.iter().enumerate() {
                if line_idx > 0 {
                    tokio::time::sleep(policy.line_delay()).await;
                }
                outcome.attempts += self.deliver(connection, target, line, policy).await?;
                outcome.sent += 1;
            }
        }

        info!(
            "dispatch complete: {} message(s) to {} target(s), {} attempt(s)",
            outcome.sent,
            targets.len(),
            outcome.attempts
        );
        Ok(outcome)
    }

    /// Deliver one line to one target, retrying per policy.
    /// Returns the number of attempts used.
    async fn deliver(
        &self,
        connection: &dyn Connection,
        target: &Target,
        line: &MessageLine,
        policy: &DeliveryPolicy,
    ) -> Result<usize, DispatchError> {
        let max_attempts = policy.max_attempts();
        let mut attempts: u32 = 0;

        loop {
            match connection.send(&target.address, &line.text).await {
                Ok(()) => {
                    info!(
                        "Message sent to {}: {}...",
                        target.address,
                        preview(&line.text)
                    );
                    return Ok(attempts as usize + 1);
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= max_attempts {
                        error!(
                            "send to {} failed (attempt {attempts}/{max_attempts}): {e}, giving up",
                            target.address
                        );
                        return Err(DispatchError::Delivery {
                            target: target.address.clone(),
                            line: line.text.clone(),
                            attempts,
                            reason: e.to_string(),
                        });
                    }
                    warn!(
                        "send to {} failed (attempt {attempts}/{max_attempts}): {e}, retrying in {}ms",
                        target.address,
                        self.retry_backoff.as_millis()
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }
}

/// Leading characters of `text` for log lines.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
