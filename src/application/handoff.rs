use crate::domain::models::{CompletionEvent, DailyLogEntry};
use crate::infrastructure::config::HandoffSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::log_store::{is_transient, LogStore};
use crate::infrastructure::session_store::SessionStateStore;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl From<&HandoffSettings> for RetryPolicy {
    fn from(settings: &HandoffSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay_ms: settings.base_delay_ms,
        }
    }
}

/// Writes a `done` entry for a completed session, then drops the local
/// record. On failure the local `completed` record stays so the same event
/// can be resent.
pub struct CompletionHandoff<S>
where
    S: SessionStateStore,
{
    log_store: Arc<dyn LogStore>,
    session_store: Arc<S>,
    retry_policy: RetryPolicy,
}

impl<S> CompletionHandoff<S>
where
    S: SessionStateStore,
{
    pub fn new(log_store: Arc<dyn LogStore>, session_store: Arc<S>) -> Self {
        Self {
            log_store,
            session_store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn hand_off(
        &self,
        owner_id: &str,
        event: &CompletionEvent,
    ) -> Result<DailyLogEntry, InfraError> {
        let entry = DailyLogEntry::done(owner_id, event);
        if let Err(error) = self.upsert_with_retry(&entry).await {
            warn!(plan_id = %event.plan_id, %error, "hand-off failed, completed state kept");
            return Err(error);
        }

        if let Err(error) = self.session_store.clear(&event.plan_id) {
            warn!(plan_id = %event.plan_id, %error, "failed to clear handed-off session");
        }
        info!(
            plan_id = %event.plan_id,
            date = %event.date,
            status = entry.status.as_str(),
            "session handed off"
        );
        Ok(entry)
    }

    async fn upsert_with_retry(&self, entry: &DailyLogEntry) -> Result<(), InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.log_store.upsert_log(entry).await {
                Ok(()) => return Ok(()),
                Err(error) if is_transient(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    warn!(plan_id = %entry.plan_id, attempt, delay_ms = delay, %error, "retrying hand-off");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
