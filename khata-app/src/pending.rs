//! Parking lot for write-tool proposals awaiting human confirmation.
//!
//! The agent loop never executes a write tool; its proposed action lands
//! here under a fresh UUID with a 15-minute TTL. A background sweeper culls
//! expired entries every 5 minutes; `take` also checks expiry so a stale
//! token can never dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub const PROPOSAL_TTL_MINUTES: i64 = 15;
const SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeError {
    NotFound,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PendingActionStore {
    actions: RwLock<HashMap<String, PendingAction>>,
}

impl PendingActionStore {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn park(&self, tool_name: String, tool_args: Value) -> PendingAction {
        let action = PendingAction {
            id: Uuid::new_v4().to_string(),
            tool_name,
            tool_args,
            expires_at: Utc::now() + Duration::minutes(PROPOSAL_TTL_MINUTES),
        };
        let mut guard = self.actions.write().await;
        guard.insert(action.id.clone(), action.clone());
        action
    }

    /// Removes and returns the action. Expired entries are consumed but
    /// reported as such: confirmation is single-shot either way.
    pub async fn take(&self, id: &str) -> Result<PendingAction, TakeError> {
        let mut guard = self.actions.write().await;
        let action = guard.remove(id).ok_or(TakeError::NotFound)?;
        if action.expires_at < Utc::now() {
            return Err(TakeError::Expired);
        }
        Ok(action)
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.actions.write().await;
        let before = guard.len();
        guard.retain(|_, action| action.expires_at >= now);
        before - guard.len()
    }

    /// Single supervisor task per store; stops with process-wide
    /// cancellation.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = store.sweep(Utc::now()).await;
                        if removed > 0 {
                            debug!(removed, "swept expired pending actions");
                        }
                    }
                }
            }
        })
    }
}
