//! Scripted LLM client used by unit and contract tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::LlmClient;
use crate::LlmError;
use crate::LlmReply;
use crate::LlmRequest;

/// Replays a fixed sequence of replies and records every request it saw.
/// Scripts running dry is a transport error, which makes an over-long test
/// conversation fail loudly instead of hanging the loop.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    #[must_use]
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self::with_errors(replies.into_iter().map(Ok).collect())
    }

    #[must_use]
    pub fn with_errors(script: Vec<Result<LlmReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request the loop has issued so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: LlmRequest) -> Result<LlmReply, LlmError> {
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request);
        }
        self.script
            .lock()
            .map_err(|_| LlmError::Transport("script mutex poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".into())))
    }
}
