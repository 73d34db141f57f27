//! 会话：一个用户对话对应一份独立的 ConversationState
//!
//! 编排器经 Arc 共享；同一会话的回合串行（&mut self），不同会话可并发。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ContextSection;
use crate::core::{TurnOrchestrator, TurnOutcome};
use crate::memory::ConversationState;

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: ConversationState,
    orchestrator: Arc<TurnOrchestrator>,
    turns_handled: usize,
}

impl Session {
    pub fn new(orchestrator: Arc<TurnOrchestrator>, context: &ContextSection) -> Self {
        let state = ConversationState::new(
            context.max_turns.max(1),
            Duration::minutes(context.window_minutes.max(1)),
        );
        let id = Uuid::new_v4().to_string();
        tracing::info!(session = %id, "session opened");
        Self {
            id,
            created_at: Utc::now(),
            state,
            orchestrator,
            turns_handled: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn turns_handled(&self) -> usize {
        self.turns_handled
    }

    pub async fn handle(&mut self, utterance: &str) -> TurnOutcome {
        let span = tracing::info_span!("turn", session = %self.id, n = self.turns_handled);
        let outcome = self
            .orchestrator
            .process_turn(&mut self.state, utterance)
            .instrument(span)
            .await;
        self.turns_handled += 1;
        outcome
    }

    /// 清空对话与分页状态
    pub fn reset(&mut self) {
        self.state.reset();
        tracing::info!(session = %self.id, "session reset");
    }
}
