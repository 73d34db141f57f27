//! 回合编排器
//!
//! 一条用户发言 -> 规则路由 ->（规则回复）|（规则动作 -> 解析 -> 派发 -> 合成）|
//! （生成 -> 提取 -> 解析 -> 派发 -> 合成）-> 写回会话状态。
//! 编排器本身无可变状态，可经 Arc 在多个会话间共享；每个回合独占借用该会话的 ConversationState。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::actions::{dedup_actions, ActionRequest, ActionResult, EntityResolver};
use crate::core::error::{SYNTHESIS_FAILED_REPLY, UNAVAILABLE_REPLY};
use crate::core::state::{TurnOutcome, TurnPhase, TurnTrace};
use crate::core::AgentError;
use crate::llm::prompt::{MAX_MEMORIES, SYNTHESIS_HISTORY};
use crate::llm::{BackendFacade, PolicyMode, PromptContext};
use crate::memory::{ConversationState, FactStore, NoopFactStore, Turn};
use crate::rules::{RuleOutcome, RuleRouter};
use crate::tools::ToolExecutor;

/// 生成阶段带入的历史条数
pub const GENERATION_HISTORY: usize = 10;

pub struct TurnOrchestrator {
    router: RuleRouter,
    facade: BackendFacade,
    executor: ToolExecutor,
    resolver: EntityResolver,
    facts: Arc<dyn FactStore>,
    mode: PolicyMode,
}

impl TurnOrchestrator {
    pub fn new(router: RuleRouter, facade: BackendFacade, executor: ToolExecutor) -> Self {
        Self {
            router,
            facade,
            executor,
            resolver: EntityResolver::new(),
            facts: Arc::new(NoopFactStore),
            mode: PolicyMode::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_fact_store(mut self, facts: Arc<dyn FactStore>) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_mode(mut self, mode: PolicyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn facade(&self) -> &BackendFacade {
        &self.facade
    }

    pub fn router(&self) -> &RuleRouter {
        &self.router
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 处理一个回合；任何单个后端或工具的失败都不会中断回合，总会写入一条 user 与一条 assistant 记录
    pub async fn process_turn(&self, state: &mut ConversationState, utterance: &str) -> TurnOutcome {
        let mut trace = TurnTrace::new();
        let profile = self.facts.profile();
        tracing::info!(utterance = %utterance, "turn started");

        match self.router.route(utterance, state, &profile) {
            Some(RuleOutcome::Reply { rule, text, .. }) => {
                trace.advance(TurnPhase::RuleShortcut);
                trace.advance(TurnPhase::Done);
                self.finish(state, utterance, text, Vec::new(), Vec::new(), trace, Some(rule))
            }
            Some(RuleOutcome::Actions { rule, actions, .. }) if !actions.is_empty() => {
                trace.advance(TurnPhase::RuleAction);
                self.act(state, utterance, actions, trace, Some(rule)).await
            }
            _ => self.generate(state, utterance, profile, trace).await,
        }
    }

    async fn generate(
        &self,
        state: &mut ConversationState,
        utterance: &str,
        profile: BTreeMap<String, String>,
        mut trace: TurnTrace,
    ) -> TurnOutcome {
        trace.advance(TurnPhase::Generate);
        let ctx = PromptContext {
            mode: self.mode,
            tools: self.executor.describe(),
            profile,
            memories: self.facts.search(utterance, MAX_MEMORIES),
            listing: state.listing().clone(),
            latest_entity_id: state.last_referenced_entity_id().map(String::from),
        };
        let history = owned_dialogue(state, GENERATION_HISTORY);

        let reasoning = match self.facade.reason_with_tools(utterance, &history, &ctx).await {
            Ok(r) => r,
            Err(e) => return self.fail(state, utterance, e, trace),
        };

        trace.advance(TurnPhase::Extract);
        tracing::info!(
            provider = %reasoning.provider,
            actions = reasoning.actions.len(),
            "actions extracted"
        );
        if reasoning.actions.is_empty() {
            trace.advance(TurnPhase::Done);
            let text = self.facade.extractor().strip_calls(&reasoning.text);
            let reply = if text.trim().is_empty() {
                UNAVAILABLE_REPLY.to_string()
            } else {
                text
            };
            return self.finish(state, utterance, reply, Vec::new(), Vec::new(), trace, None);
        }

        self.act(state, utterance, reasoning.actions, trace, None)
            .await
    }

    /// 解析 -> 顺序派发 -> 合成
    async fn act(
        &self,
        state: &mut ConversationState,
        utterance: &str,
        actions: Vec<ActionRequest>,
        mut trace: TurnTrace,
        rule: Option<String>,
    ) -> TurnOutcome {
        trace.advance(TurnPhase::Resolve);
        // 占位符留到派发前再解析：前面的动作可能刚确认了新的实体 ID
        let planned = dedup_actions(actions);

        trace.advance(TurnPhase::Dispatch);
        let mut taken: Vec<ActionRequest> = Vec::with_capacity(planned.len());
        let mut results: Vec<ActionResult> = Vec::with_capacity(planned.len());
        for action in planned {
            let action = {
                let current: &ConversationState = state;
                self.resolver.resolve_one(action, current, current.turns())
            };
            if taken.contains(&action) {
                tracing::debug!(tool = %action.name, "skipped duplicate after resolution");
                continue;
            }
            let result = self.executor.dispatch(&action).await;
            if result.success {
                promote(state, &action, &result);
            } else {
                tracing::warn!(
                    tool = %result.tool_name,
                    error = result.error.as_deref().unwrap_or(""),
                    "action failed"
                );
            }
            taken.push(action);
            results.push(result);
        }

        trace.advance(TurnPhase::Synthesize);
        let history = owned_dialogue(state, SYNTHESIS_HISTORY);
        match self.facade.synthesize(utterance, &results, &history).await {
            Ok(text) if !text.trim().is_empty() => {
                trace.advance(TurnPhase::Done);
                self.finish(state, utterance, text, taken, results, trace, rule)
            }
            Ok(_) => {
                tracing::warn!("synthesis returned empty text");
                trace.advance(TurnPhase::Error);
                let reply = SYNTHESIS_FAILED_REPLY.to_string();
                self.finish(state, utterance, reply, taken, results, trace, rule)
            }
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed");
                trace.advance(TurnPhase::Error);
                // 工具已执行过，不用「暂不可用」文案
                let reply = SYNTHESIS_FAILED_REPLY.to_string();
                self.finish(state, utterance, reply, taken, results, trace, rule)
            }
        }
    }

    fn fail(
        &self,
        state: &mut ConversationState,
        utterance: &str,
        error: AgentError,
        mut trace: TurnTrace,
    ) -> TurnOutcome {
        tracing::warn!(error = %error, phase = ?trace.current(), "turn degraded");
        trace.advance(TurnPhase::Error);
        let reply = error.user_message().to_string();
        self.finish(state, utterance, reply, Vec::new(), Vec::new(), trace, None)
    }

    /// 所有终止路径的出口：写入一条 user 与一条 assistant 记录
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        state: &mut ConversationState,
        utterance: &str,
        reply: String,
        actions_taken: Vec<ActionRequest>,
        results: Vec<ActionResult>,
        trace: TurnTrace,
        rule: Option<String>,
    ) -> TurnOutcome {
        let mut metadata = Map::new();
        if let Some(r) = &rule {
            metadata.insert("rule".into(), Value::String(r.clone()));
        }
        if !actions_taken.is_empty() {
            let names: Vec<Value> = actions_taken
                .iter()
                .map(|a| Value::String(a.action_label().to_string()))
                .collect();
            metadata.insert("actions".into(), Value::Array(names));
        }

        state.append_user(utterance);
        state.append_assistant_with_metadata(reply.clone(), metadata);

        let phases = trace.into_phases();
        let ok = phases.last() == Some(&TurnPhase::Done);
        if ok {
            self.facts.record_interaction(utterance, &reply);
        }
        tracing::info!(
            ok,
            rule = rule.as_deref().unwrap_or("-"),
            actions = actions_taken.len(),
            "turn finished"
        );

        TurnOutcome {
            reply,
            actions_taken,
            results,
            phases,
            rule,
        }
    }
}

/// 把工具确认的事实写回会话：实体 ID 与列表分页
fn promote(state: &mut ConversationState, action: &ActionRequest, result: &ActionResult) {
    if let Some(id) = result.canonical_entity_id() {
        state.set_canonical_entity(id);
    }
    if let Some(ids) = result.listed_ids() {
        let fresh = state.update_listing_state(action.action_label(), &ids);
        tracing::debug!(fresh, offset = state.listing().cursor_offset, "listing updated");
    }
}

fn owned_dialogue(state: &ConversationState, n: usize) -> Vec<Turn> {
    state.recent_dialogue(n).into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FacadeOptions, MockProvider};
    use crate::memory::Role;
    use crate::tools::{MailMessage, MailboxTool, ToolRegistry};
    use chrono::Duration;

    fn state() -> ConversationState {
        ConversationState::new(50, Duration::hours(1))
    }

    fn orchestrator(provider: MockProvider) -> (TurnOrchestrator, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let facade = BackendFacade::new(FacadeOptions {
            primary: Some(provider_name(&provider)),
            request_timeout: std::time::Duration::from_millis(500),
            ..Default::default()
        })
        .with_provider(provider.clone());
        let mut registry = ToolRegistry::new();
        registry.register(MailboxTool::with_messages(vec![
            MailMessage::new("m1", "田中", "会議", "明日10時"),
        ]));
        let executor = ToolExecutor::new(registry, 5);
        let router = RuleRouter::with_defaults().unwrap();
        (TurnOrchestrator::new(router, facade, executor), provider)
    }

    fn provider_name(p: &MockProvider) -> String {
        use crate::llm::LlmProvider;
        p.name().to_string()
    }

    #[tokio::test]
    async fn test_rule_shortcut_records_one_pair() {
        let (orch, provider) = orchestrator(MockProvider::new("p"));
        let mut s = state();
        let out = orch.process_turn(&mut s, "おはよう").await;
        assert!(out.actions_taken.is_empty());
        assert_eq!(out.phases, vec![TurnPhase::Routing, TurnPhase::RuleShortcut, TurnPhase::Done]);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(s.len(), 2);
        assert_eq!(s.turns()[0].role, Role::User);
        assert_eq!(s.turns()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_rule_reply_flow_resolves_placeholder() {
        let (orch, provider) = orchestrator(MockProvider::new("p").reply("田中さんに返信しましたよ。"));
        let mut s = state();
        let out = orch.process_turn(&mut s, "了解ですって返信して").await;
        assert_eq!(out.rule.as_deref(), Some("mail_trigger"));
        assert_eq!(out.actions_taken.len(), 2);
        assert_eq!(out.actions_taken[1].param_str("message_id"), Some("m1"));
        assert!(out.results.iter().all(|r| r.success));
        assert_eq!(out.reply, "田中さんに返信しましたよ。");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(s.last_referenced_entity_id(), Some("m1"));
        assert_eq!(s.listing().shown_ids, vec!["m1"]);
    }

    #[tokio::test]
    async fn test_plain_reply_without_actions() {
        let (orch, _) = orchestrator(MockProvider::new("p").reply("空は青いですね。"));
        let mut s = state();
        let out = orch.process_turn(&mut s, "空って何色？").await;
        assert_eq!(out.reply, "空は青いですね。");
        assert_eq!(
            out.phases,
            vec![TurnPhase::Routing, TurnPhase::Generate, TurnPhase::Extract, TurnPhase::Done]
        );
    }

    #[tokio::test]
    async fn test_synthesis_failure_uses_generic_message() {
        let (orch, _) = orchestrator(MockProvider::new("p"));
        let mut s = state();
        // 规则动作成功执行，但合成时后端脚本已耗尽
        let out = orch.process_turn(&mut s, "メール見せて").await;
        assert_eq!(out.reply, SYNTHESIS_FAILED_REPLY);
        assert!(out.ended_in_error());
        assert_eq!(out.results.len(), 1);
        assert!(out.results[0].success);
        assert_eq!(s.len(), 2);
    }
}
