//! 实体解析：把动作参数里的占位引用替换为会话中最近确认的实体 ID

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::ActionRequest;
use crate::memory::{ConversationState, Turn};

/// 后端常见的占位写法；比较时去空白并忽略大小写
pub const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "メールID",
    "メッセージID",
    "最新メールID",
    "email_id",
    "message_id",
    "message_id_placeholder",
    "message id",
    "email id",
    "the email id",
    "the message id",
    "<実際のID>",
    "<id>",
    "<message_id>",
    "<email_id>",
];

/// 子动作 -> 需要隐式补全的目标参数
const DEFAULT_IMPLICIT_TARGETS: &[(&str, &str)] = &[("reply", "message_id")];

fn history_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ID:\s*([A-Za-z0-9_-]+)").expect("valid regex"))
}

#[derive(Debug, Clone)]
pub struct EntityResolver {
    placeholders: Vec<String>,
    implicit_targets: Vec<(String, String)>,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityResolver {
    pub fn new() -> Self {
        Self {
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|p| p.to_lowercase()).collect(),
            implicit_targets: DEFAULT_IMPLICIT_TARGETS
                .iter()
                .map(|(a, k)| (a.to_string(), k.to_string()))
                .collect(),
        }
    }

    /// 追加配置中的占位写法
    pub fn with_placeholders<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in extra {
            let p = p.as_ref().trim().to_lowercase();
            if !p.is_empty() && !self.placeholders.contains(&p) {
                self.placeholders.push(p);
            }
        }
        self
    }

    pub fn with_implicit_target(mut self, action: impl Into<String>, key: impl Into<String>) -> Self {
        self.implicit_targets.push((action.into(), key.into()));
        self
    }

    pub fn is_placeholder(&self, value: &str) -> bool {
        let v = value.trim().to_lowercase();
        self.placeholders.iter().any(|p| *p == v)
    }

    /// 解析一批动作；找不到可用 ID 时原样返回
    pub fn resolve(
        &self,
        actions: Vec<ActionRequest>,
        state: &ConversationState,
        history: &[Turn],
    ) -> Vec<ActionRequest> {
        actions
            .into_iter()
            .map(|a| self.resolve_one(a, state, history))
            .collect()
    }

    pub fn resolve_one(
        &self,
        mut action: ActionRequest,
        state: &ConversationState,
        history: &[Turn],
    ) -> ActionRequest {
        if !self.needs_resolution(&action) {
            return action;
        }

        let Some(entity_id) = self.known_entity(state, history) else {
            tracing::warn!(tool = %action.name, "placeholder left unresolved: no entity id known");
            return action;
        };

        for (key, value) in action.parameters.iter_mut() {
            let is_placeholder = value.as_str().map(|s| self.is_placeholder(s)).unwrap_or(false);
            if is_placeholder {
                tracing::info!(tool = %action.name, param = %key, entity_id = %entity_id, "placeholder resolved");
                *value = Value::String(entity_id.clone());
            }
        }

        if let Some(key) = self.implicit_key(&action).map(str::to_string) {
            if param_missing(&action, &key) {
                tracing::info!(tool = %action.name, param = %key, entity_id = %entity_id, "implicit target filled");
                action.parameters.insert(key, Value::String(entity_id));
            }
        }
        action
    }

    fn needs_resolution(&self, action: &ActionRequest) -> bool {
        let has_placeholder = action
            .parameters
            .values()
            .filter_map(|v| v.as_str())
            .any(|s| self.is_placeholder(s));
        let missing_target = self
            .implicit_key(action)
            .map(|k| param_missing(action, k))
            .unwrap_or(false);
        has_placeholder || missing_target
    }

    fn implicit_key(&self, action: &ActionRequest) -> Option<&str> {
        let label = action.param_str("action")?;
        self.implicit_targets
            .iter()
            .find(|(a, _)| a == label)
            .map(|(_, k)| k.as_str())
    }

    /// 优先使用工具确认的 ID；否则从最近的历史（新到旧）中找 `ID: xxx`
    fn known_entity(&self, state: &ConversationState, history: &[Turn]) -> Option<String> {
        if let Some(id) = state.last_referenced_entity_id() {
            return Some(id.to_string());
        }
        history.iter().rev().find_map(|turn| {
            history_id_re()
                .captures(&turn.content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|id| !self.is_placeholder(id))
        })
    }
}

fn param_missing(action: &ActionRequest, key: &str) -> bool {
    match action.parameters.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use chrono::Duration;

    fn state() -> ConversationState {
        ConversationState::new(50, Duration::hours(1))
    }

    fn reply_with(id: &str) -> ActionRequest {
        ActionRequest::new("mailbox")
            .with_param("action", "reply")
            .with_param("message_id", id)
            .with_param("body", "了解です")
    }

    #[test]
    fn test_placeholder_replaced_with_canonical_id() {
        let mut s = state();
        s.set_canonical_entity("abc123");
        let out = EntityResolver::new().resolve(vec![reply_with("メールID")], &s, s.turns());
        assert_eq!(out[0].param_str("message_id"), Some("abc123"));
        assert_eq!(out[0].param_str("body"), Some("了解です"));
    }

    #[test]
    fn test_placeholder_unchanged_when_unknown() {
        let s = state();
        let action = reply_with("メールID");
        let out = EntityResolver::new().resolve(vec![action.clone()], &s, s.turns());
        assert_eq!(out, vec![action]);
    }

    #[test]
    fn test_case_insensitive_and_trimmed() {
        let mut s = state();
        s.set_canonical_entity("m9");
        let out = EntityResolver::new().resolve(vec![reply_with("  The Message ID ")], &s, s.turns());
        assert_eq!(out[0].param_str("message_id"), Some("m9"));
    }

    #[test]
    fn test_real_id_is_untouched() {
        let mut s = state();
        s.set_canonical_entity("m9");
        let action = reply_with("m1");
        let out = EntityResolver::new().resolve(vec![action.clone()], &s, s.turns());
        assert_eq!(out, vec![action]);
    }

    #[test]
    fn test_implicit_target_filled_for_reply() {
        let mut s = state();
        s.set_canonical_entity("m7");
        let action = ActionRequest::new("mailbox")
            .with_param("action", "reply")
            .with_param("body", "ok");
        let out = EntityResolver::new().resolve(vec![action], &s, s.turns());
        assert_eq!(out[0].param_str("message_id"), Some("m7"));
    }

    #[test]
    fn test_history_scan_fallback() {
        let mut s = state();
        s.push(Turn::new(Role::Assistant, "件名: 会議\nID: old1"));
        s.push(Turn::new(Role::Assistant, "件名: 請求書\nID: new2"));
        let out = EntityResolver::new().resolve(vec![reply_with("メッセージID")], &s, s.turns());
        assert_eq!(out[0].param_str("message_id"), Some("new2"));
    }

    #[test]
    fn test_configured_placeholders() {
        let mut s = state();
        s.set_canonical_entity("z1");
        let resolver = EntityResolver::new().with_placeholders(["さっきのメール"]);
        assert!(resolver.is_placeholder("さっきのメール"));
        let out = resolver.resolve(vec![reply_with("さっきのメール")], &s, s.turns());
        assert_eq!(out[0].param_str("message_id"), Some("z1"));
    }
}
