//! 规则路由：在调用任何生成式后端之前做确定性的模式匹配
//!
//! 归一化（trim + 小写）后测试每条规则的每个 pattern，保留优先级最高的命中规则；
//! 同优先级保留列表中靠前的那条。路由不修改会话状态。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::actions::ActionRequest;
use crate::core::AgentError;
use crate::memory::ConversationState;

use super::builtin::{default_rules, personalize};

/// 根据发言与会话状态构造固定的少量动作
pub type ActionBuilder = Arc<dyn Fn(&str, &ConversationState) -> Vec<ActionRequest> + Send + Sync>;
/// 本地计算最终回复（时间、日期、简单算式）
pub type DynamicResponder = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub enum RuleResponse {
    /// 固定回复，随机选一条
    Canned(Vec<String>),
    Dynamic(DynamicResponder),
    Actions(ActionBuilder),
}

impl fmt::Debug for RuleResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleResponse::Canned(v) => f.debug_tuple("Canned").field(v).finish(),
            RuleResponse::Dynamic(_) => f.write_str("Dynamic(..)"),
            RuleResponse::Actions(_) => f.write_str("Actions(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub patterns: Vec<Regex>,
    pub priority: i32,
    pub response: RuleResponse,
}

impl Rule {
    /// pattern 忽略大小写编译；非法正则返回 InvalidRule
    pub fn new(
        name: impl Into<String>,
        patterns: &[&str],
        priority: i32,
        response: RuleResponse,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        if let RuleResponse::Canned(variants) = &response {
            if variants.is_empty() {
                return Err(AgentError::InvalidRule {
                    name,
                    reason: "canned rule without responses".to_string(),
                });
            }
        }
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AgentError::InvalidRule {
                        name: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(AgentError::InvalidRule {
                name,
                reason: "no patterns".to_string(),
            });
        }
        Ok(Self {
            name,
            patterns,
            priority,
            response,
        })
    }

    pub fn canned(
        name: impl Into<String>,
        patterns: &[&str],
        priority: i32,
        responses: &[&str],
    ) -> Result<Self, AgentError> {
        let variants = responses.iter().map(|s| s.to_string()).collect();
        Self::new(name, patterns, priority, RuleResponse::Canned(variants))
    }

    pub fn matches(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(normalized))
    }
}

/// 路由结果：直接回复，或交给工具执行的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Reply {
        rule: String,
        priority: i32,
        text: String,
    },
    Actions {
        rule: String,
        priority: i32,
        actions: Vec<ActionRequest>,
    },
}

impl RuleOutcome {
    pub fn rule_name(&self) -> &str {
        match self {
            RuleOutcome::Reply { rule, .. } | RuleOutcome::Actions { rule, .. } => rule,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            RuleOutcome::Reply { priority, .. } | RuleOutcome::Actions { priority, .. } => *priority,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleStats {
    pub total_rules: usize,
    pub rule_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleRouter {
    rules: Vec<Rule>,
}

impl RuleRouter {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// 内置规则集
    pub fn with_defaults() -> Result<Self, AgentError> {
        Ok(Self::new(default_rules()?))
    }

    /// 追加后按优先级降序稳定排序
    pub fn add_rule(&mut self, rule: Rule) {
        tracing::info!(rule = %rule.name, priority = rule.priority, "rule added");
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn stats(&self) -> RuleStats {
        RuleStats {
            total_rules: self.rules.len(),
            rule_names: self.rules.iter().map(|r| r.name.clone()).collect(),
        }
    }

    /// 最高优先级的命中规则；同优先级取列表中靠前者
    pub fn best_match(&self, utterance: &str) -> Option<&Rule> {
        let normalized = utterance.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if best.map_or(true, |b| rule.priority > b.priority) && rule.matches(&normalized) {
                best = Some(rule);
            }
        }
        best
    }

    pub fn route(
        &self,
        utterance: &str,
        state: &ConversationState,
        profile: &BTreeMap<String, String>,
    ) -> Option<RuleOutcome> {
        let rule = self.best_match(utterance)?;
        let normalized = utterance.trim().to_lowercase();
        tracing::info!(rule = %rule.name, priority = rule.priority, "rule matched");

        let outcome = match &rule.response {
            RuleResponse::Canned(variants) => {
                let chosen = variants.choose(&mut rand::thread_rng())?;
                RuleOutcome::Reply {
                    rule: rule.name.clone(),
                    priority: rule.priority,
                    text: personalize(&rule.name, chosen, profile),
                }
            }
            RuleResponse::Dynamic(responder) => RuleOutcome::Reply {
                rule: rule.name.clone(),
                priority: rule.priority,
                text: responder(&normalized),
            },
            RuleResponse::Actions(builder) => RuleOutcome::Actions {
                rule: rule.name.clone(),
                priority: rule.priority,
                actions: builder(&normalized, state),
            },
        };
        Some(outcome)
    }
}
