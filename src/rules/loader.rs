//! 从 TOML 文件加载额外的固定回复规则
//!
//! ```toml
//! [[rule]]
//! name = "weather_smalltalk"
//! patterns = ["いい天気"]
//! priority = 9
//! responses = ["本当にいい天気ですね"]
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::core::AgentError;

use super::router::{Rule, RuleRouter};

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    name: String,
    patterns: Vec<String>,
    #[serde(default)]
    priority: i32,
    responses: Vec<String>,
}

/// 解析规则文本；任一条目非法则整体失败
pub fn rules_from_toml_str(content: &str) -> Result<Vec<Rule>, AgentError> {
    let file: RuleFile =
        toml::from_str(content).map_err(|e| AgentError::ConfigError(format!("rule file: {e}")))?;
    file.rule
        .into_iter()
        .map(|entry| {
            let patterns: Vec<&str> = entry.patterns.iter().map(String::as_str).collect();
            let responses: Vec<&str> = entry.responses.iter().map(String::as_str).collect();
            Rule::canned(entry.name.as_str(), &patterns, entry.priority, &responses)
        })
        .collect()
}

impl RuleRouter {
    /// 加载规则文件并逐条 add_rule，返回加载条数
    pub fn load_rules_toml(&mut self, path: impl AsRef<Path>) -> Result<usize, AgentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::ConfigError(format!("{}: {e}", path.display())))?;
        let rules = rules_from_toml_str(&content)?;
        let count = rules.len();
        for rule in rules {
            self.add_rule(rule);
        }
        tracing::info!(path = %path.display(), count, "extra rules loaded");
        Ok(count)
    }
}
