//! 动作层：ActionRequest / ActionResult、去重、从后端输出中提取动作、占位符解析

pub mod extractor;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use extractor::{ActionExtractor, TOOL_CALL_MARKER};
pub use resolver::EntityResolver;

/// 工具返回元数据中：本次确认的实体 ID
pub const META_CANONICAL_ENTITY_ID: &str = "canonical_entity_id";
/// 工具返回元数据中：本次列表展示的 ID（按展示顺序）
pub const META_LISTED_IDS: &str = "listed_ids";

/// 结构化动作请求 {name, parameters}；相等性按内容比较，用于去重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// 子动作名（parameters.action），没有时用工具名
    pub fn action_label(&self) -> &str {
        self.param_str("action").unwrap_or(&self.name)
    }
}

/// 单次动作执行结果；仅在本轮内有效
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub tool_name: String,
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
}

impl ActionResult {
    pub fn ok(tool_name: impl Into<String>, payload: Value, metadata: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            payload,
            error: None,
            metadata,
        }
    }

    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            payload: Value::Null,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    /// 工具确认的实体 ID（metadata.canonical_entity_id）
    pub fn canonical_entity_id(&self) -> Option<&str> {
        self.metadata
            .get(META_CANONICAL_ENTITY_ID)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// 列表类工具展示的 ID（metadata.listed_ids）
    pub fn listed_ids(&self) -> Option<Vec<String>> {
        let ids = self.metadata.get(META_LISTED_IDS)?.as_array()?;
        Some(
            ids.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        )
    }

    /// 供合成阶段使用的一行摘要：失败给出错误，payload 含 message 字段时优先使用
    pub fn summary_line(&self) -> String {
        if !self.success {
            return format!(
                "{}: エラー: {}",
                self.tool_name,
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        match &self.payload {
            Value::String(s) => format!("{}: {}", self.tool_name, s),
            Value::Object(obj) => match obj.get("message").and_then(|m| m.as_str()) {
                Some(msg) => format!("{}: {}", self.tool_name, msg),
                None => format!(
                    "{}: {}",
                    self.tool_name,
                    serde_json::to_string_pretty(&self.payload).unwrap_or_default()
                ),
            },
            other => format!("{}: {}", self.tool_name, other),
        }
    }
}

/// 按结构相等去重，保留首次出现的顺序
pub fn dedup_actions(actions: Vec<ActionRequest>) -> Vec<ActionRequest> {
    let mut unique: Vec<ActionRequest> = Vec::with_capacity(actions.len());
    for action in actions {
        if unique.contains(&action) {
            tracing::debug!(tool = %action.name, "skipped duplicate action");
            continue;
        }
        unique.push(action);
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dedup_rule_and_extracted_actions() {
        // 规则构造的动作与文本提取的动作结构相同
        let from_rule = ActionRequest::new("mailbox")
            .with_param("action", "list")
            .with_param("max_results", 5);
        let extracted = ActionExtractor::new().extract(
            r#"確認します TOOL_CALL: {"name":"mailbox","parameters":{"max_results":5,"action":"list"}}"#,
        );
        assert_eq!(extracted.len(), 1);

        let mut all = vec![from_rule.clone()];
        all.extend(extracted);
        let unique = dedup_actions(all);
        assert_eq!(unique, vec![from_rule]);
    }

    #[test]
    fn test_dedup_preserves_order() {
        let a = ActionRequest::new("a");
        let b = ActionRequest::new("b");
        let unique = dedup_actions(vec![b.clone(), a.clone(), b.clone()]);
        assert_eq!(unique, vec![b, a]);
    }

    #[test]
    fn test_result_metadata_accessors() {
        let mut meta = Map::new();
        meta.insert(META_CANONICAL_ENTITY_ID.into(), json!("m42"));
        meta.insert(META_LISTED_IDS.into(), json!(["m42", "m41"]));
        let r = ActionResult::ok("mailbox", json!({"message": "2件"}), meta);
        assert_eq!(r.canonical_entity_id(), Some("m42"));
        assert_eq!(r.listed_ids().unwrap(), vec!["m42", "m41"]);
        assert_eq!(r.summary_line(), "mailbox: 2件");
    }

    #[test]
    fn test_failed_summary() {
        let r = ActionResult::failed("mailbox", "unknown message id");
        assert!(!r.success);
        assert!(r.canonical_entity_id().is_none());
        assert_eq!(r.summary_line(), "mailbox: エラー: unknown message id");
    }
}
