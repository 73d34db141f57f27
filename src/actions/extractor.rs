//! 动作提取：从后端自由文本中恢复 `TOOL_CALL: {...}` 动作
//!
//! 生成式输出经常被截断、缺右括号或夹杂说明文字，因此每个候选片段按三级恢复：
//! 严格解析 -> 补全右括号 -> 逐字段抢救。三级都拿不到工具名的片段记录日志后丢弃，绝不 panic。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::{dedup_actions, ActionRequest};

/// 后端被要求在文本中使用的动作标记
pub const TOOL_CALL_MARKER: &str = "TOOL_CALL:";

/// 候选片段最终经由哪一级恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairTier {
    Strict,
    BraceCompleted,
    Salvaged,
}

/// 三级恢复解析器
#[derive(Debug, Clone)]
pub struct ActionExtractor {
    marker: String,
}

impl Default for ActionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionExtractor {
    pub fn new() -> Self {
        Self::with_marker(TOOL_CALL_MARKER)
    }

    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// 提取所有动作并按结构去重（保留首次出现顺序）
    pub fn extract(&self, raw: &str) -> Vec<ActionRequest> {
        let actions = self
            .extract_detailed(raw)
            .into_iter()
            .map(|(action, _)| action)
            .collect();
        dedup_actions(actions)
    }

    /// 提取动作并附带每个动作的恢复级别（未去重）
    pub fn extract_detailed(&self, raw: &str) -> Vec<(ActionRequest, RepairTier)> {
        let candidates = self.candidates(raw);
        if !candidates.is_empty() {
            tracing::debug!(count = candidates.len(), "tool call candidates found");
        }

        let mut out = Vec::new();
        for candidate in candidates {
            match recover(candidate) {
                Some((action, tier)) => {
                    if tier != RepairTier::Strict {
                        tracing::info!(tool = %action.name, ?tier, "tool call repaired");
                    }
                    out.push((action, tier));
                }
                None => {
                    tracing::warn!(fragment = %preview(candidate), "dropped unrecoverable tool call");
                }
            }
        }
        out
    }

    /// 去掉文本中的动作片段，得到可直接回复给用户的部分
    pub fn strip_calls(&self, raw: &str) -> String {
        let mut out = String::new();
        let mut rest = raw;
        while let Some(pos) = rest.find(&self.marker) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + self.marker.len()..];
            let body = after.trim_start();
            let skipped = after.len() - body.len();
            let consumed = if body.starts_with('{') {
                match balanced_end(body) {
                    Some(end) => skipped + end + 1,
                    // 未闭合：吞掉到行尾
                    None => skipped + body.find('\n').unwrap_or(body.len()),
                }
            } else {
                0
            };
            rest = &after[consumed..];
        }
        out.push_str(rest);
        out.lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 扫描所有标记，截取候选对象：先做带字符串感知的括号配对，配不上则贪婪取到下一个标记或结尾
    fn candidates<'a>(&self, raw: &'a str) -> Vec<&'a str> {
        let starts: Vec<usize> = raw.match_indices(&self.marker).map(|(i, _)| i).collect();
        let mut out = Vec::with_capacity(starts.len());
        for (k, &start) in starts.iter().enumerate() {
            let body_start = start + self.marker.len();
            let end = starts.get(k + 1).copied().unwrap_or(raw.len());
            let segment = raw[body_start..end].trim_start();
            if !segment.starts_with('{') {
                tracing::warn!(fragment = %preview(segment), "tool call marker without object");
                continue;
            }
            match balanced_end(segment) {
                Some(idx) => out.push(&segment[..=idx]),
                None => out.push(segment.trim_end()),
            }
        }
        out
    }
}

/// 单个候选的三级恢复
fn recover(candidate: &str) -> Option<(ActionRequest, RepairTier)> {
    // 1. 严格解析
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return to_action(&value).map(|a| (a, RepairTier::Strict));
    }

    // 2. 补全右括号
    let missing = unmatched_open_braces(candidate);
    if missing > 0 {
        let mut completed = candidate.to_string();
        completed.push_str(&"}".repeat(missing));
        if let Ok(value) = serde_json::from_str::<Value>(&completed) {
            if let Some(action) = to_action(&value) {
                return Some((action, RepairTier::BraceCompleted));
            }
        }
    }

    // 3. 逐字段抢救
    salvage(candidate).map(|a| (a, RepairTier::Salvaged))
}

/// 接受 {"name","parameters"} 与 {"tool","args"} 两种形状；工具名必须非空
fn to_action(value: &Value) -> Option<ActionRequest> {
    let obj = value.as_object()?;
    let name = obj
        .get("name")
        .or_else(|| obj.get("tool"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let parameters = obj
        .get("parameters")
        .or_else(|| obj.get("args"))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    Some(ActionRequest {
        name: name.to_string(),
        parameters,
    })
}

/// 返回与首个 `{` 配对的 `}` 的字节下标；忽略字符串内的括号
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 字符串外未闭合的 `{` 数量
fn unmatched_open_braces(s: &str) -> usize {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:name|tool)"\s*:\s*"([^"]+)""#).expect("valid regex"))
}

/// 自由文本类字段
fn text_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#""(action|body|query|message|text|subject|to|time|label|expression|location|title)"\s*:\s*"((?:[^"\\]|\\.)*)""#,
        )
        .expect("valid regex")
    })
}

/// ID 类字段：id、*_id、*Id（paid / valid 之类不算）
fn id_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(id|[A-Za-z0-9_]*_id|[A-Za-z0-9]*[a-z0-9]Id)"\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("valid regex")
    })
}

fn int_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([A-Za-z_]+)"\s*:\s*(-?\d+)\b"#).expect("valid regex"))
}

fn bool_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([A-Za-z_]+)"\s*:\s*(true|false)\b"#).expect("valid regex"))
}

/// 第三级：用固定的字段提取器直接扫描候选子串，至少拿到工具名才重建对象
fn salvage(candidate: &str) -> Option<ActionRequest> {
    let name = name_re()
        .captures(candidate)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())?;

    let mut params = Map::new();
    let reserved = |key: &str| matches!(key, "name" | "tool" | "parameters" | "args");

    for caps in text_field_re().captures_iter(candidate) {
        let key = &caps[1];
        params
            .entry(key.to_string())
            .or_insert_with(|| Value::String(unescape(&caps[2])));
    }
    for caps in id_field_re().captures_iter(candidate) {
        let key = &caps[1];
        if reserved(key) {
            continue;
        }
        params
            .entry(key.to_string())
            .or_insert_with(|| Value::String(unescape(&caps[2])));
    }
    for caps in int_field_re().captures_iter(candidate) {
        let key = &caps[1];
        if reserved(key) {
            continue;
        }
        if let Ok(n) = caps[2].parse::<i64>() {
            params.entry(key.to_string()).or_insert(Value::from(n));
        }
    }
    for caps in bool_field_re().captures_iter(candidate) {
        let key = &caps[1];
        if reserved(key) {
            continue;
        }
        params
            .entry(key.to_string())
            .or_insert(Value::Bool(&caps[2] == "true"));
    }

    Some(ActionRequest {
        name,
        parameters: params,
    })
}

/// 还原 JSON 字符串转义；失败时原样返回
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

fn preview(s: &str) -> String {
    if s.chars().count() > 120 {
        format!("{}...", s.chars().take(120).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor() -> ActionExtractor {
        ActionExtractor::new()
    }

    #[test]
    fn test_strict_single_call_with_prose() {
        let raw = "メールを確認しますね。\nTOOL_CALL: {\"name\":\"mailbox\",\"parameters\":{\"action\":\"list\",\"max_results\":5}}\n少々お待ちください。";
        let detailed = extractor().extract_detailed(raw);
        assert_eq!(detailed.len(), 1);
        assert_eq!(detailed[0].1, RepairTier::Strict);
        let action = &detailed[0].0;
        assert_eq!(action.name, "mailbox");
        assert_eq!(action.parameters.get("action"), Some(&json!("list")));
        assert_eq!(action.parameters.get("max_results"), Some(&json!(5)));
    }

    #[test]
    fn test_missing_final_brace_is_completed() {
        let raw = r#"TOOL_CALL: {"name":"mailbox","parameters":{"action":"list","max_results":1}"#;
        let detailed = extractor().extract_detailed(raw);
        assert_eq!(detailed.len(), 1);
        assert_eq!(detailed[0].1, RepairTier::BraceCompleted);
        assert_eq!(
            detailed[0].0,
            ActionRequest::new("mailbox")
                .with_param("action", "list")
                .with_param("max_results", 1)
        );
    }

    #[test]
    fn test_unparsable_json_is_salvaged() {
        // 缺逗号 + 单引号混用，JSON 无法解析，但字段都在
        let raw = r#"TOOL_CALL: {"name":"mailbox" "parameters":{'x':1, "action":"reply","message_id":"abc123","body":"了解です","urgent":true}}"#;
        let detailed = extractor().extract_detailed(raw);
        assert_eq!(detailed.len(), 1);
        assert_eq!(detailed[0].1, RepairTier::Salvaged);
        let action = &detailed[0].0;
        assert_eq!(action.name, "mailbox");
        assert_eq!(action.param_str("action"), Some("reply"));
        assert_eq!(action.param_str("message_id"), Some("abc123"));
        assert_eq!(action.param_str("body"), Some("了解です"));
        assert_eq!(action.parameters.get("urgent"), Some(&json!(true)));
    }

    #[test]
    fn test_salvage_keeps_only_id_shaped_keys() {
        let raw = r#"TOOL_CALL: {"name":"mailbox" "parameters":{"action":"read","messageId":"m7","thread_id":"t1","id":"x9","paid":"yes","valid":"no"}}"#;
        let detailed = extractor().extract_detailed(raw);
        assert_eq!(detailed[0].1, RepairTier::Salvaged);
        let action = &detailed[0].0;
        assert_eq!(action.param_str("messageId"), Some("m7"));
        assert_eq!(action.param_str("thread_id"), Some("t1"));
        assert_eq!(action.param_str("id"), Some("x9"));
        assert!(action.parameters.get("paid").is_none());
        assert!(action.parameters.get("valid").is_none());
    }

    #[test]
    fn test_truncated_call_followed_by_prose_is_salvaged() {
        let raw = "TOOL_CALL: {\"name\":\"alarm\",\"parameters\":{\"action\":\"set\",\"time\":\"07:00\",\"repeat\":false\nセットしますね";
        let actions = extractor().extract(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "alarm");
        assert_eq!(actions[0].param_str("time"), Some("07:00"));
        assert_eq!(actions[0].parameters.get("repeat"), Some(&json!(false)));
    }

    #[test]
    fn test_fragment_without_name_is_dropped() {
        let raw = r#"TOOL_CALL: {"parameters":{"action":"list"}} TOOL_CALL: oops TOOL_CALL: {"broken": "#;
        assert!(extractor().extract(raw).is_empty());
    }

    #[test]
    fn test_multiple_calls_dedup_in_order() {
        let raw = concat!(
            r#"TOOL_CALL: {"name":"clock","parameters":{}} "#,
            r#"TOOL_CALL: {"name":"mailbox","parameters":{"action":"list"}} "#,
            r#"TOOL_CALL: {"name":"clock","parameters":{}}"#
        );
        let names: Vec<String> = extractor().extract(raw).into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["clock", "mailbox"]);
    }

    #[test]
    fn test_tool_args_shape_and_braces_in_strings() {
        let raw = r#"TOOL_CALL: {"tool":"echo","args":{"text":"a } b { c"}} done"#;
        let actions = extractor().extract(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "echo");
        assert_eq!(actions[0].param_str("text"), Some("a } b { c"));
    }

    #[test]
    fn test_no_marker_yields_nothing() {
        assert!(extractor().extract("おはようございます！").is_empty());
        assert!(extractor().extract("").is_empty());
    }

    #[test]
    fn test_strip_calls() {
        let raw = "確認します。\nTOOL_CALL: {\"name\":\"mailbox\",\"parameters\":{}}\nお待ちください。";
        assert_eq!(extractor().strip_calls(raw), "確認します。\nお待ちください。");
    }

    #[test]
    fn test_balanced_end_handles_escapes() {
        let s = r#"{"a":"\"}"} tail"#;
        assert_eq!(balanced_end(s), Some(10));
        assert_eq!(unmatched_open_braces(r#"{"a":{"b":"{"#), 2);
    }
}
