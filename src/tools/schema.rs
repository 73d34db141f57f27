//! 动作调用 JSON Schema 生成（schemars）
//!
//! 将「合法动作调用」的 JSON 结构注入 system prompt，减少后端输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 动作调用格式：`TOOL_CALL: {"name": "...", "parameters": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionCallFormat {
    /// 工具名，如 mailbox、clock、calculator
    pub name: String,
    /// 工具参数，依工具不同而不同（action、message_id、body、max_results 等）
    pub parameters: HashMap<String, serde_json::Value>,
}

/// 返回动作调用的 JSON Schema 字符串，可拼入 system prompt
pub fn action_call_schema_json() -> String {
    let schema = schema_for!(ActionCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
