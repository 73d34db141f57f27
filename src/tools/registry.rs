//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找；
//! describe() 生成供后端理解的工具目录。超时与审计由 ToolExecutor 负责。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::actions::{META_CANONICAL_ENTITY_ID, META_LISTED_IDS};
use crate::core::AgentError;

/// 工具执行输出：payload 给合成阶段使用，metadata 用于回写会话状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub metadata: Map<String, Value>,
}

impl ToolOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            metadata: Map::new(),
        }
    }

    /// 仅含一条给用户看的 message
    pub fn message(text: impl Into<String>) -> Self {
        Self::new(serde_json::json!({ "message": text.into() }))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 标记本次确认的实体 ID（成功执行后写入会话）
    pub fn with_canonical_entity(self, id: impl Into<String>) -> Self {
        self.with_metadata(META_CANONICAL_ENTITY_ID, id.into())
    }

    /// 标记本次列表展示的 ID（按展示顺序）
    pub fn with_listed_ids(self, ids: &[String]) -> Self {
        let ids: Vec<Value> = ids.iter().cloned().map(Value::String).collect();
        self.with_metadata(META_LISTED_IDS, Value::Array(ids))
    }
}

/// 工具 trait：名称、描述（供后端理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（动作中的 "name" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String>;
}

/// 提供给后端的工具目录条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名工具会被替换
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool replaced in registry");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 直接执行（不带超时）；未知工具返回 UnknownTool
    pub async fn execute(&self, name: &str, params: Value) -> Result<ToolOutput, AgentError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        tool.execute(params)
            .await
            .map_err(AgentError::ToolExecutionFailed)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 工具目录（按名称排序，保证 prompt 稳定）
    pub fn describe(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters_schema: tool.parameters_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
