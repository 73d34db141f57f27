//! Ollama 本地后端
//!
//! POST {base_url}/api/chat（stream=false），声明原生 tools；健康检查为 GET /api/tags。
//! 返回的 message.tool_calls 转为结构化动作，文本部分照常交给提取器。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actions::ActionRequest;
use crate::llm::{Generation, LlmError, LlmProvider, TokenUsage, UsageTotals};
use crate::memory::{Message, Role};
use crate::tools::ToolDescriptor;

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    usage: UsageTotals,
}

impl OllamaProvider {
    pub fn new(base_url: Option<&str>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(OLLAMA_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            usage: UsageTotals::default(),
        }
    }

    fn convert_message(m: &Message) -> OllamaMessage {
        OllamaMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: m.content.clone(),
            tool_calls: Vec::new(),
        }
    }

    fn convert_tools(tools: &[ToolDescriptor]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "ollama: /api/tags returned {}",
                response.status()
            )))
        }
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Generation, LlmError> {
        let body = OllamaRequest {
            model: self.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            stream: false,
            tools: Self::convert_tools(tools),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("ollama {status}: {error_text}")));
        }

        let resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let usage = match (resp.prompt_eval_count, resp.eval_count) {
            (None, None) => None,
            (p, c) => Some(TokenUsage {
                prompt_tokens: p.unwrap_or(0),
                completion_tokens: c.unwrap_or(0),
            }),
        };
        if let Some(u) = usage {
            self.usage.add(u);
        }

        let structured_calls = resp
            .message
            .tool_calls
            .iter()
            .filter_map(native_call_to_action)
            .collect();

        Ok(Generation {
            text: resp.message.content,
            structured_calls,
            usage,
        })
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

/// arguments 可能是对象，也可能是 JSON 字符串
fn native_call_to_action(call: &OllamaToolCall) -> Option<ActionRequest> {
    let name = call.function.name.trim();
    if name.is_empty() {
        return None;
    }
    let parameters = match &call.function.arguments {
        Value::Object(map) => map.clone(),
        Value::String(s) => serde_json::from_str::<Map<String, Value>>(s).unwrap_or_default(),
        _ => Map::new(),
    };
    Some(ActionRequest {
        name: name.to_string(),
        parameters,
    })
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_native_tool_calls() {
        let raw = r#"{
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "mailbox", "arguments": {"action": "list", "max_results": 3}}},
                    {"function": {"name": "clock", "arguments": "{\"action\":\"time\"}"}}
                ]
            },
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 4
        }"#;
        let resp: OllamaResponse = serde_json::from_str(raw).unwrap();
        let calls: Vec<ActionRequest> = resp
            .message
            .tool_calls
            .iter()
            .filter_map(native_call_to_action)
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].param_str("action"), Some("list"));
        assert_eq!(calls[1].name, "clock");
        assert_eq!(calls[1].param_str("action"), Some("time"));
    }

    #[test]
    fn test_tools_declaration_shape() {
        let tools = vec![ToolDescriptor {
            name: "clock".into(),
            description: "time".into(),
            parameters_schema: serde_json::json!({"type": "object"}),
        }];
        let v = OllamaProvider::convert_tools(&tools);
        assert_eq!(v[0]["type"], "function");
        assert_eq!(v[0]["function"]["name"], "clock");
    }
}
