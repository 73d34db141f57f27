//! OpenAI 兼容后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenAI、DeepSeek、自建代理等。
//! 工具调用走文本标记（TOOL_CALL:），不声明原生 tools。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{Generation, LlmError, LlmProvider, TokenUsage, UsageTotals};
use crate::memory::{Message, Role};
use crate::tools::ToolDescriptor;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容后端：持有 Client、model 名与累计用量
pub struct OpenAiProvider {
    name: String,
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    usage: UsageTotals,
}

impl OpenAiProvider {
    /// api_key 为 None 时读取 OPENAI_API_KEY；仍没有则健康检查失败
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        let base_url = base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string();

        let mut config = OpenAIConfig::new().with_api_base(base_url.clone());
        if let Some(key) = &api_key {
            config = config.with_api_key(key.clone());
        }

        Self {
            name: "openai".to_string(),
            client: Client::with_config(config),
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model: model.to_string(),
            usage: UsageTotals::default(),
        }
    }

    /// 以其他注册名挂载（如 deepseek）
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                msg.map_err(|e| LlmError::Api(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// GET {base}/models；无 key 直接判定不可用
    async fn health_check(&self) -> Result<(), LlmError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Unavailable(format!("{}: api key not set", self.name)))?;
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(key)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "{}: health check returned {}",
                self.name,
                response.status()
            )))
        }
    }

    async fn generate(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<Generation, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens as u64,
            completion_tokens: u.completion_tokens as u64,
        });
        if let Some(u) = usage {
            self.usage.add(u);
        }

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::InvalidResponse("empty choices".to_string()))?;

        Ok(Generation {
            text,
            structured_calls: Vec::new(),
            usage,
        })
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
