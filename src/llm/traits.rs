//! 生成式后端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Ollama / Mock）实现 LlmProvider：health_check 与 generate。
//! generate 返回文本以及后端原生的结构化工具调用（不支持的后端返回空）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::actions::ActionRequest;
use crate::memory::Message;
use crate::tools::ToolDescriptor;

/// 单个后端调用失败的原因；编排器只据此决定回退，不把内容展示给用户
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(Duration::ZERO)
        } else {
            LlmError::Http(e.to_string())
        }
    }
}

/// 单次调用的 token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// 后端累计 token 使用（可在多个回合间共享）
#[derive(Debug, Default)]
pub struct UsageTotals {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageTotals {
    pub fn add(&self, usage: TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

/// 一次生成的结果
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    /// 后端原生的结构化调用（OpenAI tools / Ollama tools）
    pub structured_calls: Vec<ActionRequest>,
    pub usage: Option<TokenUsage>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// 生成式后端 trait
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// 注册名（配置中的 primary / secondary 引用它）
    fn name(&self) -> &str;

    /// 本地后端（隐私模式下只使用本地后端）
    fn is_local(&self) -> bool {
        false
    }

    /// 启动时 / 手动刷新时调用，不持续轮询
    async fn health_check(&self) -> Result<(), LlmError>;

    /// tools 为空时不向后端声明工具
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Generation, LlmError>;

    /// 累计 token：(prompt, completion, total)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_totals() {
        let totals = UsageTotals::default();
        totals.add(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        });
        totals.add(TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
        });
        assert_eq!(totals.get(), (11, 6, 17));
    }
}
