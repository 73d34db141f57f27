//! Agent 错误类型
//!
//! 编排器内部用 AgentError 传递失败；对用户只暴露 user_message() 给出的降级文案，不暴露原始错误。

use thiserror::Error;

use crate::llm::LlmError;

/// 所有后端都不可用时返回给用户的文案
pub const UNAVAILABLE_REPLY: &str =
    "申し訳ありません、ただいま応答できません。しばらくしてからもう一度お試しください。";

/// 工具已执行但结果整理失败时的文案
pub const SYNTHESIS_FAILED_REPLY: &str =
    "ツールを実行しましたが、結果の処理中にエラーが発生しました。";

/// 编排过程中可能出现的错误（后端、工具、规则、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 回退链全部失败或没有健康后端
    #[error("No LLM backend available")]
    NoBackendAvailable,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 面向用户的降级文案（不包含内部细节）
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentError::NoBackendAvailable | AgentError::Llm(_) => UNAVAILABLE_REPLY,
            _ => SYNTHESIS_FAILED_REPLY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_details() {
        let err = AgentError::Llm(LlmError::Api("401 invalid key sk-xxx".to_string()));
        assert_eq!(err.user_message(), UNAVAILABLE_REPLY);
        assert!(!err.user_message().contains("sk-xxx"));
        assert_eq!(AgentError::NoBackendAvailable.user_message(), UNAVAILABLE_REPLY);
    }

    #[test]
    fn test_display() {
        let err = AgentError::InvalidRule {
            name: "broken".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid rule 'broken': unclosed group");
    }
}
