//! Hibiki - 规则优先的语音助手对话编排器
//!
//! 模块划分：
//! - **actions**: 动作请求/结果、工具调用文本提取与修复、实体占位符解析
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合状态机、编排器、构建器、会话
//! - **llm**: 后端抽象与实现（OpenAI 兼容 / DeepSeek / Ollama / Mock）、分层 prompt、多后端门面
//! - **memory**: 对话状态（短期窗口、实体与分页）与长期事实接口
//! - **rules**: 规则路由与内置规则
//! - **tools**: 工具契约、注册表、执行器与内置工具（邮箱、时钟、计算器）

pub mod actions;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod rules;
pub mod tools;

pub use crate::core::{OrchestratorBuilder, Session, TurnOrchestrator, TurnOutcome};
