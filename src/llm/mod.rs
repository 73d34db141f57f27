//! 生成式后端层：后端抽象与实现（OpenAI 兼容 / DeepSeek / Ollama / Mock）、分层 prompt、多后端门面

pub mod deepseek;
pub mod facade;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod traits;

pub use deepseek::{create_deepseek_provider, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use facade::{BackendFacade, FacadeOptions, Health, ProviderDescriptor, Reasoning};
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use prompt::{PolicyMode, PromptBuilder, PromptContext};
pub use traits::{Generation, LlmError, LlmProvider, TokenUsage, UsageTotals};
