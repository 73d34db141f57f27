//! 核心编排层：错误、回合状态机、编排器、构建器、会话

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::{AgentError, SYNTHESIS_FAILED_REPLY, UNAVAILABLE_REPLY};
pub use orchestrator::TurnOrchestrator;
pub use session::Session;
pub use state::{TurnOutcome, TurnPhase, TurnTrace};
