//! 工具层：Tool 契约、注册表、带超时与审计的执行器，以及内置参考工具

pub mod calculator;
pub mod clock;
pub mod executor;
pub mod mailbox;
pub mod registry;
pub mod schema;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use executor::ToolExecutor;
pub use mailbox::{MailMessage, MailboxTool, SentReply};
pub use registry::{Tool, ToolDescriptor, ToolOutput, ToolRegistry};
pub use schema::action_call_schema_json;

/// 注册内置工具（邮箱、时钟、计算器）
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(MailboxTool::new());
    registry.register(ClockTool);
    registry.register(CalculatorTool);
}
