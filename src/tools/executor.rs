//! 工具执行器
//!
//! 持有 ToolRegistry 与统一超时。每次调用在独立 task 中执行，超时 / 工具报错 / panic 都转为失败的
//! ActionResult，不会中断当前回合；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::actions::{ActionRequest, ActionResult};
use crate::core::AgentError;
use crate::tools::{ToolDescriptor, ToolOutput, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 ActionResult
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    /// 执行一个动作；所有失败都折叠为 success=false 的结果
    pub async fn dispatch(&self, action: &ActionRequest) -> ActionResult {
        match self.execute(&action.name, action.parameters.clone()).await {
            Ok(out) => ActionResult::ok(action.name.clone(), out.payload, out.metadata),
            Err(e) => ActionResult::failed(action.name.clone(), e.to_string()),
        }
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 或 panic 转为 ToolExecutionFailed；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolOutput, AgentError> {
        let args = serde_json::Value::Object(args);
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match self.registry.get(tool_name) {
            None => Err(AgentError::UnknownTool(tool_name.to_string())),
            Some(tool) => {
                let mut handle = tokio::spawn(async move { tool.execute(args).await });
                match timeout(self.timeout, &mut handle).await {
                    Ok(Ok(Ok(out))) => Ok(out),
                    Ok(Ok(Err(e))) => Err(AgentError::ToolExecutionFailed(e)),
                    Ok(Err(join_err)) => Err(AgentError::ToolExecutionFailed(format!(
                        "tool task aborted: {join_err}"
                    ))),
                    Err(_) => {
                        handle.abort();
                        Err(AgentError::ToolTimeout(tool_name.to_string()))
                    }
                }
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(AgentError::UnknownTool(_)) => "unknown",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    pub fn describe(&self) -> Vec<ToolDescriptor> {
        self.registry.describe()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<ToolOutput, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::message("late"))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value) -> Result<ToolOutput, String> {
            panic!("boom");
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Panicky);
        ToolExecutor::with_timeout(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_result() {
        let r = executor().dispatch(&ActionRequest::new("slow")).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let r = executor().dispatch(&ActionRequest::new("panicky")).await;
        assert!(!r.success);
        assert_eq!(r.tool_name, "panicky");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = executor().execute("missing", Default::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }
}
