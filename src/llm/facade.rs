//! 多后端门面：健康检查、回退链、生成 + 动作提取、结果合成
//!
//! 回退顺序：primary -> secondary（auto_fallback 时）-> 其余健康后端（注册顺序）；
//! 每次调用都有超时，超时视为该后端失败。隐私模式下只保留本地后端。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::actions::{dedup_actions, ActionExtractor, ActionRequest, ActionResult};
use crate::core::AgentError;
use crate::llm::{Generation, LlmError, LlmProvider, PromptBuilder, PromptContext};
use crate::memory::{Message, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Available,
    Unavailable,
}

/// 后端描述（快照）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub health: Health,
    /// 注册顺序
    pub rank: usize,
    pub local: bool,
}

struct ProviderSlot {
    provider: Arc<dyn LlmProvider>,
    healthy: AtomicBool,
    rank: usize,
}

/// 回退链配置
#[derive(Debug, Clone)]
pub struct FacadeOptions {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub auto_fallback: bool,
    pub privacy_mode: bool,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

impl Default for FacadeOptions {
    fn default() -> Self {
        Self {
            primary: None,
            secondary: None,
            auto_fallback: true,
            privacy_mode: false,
            request_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        }
    }
}

/// 生成阶段的结果：可直接回复的文本 + 合并去重后的动作
#[derive(Debug, Clone, Default)]
pub struct Reasoning {
    pub text: String,
    pub actions: Vec<ActionRequest>,
    /// 实际给出回答的后端
    pub provider: String,
}

pub struct BackendFacade {
    providers: Vec<ProviderSlot>,
    options: FacadeOptions,
    prompts: PromptBuilder,
    extractor: ActionExtractor,
}

impl BackendFacade {
    pub fn new(options: FacadeOptions) -> Self {
        Self {
            providers: Vec::new(),
            options,
            prompts: PromptBuilder::new(),
            extractor: ActionExtractor::new(),
        }
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// 按注册顺序追加；初始视为可用，initialize() 后以健康检查为准。
    /// 隐私模式下非本地后端直接忽略。
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        if self.options.privacy_mode && !provider.is_local() {
            tracing::info!(provider = provider.name(), "privacy mode: skipped remote provider");
            return;
        }
        let rank = self.providers.len();
        self.providers.push(ProviderSlot {
            provider,
            healthy: AtomicBool::new(true),
            rank,
        });
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    /// 启动时并发检查所有后端
    pub async fn initialize(&self) -> Vec<ProviderDescriptor> {
        self.refresh_health().await;
        let snapshot = self.providers();
        let available = snapshot.iter().filter(|p| p.health == Health::Available).count();
        tracing::info!(
            total = snapshot.len(),
            available,
            chain = ?self.chain(),
            "backend facade initialized"
        );
        snapshot
    }

    /// 并发重新检查健康状态
    pub async fn refresh_health(&self) {
        let checks = self.providers.iter().map(|slot| async move {
            let ok = match timeout(self.options.health_timeout, slot.provider.health_check()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(provider = slot.provider.name(), error = %e, "health check failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(provider = slot.provider.name(), "health check timed out");
                    false
                }
            };
            slot.healthy.store(ok, Ordering::SeqCst);
        });
        join_all(checks).await;
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .iter()
            .map(|slot| ProviderDescriptor {
                name: slot.provider.name().to_string(),
                health: if slot.healthy.load(Ordering::SeqCst) {
                    Health::Available
                } else {
                    Health::Unavailable
                },
                rank: slot.rank,
                local: slot.provider.is_local(),
            })
            .collect()
    }

    /// 实际尝试顺序（只含健康后端）
    pub fn chain(&self) -> Vec<String> {
        self.chain_slots()
            .into_iter()
            .map(|s| s.provider.name().to_string())
            .collect()
    }

    fn find(&self, name: &str) -> Option<&ProviderSlot> {
        self.providers.iter().find(|s| s.provider.name() == name)
    }

    fn chain_slots(&self) -> Vec<&ProviderSlot> {
        let mut chain: Vec<&ProviderSlot> = Vec::new();
        let healthy = |s: &&ProviderSlot| s.healthy.load(Ordering::SeqCst);

        // 隐私模式：首个本地后端为 primary，没有 secondary
        let (primary, secondary) = if self.options.privacy_mode {
            (self.providers.first().map(|s| s.provider.name()), None)
        } else {
            (
                self.options.primary.as_deref(),
                self.options
                    .secondary
                    .as_deref()
                    .filter(|_| self.options.auto_fallback),
            )
        };

        for name in [primary, secondary].into_iter().flatten() {
            if let Some(slot) = self.find(name).filter(healthy) {
                if !chain.iter().any(|c| std::ptr::eq(*c, slot)) {
                    chain.push(slot);
                }
            }
        }
        for slot in self.providers.iter().filter(healthy) {
            if !chain.iter().any(|c| std::ptr::eq(*c, slot)) {
                chain.push(slot);
            }
        }
        chain
    }

    /// 依次尝试回退链；全部失败返回 NoBackendAvailable
    async fn generate_with_fallback(
        &self,
        messages: &[Message],
        ctx: &PromptContext,
    ) -> Result<(String, Generation), AgentError> {
        let chain = self.chain_slots();
        if chain.is_empty() {
            tracing::warn!("no healthy backend");
            return Err(AgentError::NoBackendAvailable);
        }

        for slot in chain {
            let name = slot.provider.name();
            tracing::info!(provider = name, "calling backend");
            let result = match timeout(
                self.options.request_timeout,
                slot.provider.generate(messages, &ctx.tools),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout(self.options.request_timeout)),
            };
            match result {
                Ok(generation) => return Ok((name.to_string(), generation)),
                Err(e) => tracing::warn!(provider = name, error = %e, "backend failed, falling back"),
            }
        }

        tracing::warn!("all backends failed");
        Err(AgentError::NoBackendAvailable)
    }

    /// 生成阶段：带分层 prompt 调用后端，合并原生调用（在前）与文本提取的调用并去重
    pub async fn reason_with_tools(
        &self,
        utterance: &str,
        history: &[Turn],
        ctx: &PromptContext,
    ) -> Result<Reasoning, AgentError> {
        let messages = self.prompts.reasoning_messages(utterance, history, ctx);
        let (provider, generation) = self.generate_with_fallback(&messages, ctx).await?;

        let extracted = self.extractor.extract(&generation.text);
        let native = generation.structured_calls.len();
        let mut calls = generation.structured_calls;
        calls.extend(extracted);
        let calls = dedup_actions(calls);
        tracing::debug!(
            provider = %provider,
            native,
            total = calls.len(),
            text_preview = %preview(&generation.text),
            "reasoning done"
        );

        Ok(Reasoning {
            text: generation.text,
            actions: calls,
            provider,
        })
    }

    /// 合成阶段：把动作结果折叠为 1~2 句回复
    pub async fn synthesize(
        &self,
        original_utterance: &str,
        results: &[ActionResult],
        history: &[Turn],
    ) -> Result<String, AgentError> {
        let messages = self
            .prompts
            .synthesis_messages(original_utterance, results, history);
        let ctx = PromptContext::default();
        let (provider, generation) = self.generate_with_fallback(&messages, &ctx).await?;
        tracing::debug!(provider = %provider, "synthesis done");
        Ok(self.extractor.strip_calls(&generation.text))
    }

    pub fn extractor(&self) -> &ActionExtractor {
        &self.extractor
    }
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    fn options(primary: &str, secondary: Option<&str>) -> FacadeOptions {
        FacadeOptions {
            primary: Some(primary.to_string()),
            secondary: secondary.map(String::from),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_chain_order_skips_unhealthy() {
        let facade = BackendFacade::new(options("b", Some("c")))
            .with_provider(Arc::new(MockProvider::new("a")))
            .with_provider(Arc::new(MockProvider::new("b")))
            .with_provider(Arc::new(MockProvider::new("c").unhealthy()))
            .with_provider(Arc::new(MockProvider::new("d")));
        facade.initialize().await;
        assert_eq!(facade.chain(), vec!["b", "a", "d"]);
        let c = &facade.providers()[2];
        assert_eq!(c.health, Health::Unavailable);
    }

    #[tokio::test]
    async fn test_secondary_ignored_without_auto_fallback() {
        let mut opts = options("a", Some("c"));
        opts.auto_fallback = false;
        let facade = BackendFacade::new(opts)
            .with_provider(Arc::new(MockProvider::new("a")))
            .with_provider(Arc::new(MockProvider::new("b")))
            .with_provider(Arc::new(MockProvider::new("c")));
        assert_eq!(facade.chain(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fallback_on_error_and_timeout() {
        let primary = Arc::new(MockProvider::new("p").fail("500"));
        let slow = Arc::new(MockProvider::new("s").with_delay(Duration::from_secs(2)).reply("late"));
        let last = Arc::new(MockProvider::new("l").reply("こんにちは"));
        let facade = BackendFacade::new(options("p", Some("s")))
            .with_provider(primary.clone())
            .with_provider(slow.clone())
            .with_provider(last.clone());

        let r = facade
            .reason_with_tools("やあ", &[], &PromptContext::default())
            .await
            .unwrap();
        assert_eq!(r.text, "こんにちは");
        assert_eq!(r.provider, "l");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(slow.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_fail_is_no_backend() {
        let facade = BackendFacade::new(options("p", None))
            .with_provider(Arc::new(MockProvider::new("p").fail("x")));
        let err = facade
            .reason_with_tools("やあ", &[], &PromptContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoBackendAvailable));
    }

    #[tokio::test]
    async fn test_privacy_mode_keeps_local_only() {
        let mut opts = options("remote", None);
        opts.privacy_mode = true;
        let facade = BackendFacade::new(opts)
            .with_provider(Arc::new(MockProvider::new("remote")))
            .with_provider(Arc::new(MockProvider::new("local").local()));
        assert_eq!(facade.chain(), vec!["local"]);
    }

    #[tokio::test]
    async fn test_native_calls_first_then_extracted_dedup() {
        let list = ActionRequest::new("mailbox").with_param("action", "list");
        let mock = MockProvider::new("p").reply_with_calls(
            r#"確認します TOOL_CALL: {"name":"mailbox","parameters":{"action":"list"}} TOOL_CALL: {"name":"clock","parameters":{}}"#,
            vec![list.clone()],
        );
        let facade = BackendFacade::new(options("p", None)).with_provider(Arc::new(mock));
        let r = facade
            .reason_with_tools("メール", &[], &PromptContext::default())
            .await
            .unwrap();
        assert_eq!(r.actions, vec![list, ActionRequest::new("clock")]);
    }

    #[tokio::test]
    async fn test_synthesize_uses_results() {
        let mock = Arc::new(MockProvider::new("p").reply("2件ありますよ。"));
        let facade = BackendFacade::new(options("p", None)).with_provider(mock.clone());
        let results = vec![ActionResult::ok("mailbox", serde_json::json!({"message": "2件"}), Default::default())];
        let reply = facade.synthesize("メール見て", &results, &[]).await.unwrap();
        assert_eq!(reply, "2件ありますよ。");
        let sent = mock.last_messages();
        assert!(sent.last().unwrap().content.contains("mailbox: 2件"));
    }
}
