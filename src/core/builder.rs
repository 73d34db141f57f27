//! 编排器构建器：从 AppConfig 组装后端门面、工具执行器、规则路由与解析器
//!
//! CLI 与测试共用同一套装配逻辑；测试可用 with_provider / with_tool_registry 注入替身。

use std::sync::Arc;
use std::time::Duration;

use crate::actions::EntityResolver;
use crate::config::AppConfig;
use crate::core::{AgentError, TurnOrchestrator};
use crate::llm::{
    create_deepseek_provider, BackendFacade, FacadeOptions, LlmProvider, OllamaProvider,
    OpenAiProvider, PolicyMode,
};
use crate::memory::{FactStore, NoopFactStore};
use crate::rules::RuleRouter;
use crate::tools::{register_builtin_tools, ToolExecutor, ToolRegistry};

pub struct OrchestratorBuilder {
    config: AppConfig,
    providers: Vec<Arc<dyn LlmProvider>>,
    registry: Option<ToolRegistry>,
    facts: Arc<dyn FactStore>,
    skip_configured_providers: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            registry: None,
            facts: Arc::new(NoopFactStore),
            skip_configured_providers: false,
        }
    }

    /// 追加一个后端（排在配置中的后端之后）
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// 只使用 with_provider 注入的后端
    pub fn only_injected_providers(mut self) -> Self {
        self.skip_configured_providers = true;
        self
    }

    /// 替换默认的内置工具集
    pub fn with_tool_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_fact_store(mut self, facts: Arc<dyn FactStore>) -> Self {
        self.facts = facts;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn facade_options(&self) -> FacadeOptions {
        let llm = &self.config.llm;
        FacadeOptions {
            primary: Some(llm.primary.clone()).filter(|p| !p.trim().is_empty()),
            secondary: llm.secondary.clone().filter(|s| !s.trim().is_empty()),
            auto_fallback: llm.auto_fallback,
            privacy_mode: llm.privacy_mode,
            request_timeout: Duration::from_secs(llm.timeouts.request.max(1)),
            health_timeout: Duration::from_secs(llm.timeouts.health.max(1)),
        }
    }

    /// 按配置创建后端（openai / deepseek / ollama 中启用的）
    pub fn configured_providers(&self) -> Vec<Arc<dyn LlmProvider>> {
        let llm = &self.config.llm;
        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        if llm.openai.enabled {
            providers.push(Arc::new(OpenAiProvider::new(
                llm.openai.base_url.as_deref(),
                &llm.openai.model,
                None,
            )));
        }
        if llm.deepseek.enabled {
            providers.push(Arc::new(create_deepseek_provider(llm.deepseek.model.as_deref())));
        }
        if llm.ollama.enabled {
            providers.push(Arc::new(OllamaProvider::new(
                Some(llm.ollama.base_url.as_str()),
                &llm.ollama.model,
            )));
        }
        providers
    }

    pub fn build_facade(&self) -> BackendFacade {
        let mut facade = BackendFacade::new(self.facade_options());
        if !self.skip_configured_providers {
            for provider in self.configured_providers() {
                facade.register(provider);
            }
        }
        for provider in &self.providers {
            facade.register(provider.clone());
        }
        facade
    }

    pub fn build_tool_registry(&self) -> ToolRegistry {
        match &self.registry {
            Some(registry) => registry.clone(),
            None => {
                let mut registry = ToolRegistry::new();
                register_builtin_tools(&mut registry);
                registry
            }
        }
    }

    /// 内置规则 + 可选的额外规则文件
    pub fn build_router(&self) -> Result<RuleRouter, AgentError> {
        let mut router = RuleRouter::with_defaults()?;
        if let Some(path) = &self.config.rules.extra_rules_path {
            router.load_rules_toml(path)?;
        }
        Ok(router)
    }

    pub fn build_resolver(&self) -> EntityResolver {
        EntityResolver::new().with_placeholders(&self.config.resolver.placeholders)
    }

    pub fn policy_mode(&self) -> Result<PolicyMode, AgentError> {
        self.config
            .llm
            .mode
            .parse()
            .map_err(AgentError::ConfigError)
    }

    pub fn build(self) -> Result<TurnOrchestrator, AgentError> {
        let mode = self.policy_mode()?;
        let router = self.build_router()?;
        let facade = self.build_facade();
        let executor = ToolExecutor::new(
            self.build_tool_registry(),
            self.config.tools.tool_timeout_secs.max(1),
        );
        tracing::info!(
            chain = ?facade.chain(),
            tools = ?executor.tool_names(),
            rules = router.stats().total_rules,
            ?mode,
            "orchestrator built"
        );
        Ok(TurnOrchestrator::new(router, facade, executor)
            .with_resolver(self.build_resolver())
            .with_fact_store(self.facts)
            .with_mode(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    fn offline_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.openai.enabled = false;
        cfg.llm.ollama.enabled = false;
        cfg
    }

    #[test]
    fn test_privacy_mode_keeps_only_local() {
        let mut cfg = offline_config();
        cfg.llm.privacy_mode = true;
        let facade = OrchestratorBuilder::new(cfg)
            .with_provider(Arc::new(MockProvider::new("cloud")))
            .with_provider(Arc::new(MockProvider::new("local").local()))
            .build_facade();
        assert_eq!(facade.chain(), vec!["local".to_string()]);
    }

    #[test]
    fn test_configured_providers_follow_enabled_flags() {
        let mut cfg = AppConfig::default();
        cfg.llm.deepseek.enabled = true;
        let names: Vec<String> = OrchestratorBuilder::new(cfg)
            .configured_providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["openai", "deepseek", "ollama"]);
    }

    #[test]
    fn test_invalid_mode_is_config_error() {
        let mut cfg = offline_config();
        cfg.llm.mode = "aggressive".to_string();
        let err = OrchestratorBuilder::new(cfg).build().err();
        assert!(matches!(err, Some(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_extra_placeholders_from_config() {
        let mut cfg = offline_config();
        cfg.resolver.placeholders = vec!["<対象メール>".to_string()];
        let resolver = OrchestratorBuilder::new(cfg).build_resolver();
        assert!(resolver.is_placeholder("<対象メール>"));
        assert!(resolver.is_placeholder("メールID"));
    }

    #[test]
    fn test_default_registry_has_builtin_tools() {
        let registry = OrchestratorBuilder::new(offline_config()).build_tool_registry();
        assert_eq!(registry.tool_names(), vec!["calculator", "clock", "mailbox"]);
    }
}
