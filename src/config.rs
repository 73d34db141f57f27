//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIBIKI__*` 覆盖（双下划线表示嵌套，如 `HIBIKI__LLM__PRIMARY=ollama`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub context: ContextSection,
    pub tools: ToolsSection,
    pub resolver: ResolverSection,
    pub rules: RulesSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：主/备后端、隐私模式、工具执行策略、各后端参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 主后端名（openai / deepseek / ollama）
    pub primary: String,
    /// 备用后端名；为空则直接尝试其余健康后端
    pub secondary: Option<String>,
    pub auto_fallback: bool,
    /// 隐私模式：只使用本地后端
    pub privacy_mode: bool,
    /// assist：仅在用户明确指示时调用工具；auto：主动推断并调用
    pub mode: String,
    pub openai: LlmOpenAiSection,
    pub deepseek: LlmDeepSeekSection,
    pub ollama: LlmOllamaSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            primary: "openai".to_string(),
            secondary: Some("ollama".to_string()),
            auto_fallback: true,
            privacy_mode: false,
            mode: "assist".to_string(),
            openai: LlmOpenAiSection::default(),
            deepseek: LlmDeepSeekSection::default(),
            ollama: LlmOllamaSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmOpenAiSection {
    pub enabled: bool,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmOpenAiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmDeepSeekSection {
    pub enabled: bool,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmOllamaSection {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

impl Default for LlmOllamaSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次后端调用超时（秒），超时视为该后端失败并回退
    pub request: u64,
    /// 健康检查超时（秒）
    pub health: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 30,
            health: 5,
        }
    }
}

/// [context] 段：短期对话窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 保留的非 system 条目上限
    pub max_turns: usize,
    /// 时间窗口（分钟），早于窗口的非 system 条目被淘汰
    pub window_minutes: i64,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_turns: 50,
            window_minutes: 120,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// [resolver] 段：占位符词表（为空时使用内置词表）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ResolverSection {
    pub placeholders: Vec<String>,
}

/// [rules] 段：额外规则文件
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RulesSection {
    pub extra_rules_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 HIBIKI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIBIKI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIBIKI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
