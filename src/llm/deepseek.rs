//! DeepSeek 预设：OpenAI 兼容接口，注册名 "deepseek"

use crate::llm::OpenAiProvider;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
/// 思考模式；回复慢，一般只用作备用
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// 模型优先级：参数 > DEEPSEEK_MODEL > deepseek-chat
fn pick_model(configured: Option<&str>, from_env: Option<String>) -> String {
    configured
        .filter(|m| !m.trim().is_empty())
        .map(String::from)
        .or(from_env)
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

/// 密钥只读 DEEPSEEK_API_KEY；缺失时健康检查失败，回退链会跳过它
pub fn create_deepseek_provider(model: Option<&str>) -> OpenAiProvider {
    let model = pick_model(model, env_nonempty("DEEPSEEK_MODEL"));
    let base_url = env_nonempty("DEEPSEEK_BASE_URL").unwrap_or_else(|| DEEPSEEK_BASE_URL.to_string());
    let api_key = env_nonempty("DEEPSEEK_API_KEY").unwrap_or_default();
    tracing::debug!(model = %model, base_url = %base_url, "deepseek provider configured");
    // 传入空串而不是 None，避免落到 OPENAI_API_KEY
    OpenAiProvider::new(Some(&base_url), &model, Some(&api_key)).with_name("deepseek")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;

    #[test]
    fn test_model_precedence() {
        assert_eq!(pick_model(Some(DEEPSEEK_REASONER), Some("x".into())), DEEPSEEK_REASONER);
        assert_eq!(pick_model(Some("  "), Some("from-env".into())), "from-env");
        assert_eq!(pick_model(None, None), DEEPSEEK_CHAT);
    }

    #[test]
    fn test_registered_as_deepseek() {
        let provider = create_deepseek_provider(Some(DEEPSEEK_CHAT));
        assert_eq!(provider.name(), "deepseek");
        assert_eq!(provider.model(), DEEPSEEK_CHAT);
        assert!(!provider.is_local());
    }
}
