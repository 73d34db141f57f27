//! Mock 后端（用于测试，无需 API）
//!
//! 按脚本依次返回预设回复；脚本用完后返回 fallback 文本（未设置则报错）。
//! 健康状态可切换，记录调用次数与最近一次收到的消息，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::actions::ActionRequest;
use crate::llm::{Generation, LlmError, LlmProvider};
use crate::memory::Message;
use crate::tools::ToolDescriptor;

pub struct MockProvider {
    name: String,
    local: bool,
    healthy: AtomicBool,
    calls: AtomicUsize,
    delay: Option<Duration>,
    script: Mutex<VecDeque<Result<Generation, String>>>,
    fallback: Option<String>,
    last_messages: Mutex<Vec<Message>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: false,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            delay: None,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// 追加一条文本回复
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(Generation::text(text)))
    }

    /// 追加一条带原生结构化调用的回复
    pub fn reply_with_calls(self, text: impl Into<String>, calls: Vec<ActionRequest>) -> Self {
        self.push(Ok(Generation {
            text: text.into(),
            structured_calls: calls,
            usage: None,
        }))
    }

    /// 追加一次失败
    pub fn fail(self, error: impl Into<String>) -> Self {
        self.push(Err(error.into()))
    }

    /// 脚本用完后的固定回复
    pub fn fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// 每次调用前等待（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unhealthy(self) -> Self {
        self.set_healthy(false);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn push(self, entry: Result<Generation, String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!("{} is down", self.name)))
        }
    }

    async fn generate(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<Generation, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_messages.lock() {
            *last = messages.to_vec();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(generation)) => Ok(generation),
            Some(Err(e)) => Err(LlmError::Api(e)),
            None => match &self.fallback {
                Some(text) => Ok(Generation::text(text.clone())),
                None => Err(LlmError::Api(format!("{}: script exhausted", self.name))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_order_and_counter() {
        let mock = MockProvider::new("m").reply("one").fail("boom").fallback("rest");
        assert_eq!(mock.generate(&[], &[]).await.unwrap().text, "one");
        assert!(mock.generate(&[], &[]).await.is_err());
        assert_eq!(mock.generate(&[Message::user("hi")], &[]).await.unwrap().text, "rest");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_messages()[0].content, "hi");
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let mock = MockProvider::new("m").unhealthy();
        assert!(mock.health_check().await.is_err());
        mock.set_healthy(true);
        assert!(mock.health_check().await.is_ok());
    }
}
