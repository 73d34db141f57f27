//! 长期记忆：用户档案事实 + 可检索的历史片段，跨会话共享
//!
//! 编排器只通过 FactStore 读取档案、检索相关片段并回写交互；真实向量库接在这个 trait 后面。
//! 内置 InMemoryFactStore 按词 / 字二元组重叠打分，NoopFactStore 用于关闭长期记忆。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

/// 长期记忆 trait：档案、检索、回写
pub trait FactStore: Send + Sync {
    /// 用户档案（name、hobbies 等）
    fn profile(&self) -> BTreeMap<String, String>;

    /// 按查询检索最相关的 k 条
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    /// 回合结束后记录一次交互
    fn record_interaction(&self, user: &str, reply: &str);

    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopFactStore;

impl FactStore for NoopFactStore {
    fn profile(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn search(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }

    fn record_interaction(&self, _user: &str, _reply: &str) {}

    fn enabled(&self) -> bool {
        false
    }
}

type Entry = (String, HashSet<String>);

/// 内存实现：档案为键值表，片段按重叠度检索，超过上限时淘汰最旧的
#[derive(Clone)]
pub struct InMemoryFactStore {
    profile: Arc<RwLock<BTreeMap<String, String>>>,
    entries: Arc<RwLock<Vec<Entry>>>,
    max_entries: usize,
}

/// ASCII 词取小写整词；其余字符（日文等无空格文本）取相邻二元组
fn tokenize(s: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for word in s.split_whitespace() {
        let lower = word.to_lowercase();
        if lower.is_ascii() {
            let cleaned: String = lower.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.len() > 1 {
                tokens.insert(cleaned);
            }
            continue;
        }
        let chars: Vec<char> = lower.chars().filter(|c| !c.is_ascii_punctuation()).collect();
        for pair in chars.windows(2) {
            tokens.insert(pair.iter().collect());
        }
    }
    tokens
}

impl InMemoryFactStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            profile: Arc::new(RwLock::new(BTreeMap::new())),
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub fn set_profile(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut profile = self.profile.write().unwrap_or_else(|p| p.into_inner());
        profile.insert(key.into(), value.into());
    }

    /// 存入一段文本
    pub fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let tokens = tokenize(text);
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.push((text.to_string(), tokens));
        let n = entries.len();
        if n > self.max_entries {
            entries.drain(0..n - self.max_entries);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryFactStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl FactStore for InMemoryFactStore {
    fn profile(&self) -> BTreeMap<String, String> {
        self.profile
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut scored: Vec<(usize, usize, &str)> = entries
            .iter()
            .enumerate()
            .map(|(i, (text, tokens))| (query_tokens.intersection(tokens).count(), i, text.as_str()))
            .filter(|(score, _, _)| *score > 0)
            .collect();
        // 分数相同时新条目优先
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        scored
            .into_iter()
            .take(k)
            .map(|(_, _, t)| t.to_string())
            .collect()
    }

    fn record_interaction(&self, user: &str, reply: &str) {
        self.add(&format!("ユーザー: {}\nアシスタント: {}", user.trim(), reply.trim()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_ranks_by_overlap() {
        let store = InMemoryFactStore::new(10);
        store.add("週末は山登りに行きました");
        store.add("明日の会議は10時から");
        store.add("会議室の予約を忘れないで");
        let hits = store.search("明日の会議", 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], "明日の会議は10時から");
        assert!(store.search("全然関係ない", 3).iter().all(|h| !h.contains("山登り")));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = InMemoryFactStore::new(2);
        store.add("rust borrow checker");
        store.add("tokio runtime");
        store.add("serde json");
        assert_eq!(store.len(), 2);
        assert!(store.search("rust", 5).is_empty());
    }

    #[test]
    fn test_profile_and_record() {
        let store = InMemoryFactStore::default();
        store.set_profile("name", "太郎");
        assert_eq!(store.profile().get("name").map(String::as_str), Some("太郎"));
        store.record_interaction("猫の名前はミケ", "かわいい名前ですね");
        assert_eq!(store.search("ミケ", 1).len(), 1);
    }

    #[test]
    fn test_noop() {
        let store = NoopFactStore;
        store.record_interaction("a", "b");
        assert!(store.search("a", 3).is_empty());
        assert!(store.profile().is_empty());
        assert!(!store.enabled());
    }
}
