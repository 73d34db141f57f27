//! 短期记忆：会话状态
//!
//! 保存按时间顺序追加的 Turn（不可变），同时受「最近 N 条」与「时间窗口」两重约束，
//! system 条目不受两者限制。另外维护派生量：当前话题、最近一次由工具确认的实体 ID、列表分页状态。

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 发往后端的单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 会话中的一条记录：角色、内容、时间戳、自由元数据；创建后不再修改
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::at(role, content, Utc::now())
    }

    pub fn at(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// 外部列表（如邮件一览）的分页状态：已展示 ID 只增不减，offset 单调不减
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ListingState {
    pub last_action: Option<String>,
    /// 按首次展示顺序排列的已展示 ID（有序集合）
    pub shown_ids: Vec<String>,
    pub shown_count: usize,
    pub cursor_offset: usize,
}

impl ListingState {
    pub fn is_empty(&self) -> bool {
        self.shown_ids.is_empty()
    }
}

/// 话题关键词桶：用户每次发言时按顺序扫描，命中第一个桶即切换话题
const TOPIC_BUCKETS: &[(&str, &[&str])] = &[
    ("天気", &["天気", "気温", "雨", "晴れ", "曇り"]),
    ("音楽", &["音楽", "曲", "歌", "再生", "プレイリスト"]),
    ("照明", &["電気", "照明", "ライト", "明かり"]),
    ("予定", &["予定", "スケジュール", "カレンダー", "会議"]),
    ("メモ", &["メモ", "記録", "覚えて", "保存"]),
    ("メール", &["メール", "gmail", "返信", "受信"]),
];

/// 单个会话独占的对话状态；不跨会话共享
#[derive(Clone, Debug)]
pub struct ConversationState {
    turns: Vec<Turn>,
    max_turns: usize,
    window: Duration,
    session_start: DateTime<Utc>,
    current_topic: Option<String>,
    last_referenced_entity_id: Option<String>,
    listing: ListingState,
}

impl ConversationState {
    /// max_turns：保留的非 system 条目上限；window：时间窗口
    pub fn new(max_turns: usize, window: Duration) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
            window,
            session_start: Utc::now(),
            current_topic: None,
            last_referenced_entity_id: None,
            listing: ListingState::default(),
        }
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.push(Turn::new(Role::User, text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.push(Turn::new(Role::Assistant, text));
    }

    pub fn append_assistant_with_metadata(
        &mut self,
        text: impl Into<String>,
        metadata: Map<String, Value>,
    ) {
        self.push(Turn::new(Role::Assistant, text).with_metadata(metadata));
    }

    pub fn append_system(&mut self, text: impl Into<String>) {
        self.push(Turn::new(Role::System, text));
    }

    /// 追加一条已构造的 Turn（时间戳由调用方给定），随后剪枝
    pub fn push(&mut self, turn: Turn) {
        if turn.role == Role::User {
            self.update_topic(&turn.content);
        }
        self.turns.push(turn);
        self.prune();
    }

    /// 最近 n 条（含 system），按时间顺序
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// 最近 n 条非 system 记录，按时间顺序
    pub fn recent_dialogue(&self, n: usize) -> Vec<&Turn> {
        let mut out: Vec<&Turn> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role != Role::System)
            .take(n)
            .collect();
        out.reverse();
        out
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 记录工具确认过的实体 ID；空串忽略
    pub fn set_canonical_entity(&mut self, id: impl Into<String>) {
        let id = id.into();
        if id.trim().is_empty() {
            return;
        }
        tracing::debug!(entity_id = %id, "canonical entity updated");
        self.last_referenced_entity_id = Some(id);
    }

    pub fn last_referenced_entity_id(&self) -> Option<&str> {
        self.last_referenced_entity_id.as_deref()
    }

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn listing(&self) -> &ListingState {
        &self.listing
    }

    /// 追加本次列表结果：新 ID 加入已展示集合，shown_count / cursor_offset 增加新展示的数量。
    /// 返回新展示的数量。
    pub fn update_listing_state(&mut self, action: impl Into<String>, ids: &[String]) -> usize {
        let seen: HashSet<&str> = self.listing.shown_ids.iter().map(String::as_str).collect();
        let mut fresh: Vec<String> = Vec::new();
        for id in ids {
            if !seen.contains(id.as_str()) && !fresh.contains(id) {
                fresh.push(id.clone());
            }
        }
        let newly_shown = fresh.len();
        self.listing.shown_ids.extend(fresh);
        self.listing.shown_count += newly_shown;
        self.listing.cursor_offset += newly_shown;
        self.listing.last_action = Some(action.into());
        newly_shown
    }

    /// 显式重置分页状态（offset 唯一允许回退的入口）
    pub fn reset_listing(&mut self) {
        self.listing = ListingState::default();
    }

    /// 剪枝：先淘汰时间窗口外的记录，再把非 system 记录裁到 max_turns；system 记录始终保留
    pub fn prune(&mut self) {
        self.prune_at(Utc::now());
    }

    fn prune_at(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        let before = self.turns.len();
        self.turns
            .retain(|t| t.role == Role::System || t.timestamp > cutoff);

        let non_system = self.turns.iter().filter(|t| t.role != Role::System).count();
        if non_system > self.max_turns {
            let mut to_drop = non_system - self.max_turns;
            self.turns.retain(|t| {
                if t.role != Role::System && to_drop > 0 {
                    to_drop -= 1;
                    false
                } else {
                    true
                }
            });
        }

        let removed = before - self.turns.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.turns.len(), "conversation pruned");
        }
    }

    /// 会话摘要：开始时间、条数、话题与最近 6 条预览
    pub fn summary(&self) -> String {
        let users = self.turns.iter().filter(|t| t.role == Role::User).count();
        let assistants = self.turns.iter().filter(|t| t.role == Role::Assistant).count();
        if users + assistants == 0 {
            return "会話が開始されたばかりです。".to_string();
        }

        let mut s = format!(
            "会話開始: {}\nメッセージ数: ユーザー {}, アシスタント {}\n",
            self.session_start.format("%Y-%m-%d %H:%M"),
            users,
            assistants
        );
        if let Some(topic) = &self.current_topic {
            s.push_str(&format!("現在のトピック: {}\n", topic));
        }
        s.push_str("\n最近の会話:\n");
        for t in self.recent(6).iter().filter(|t| t.role != Role::System) {
            let preview: String = t.content.chars().take(100).collect();
            let ellipsis = if t.content.chars().count() > 100 { "..." } else { "" };
            let role = match t.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            s.push_str(&format!("- {}: {}{}\n", role, preview, ellipsis));
        }
        s
    }

    /// 重置会话：只保留 system 记录，清空话题、实体 ID 与分页状态
    pub fn reset(&mut self) {
        self.turns.retain(|t| t.role == Role::System);
        self.current_topic = None;
        self.last_referenced_entity_id = None;
        self.listing = ListingState::default();
        self.session_start = Utc::now();
    }

    fn update_topic(&mut self, text: &str) {
        let lower = text.to_lowercase();
        for (topic, keywords) in TOPIC_BUCKETS {
            if keywords.iter().any(|k| lower.contains(k)) {
                if self.current_topic.as_deref() != Some(*topic) {
                    tracing::info!(topic = %topic, "topic changed");
                    self.current_topic = Some(topic.to_string());
                }
                break;
            }
        }
    }
}
