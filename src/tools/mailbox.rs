//! 内存邮箱工具：list / read / reply
//!
//! 真实邮件服务接在 Tool trait 后面；这里的实现只在内存中保存邮件与已发送的回复，
//! 但按同样的约定返回 metadata（listed_ids、canonical_entity_id），供会话状态回写。

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::tools::{Tool, ToolOutput};

const DEFAULT_MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub unread: bool,
    pub received_at: DateTime<Utc>,
}

impl MailMessage {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            unread: true,
            received_at: Utc::now(),
        }
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// query 语法：is:unread / from:xx / subject:xx / 任意关键词
    fn matches(&self, query: &str) -> bool {
        query.split_whitespace().all(|term| {
            if term == "is:unread" {
                self.unread
            } else if let Some(from) = term.strip_prefix("from:") {
                self.from.contains(from)
            } else if let Some(subject) = term.strip_prefix("subject:") {
                self.subject.contains(subject)
            } else {
                self.subject.contains(term) || self.body.contains(term) || self.from.contains(term)
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentReply {
    pub in_reply_to: String,
    pub to: String,
    pub body: String,
}

#[derive(Default)]
struct MailboxInner {
    messages: Vec<MailMessage>,
    sent: Vec<SentReply>,
}

#[derive(Default)]
pub struct MailboxTool {
    inner: RwLock<MailboxInner>,
}

impl MailboxTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<MailMessage>) -> Self {
        let tool = Self::new();
        for m in messages {
            tool.deliver(m);
        }
        tool
    }

    /// 投递一封新邮件
    pub fn deliver(&self, message: MailMessage) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.messages.push(message);
    }

    pub fn sent_replies(&self) -> Vec<SentReply> {
        self.inner
            .read()
            .map(|i| i.sent.clone())
            .unwrap_or_default()
    }

    fn list(&self, args: &Value) -> Result<ToolOutput, String> {
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .max(1);
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("").trim();

        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut hits: Vec<&MailMessage> = inner
            .messages
            .iter()
            .filter(|m| query.is_empty() || m.matches(query))
            .collect();
        hits.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        hits.truncate(max_results);

        if hits.is_empty() {
            return Ok(ToolOutput::message("該当するメールはありません。"));
        }

        let mut lines = vec![format!("{}件のメールがあります。", hits.len())];
        for (i, m) in hits.iter().enumerate() {
            let mark = if m.unread { "【未読】" } else { "" };
            lines.push(format!("{}. {}{}（{}）\nID: {}", i + 1, mark, m.subject, m.from, m.id));
        }
        let ids: Vec<String> = hits.iter().map(|m| m.id.clone()).collect();
        let emails: Vec<Value> = hits
            .iter()
            .map(|m| serde_json::json!({"id": m.id, "from": m.from, "subject": m.subject, "unread": m.unread}))
            .collect();

        Ok(ToolOutput::new(serde_json::json!({
            "message": lines.join("\n"),
            "emails": emails,
        }))
        .with_listed_ids(&ids)
        .with_canonical_entity(ids[0].clone()))
    }

    fn read(&self, args: &Value) -> Result<ToolOutput, String> {
        let id = required_str(args, "message_id")?;
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let m = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| format!("メールが見つかりません: {id}"))?;
        m.unread = false;
        let message = format!("{}さんからのメール「{}」: {}", m.from, m.subject, m.body);
        Ok(ToolOutput::message(message).with_canonical_entity(id))
    }

    fn reply(&self, args: &Value) -> Result<ToolOutput, String> {
        let id = required_str(args, "message_id")?;
        let body = required_str(args, "body")?;
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let to = inner
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.from.clone())
            .ok_or_else(|| format!("メールが見つかりません: {id}"))?;
        inner.sent.push(SentReply {
            in_reply_to: id.to_string(),
            to: to.clone(),
            body: body.to_string(),
        });
        Ok(ToolOutput::message(format!("{to}さんに「{body}」と返信しました。")).with_canonical_entity(id))
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing parameter: {key}"))
}

#[async_trait]
impl Tool for MailboxTool {
    fn name(&self) -> &str {
        "mailbox"
    }

    fn description(&self) -> &str {
        "メールの一覧取得・閲覧・返信を行います"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "read", "reply"] },
                "max_results": { "type": "integer", "description": "一覧の件数（既定 5）" },
                "query": { "type": "string", "description": "is:unread / from:名前 / subject:件名 / キーワード" },
                "message_id": { "type": "string", "description": "一覧で得た実際のID" },
                "body": { "type": "string", "description": "返信本文" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        match args.get("action").and_then(|v| v.as_str()).unwrap_or("list") {
            "list" => self.list(&args),
            "read" => self.read(&args),
            "reply" => self.reply(&args),
            other => Err(format!("unknown mailbox action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{META_CANONICAL_ENTITY_ID, META_LISTED_IDS};
    use chrono::Duration;

    fn mailbox() -> MailboxTool {
        let now = Utc::now();
        MailboxTool::with_messages(vec![
            MailMessage::new("m1", "田中", "会議の件", "明日10時からです").received_at(now - Duration::hours(2)),
            MailMessage::new("m2", "佐藤", "請求書", "添付をご確認ください").received_at(now - Duration::hours(1)),
            MailMessage::new("m3", "鈴木", "ランチ", "今日どうですか").received_at(now),
        ])
    }

    #[tokio::test]
    async fn test_list_newest_first_with_metadata() {
        let out = mailbox()
            .execute(serde_json::json!({"action": "list", "max_results": 2}))
            .await
            .unwrap();
        assert_eq!(out.metadata[META_LISTED_IDS], serde_json::json!(["m3", "m2"]));
        assert_eq!(out.metadata[META_CANONICAL_ENTITY_ID], "m3");
        assert!(out.payload["message"].as_str().unwrap().contains("ID: m3"));
    }

    #[tokio::test]
    async fn test_list_query() {
        let out = mailbox()
            .execute(serde_json::json!({"action": "list", "query": "from:田中"}))
            .await
            .unwrap();
        assert_eq!(out.metadata[META_LISTED_IDS], serde_json::json!(["m1"]));
    }

    #[tokio::test]
    async fn test_reply_records_and_rejects_unknown() {
        let mb = mailbox();
        let out = mb
            .execute(serde_json::json!({"action": "reply", "message_id": "m2", "body": "了解です"}))
            .await
            .unwrap();
        assert_eq!(out.metadata[META_CANONICAL_ENTITY_ID], "m2");
        let sent = mb.sent_replies();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "佐藤");

        let err = mb
            .execute(serde_json::json!({"action": "reply", "message_id": "メールID", "body": "x"}))
            .await
            .unwrap_err();
        assert!(err.contains("メールID"));
    }

    #[tokio::test]
    async fn test_read_marks_read() {
        let mb = mailbox();
        mb.execute(serde_json::json!({"action": "read", "message_id": "m1"}))
            .await
            .unwrap();
        let out = mb
            .execute(serde_json::json!({"action": "list", "query": "is:unread"}))
            .await
            .unwrap();
        assert_eq!(out.metadata[META_LISTED_IDS], serde_json::json!(["m3", "m2"]));
    }
}
