//! 内置规则：问候、时间日期、简单计算、情绪、感谢道歉、帮助、邮件、道别

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::Local;
use regex::Regex;

use crate::actions::ActionRequest;
use crate::core::AgentError;
use crate::memory::ConversationState;
use crate::tools::calculator::{evaluate, format_number};
use crate::tools::clock::{date_sentence, time_sentence};

use super::router::{ActionBuilder, DynamicResponder, Rule, RuleResponse};

pub const MAIL_TOOL: &str = "mailbox";
/// 两步回复中第二步使用的占位 ID，执行前由实体解析替换
pub const MAIL_ID_PLACEHOLDER: &str = "メールID";
const DEFAULT_REPLY_BODY: &str = "了解しました。";

const REPLY_KEYWORDS: &[&str] = &["返信", "返事", "reply"];
const READ_KEYWORDS: &[&str] = &["未読", "読", "内容", "確認", "開いて", "チェック"];
const CONTINUE_KEYWORDS: &[&str] = &["他の", "ほかの", "次の", "続き", "もっと"];

pub fn default_rules() -> Result<Vec<Rule>, AgentError> {
    let time: DynamicResponder = Arc::new(|_| time_sentence(&Local::now()));
    let date: DynamicResponder = Arc::new(|_| date_sentence(&Local::now()));
    let calc: DynamicResponder = Arc::new(simple_calculation);
    let mail: ActionBuilder = Arc::new(mail_actions);

    Ok(vec![
        Rule::canned(
            "greeting_morning",
            &["おはよう", "お早う", r"^morning$", r"^ohayo"],
            10,
            &[
                "おはようございます！今日も一日がんばりましょう！",
                "おはよう！素敵な一日になりそうですね",
                "おはようございます。今日は何をお手伝いしましょうか？",
            ],
        )?,
        Rule::canned(
            "greeting_general",
            &["こんにちは", "こんばんは", r"\bhello\b", r"\bhi\b"],
            10,
            &[
                "こんにちは！何かお手伝いできることはありますか？",
                "こんにちは！今日はいかがお過ごしですか？",
                "お疲れさまです！何でも気軽に聞いてくださいね",
            ],
        )?,
        Rule::new(
            "current_time",
            &["今何時", r"時間.*教えて", r"現在.*時刻", "いまの時間"],
            15,
            RuleResponse::Dynamic(time),
        )?,
        Rule::new(
            "current_date",
            &[r"今日.*日付", r"今日.*何日", r"日付.*教えて", "きょうの日付"],
            15,
            RuleResponse::Dynamic(date),
        )?,
        Rule::new(
            "simple_calculation",
            &[r"\d+(?:\.\d+)?\s*[+\-×*÷/]\s*\d+"],
            20,
            RuleResponse::Dynamic(calc),
        )?,
        Rule::canned(
            "feeling_bad",
            &["疲れた", "つらい", "大変", "きつい", "しんどい"],
            8,
            &[
                "お疲れさまです。少し休憩してくださいね",
                "大変でしたね。無理しないでください",
                "お疲れのようですね。何かリラックスできることはありますか？",
            ],
        )?,
        Rule::canned(
            "feeling_good",
            &["嬉しい", "楽しい", "最高", "幸せ"],
            8,
            &[
                "それは良かったです！素晴らしいですね",
                "嬉しいお話をありがとうございます！",
                "そんな気持ちになれて良かったですね",
            ],
        )?,
        Rule::canned(
            "thanks",
            &["ありがとう", "感謝", "thank"],
            12,
            &["どういたしまして。ではまた後ほど。"],
        )?,
        Rule::canned(
            "sorry",
            &["ごめん", "すみません", "申し訳", "sorry"],
            12,
            &["大丈夫ですよ！", "お気になさらず", "いえいえ、全然問題ありません"],
        )?,
        Rule::canned(
            "help",
            &["ヘルプ", "使い方", r"\bhelp\b", "どうやって"],
            15,
            &[
                "私は音声アシスタントです。話しかけてくだされば、いろいろお手伝いできます",
                "質問や計算、メールの確認などができますよ",
                "プロフィールを登録すると、もっとあなたに合わせた応答ができます",
            ],
        )?,
        Rule::new(
            "mail_trigger",
            &[
                "メール",
                "gmail",
                "ジーメール",
                r"受信.*メール",
                r"送信.*メール",
                "返信",
                "返事",
                r"\breply\b",
            ],
            25,
            RuleResponse::Actions(mail),
        )?,
        Rule::canned(
            "goodbye",
            &["さようなら", "バイバイ", r"また(ね|明日|今度)", r"\bbye\b", "goodbye"],
            10,
            &[
                "さようなら！また話しましょう",
                "お疲れさまでした！またお会いしましょう",
                "また今度お話ししましょう。お気をつけて！",
            ],
        )?,
    ])
}

/// 邮件规则的动作：回复 -> 先取最新 1 封再回复（占位 ID）；继续浏览 -> 扩大件数；
/// 阅读类 -> 未读 5 封；其余 -> 最新 5 封
pub fn mail_actions(normalized: &str, state: &ConversationState) -> Vec<ActionRequest> {
    let has = |keys: &[&str]| keys.iter().any(|k| normalized.contains(k));

    if has(REPLY_KEYWORDS) {
        return vec![
            ActionRequest::new(MAIL_TOOL)
                .with_param("action", "list")
                .with_param("max_results", 1),
            ActionRequest::new(MAIL_TOOL)
                .with_param("action", "reply")
                .with_param("message_id", MAIL_ID_PLACEHOLDER)
                .with_param("body", extract_reply_content(normalized)),
        ];
    }

    let listing = state.listing();
    if !listing.is_empty() && has(CONTINUE_KEYWORDS) {
        return vec![ActionRequest::new(MAIL_TOOL)
            .with_param("action", "list")
            .with_param("max_results", (listing.cursor_offset + 5) as u64)];
    }

    if has(READ_KEYWORDS) {
        return vec![ActionRequest::new(MAIL_TOOL)
            .with_param("action", "list")
            .with_param("query", "is:unread")
            .with_param("max_results", 5)];
    }

    vec![ActionRequest::new(MAIL_TOOL)
        .with_param("action", "list")
        .with_param("max_results", 5)]
}

fn reply_content_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(.+?)(?:って|と|て)(?:返信|返事)").expect("valid regex"))
}

fn mail_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:最新の)?メールに[、,\s]*").expect("valid regex"))
}

/// 从「〇〇って返信して」中取出回复正文；取不到时用默认正文
pub fn extract_reply_content(utterance: &str) -> String {
    let Some(caps) = reply_content_re().captures(utterance) else {
        return DEFAULT_REPLY_BODY.to_string();
    };
    let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let content = mail_prefix_re()
        .replace(raw.trim(), "")
        .trim_matches(|c: char| c.is_whitespace() || "「」『』\"'、,".contains(c))
        .to_string();
    if content.is_empty() || ["届いてる", "わかった"].contains(&content.as_str()) {
        DEFAULT_REPLY_BODY.to_string()
    } else {
        content
    }
}

fn calc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)\s*([+\-×*÷/])\s*(\d+(?:\.\d+)?)").expect("valid regex")
    })
}

/// 两个操作数的四则运算
pub fn simple_calculation(normalized: &str) -> String {
    let Some(caps) = calc_re().captures(normalized) else {
        return "計算できませんでした".to_string();
    };
    let (a, op, b) = (&caps[1], &caps[2], &caps[3]);
    let shown_op = match op {
        "*" | "×" => "×",
        "/" | "÷" => "÷",
        other => other,
    };
    match evaluate(&format!("{a}{op}{b}")) {
        Ok(v) => format!("{a} {shown_op} {b} = {}です", format_number(v)),
        Err(e) if e.contains("division by zero") => "0で割ることはできません".to_string(),
        Err(_) => "計算できませんでした".to_string(),
    }
}

/// 用档案（name / hobbies）个性化固定回复
pub fn personalize(rule: &str, text: &str, profile: &BTreeMap<String, String>) -> String {
    let name = profile.get("name").map(|s| s.trim()).filter(|s| !s.is_empty());
    match (rule, name) {
        ("greeting_morning", Some(n)) => format!("おはようございます、{n}さん！今日も一日がんばりましょう！"),
        ("greeting_general", Some(n)) => format!("こんにちは、{n}さん！今日はいかがお過ごしですか？"),
        ("thanks", Some(n)) => format!("どういたしまして、{n}さん。ではまた後ほど。"),
        ("feeling_good", _) => match profile.get("hobbies").filter(|h| !h.trim().is_empty()) {
            Some(h) => format!("それは良かったです！{h}の時間も作って、もっと楽しく過ごしてくださいね。"),
            None => text.to_string(),
        },
        _ => text.to_string(),
    }
}
