//! 分层 system prompt 组装
//!
//! 层次：人格与说话风格 -> 模式策略（assist / auto）-> 工具目录与示例 -> 调用格式与 schema
//! -> 用户档案 -> 相关记忆（最多 3 条）-> 列表分页提示。合成阶段另有一套简短 prompt。

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::actions::{ActionResult, TOOL_CALL_MARKER};
use crate::memory::{ListingState, Message, Turn};
use crate::tools::{action_call_schema_json, ToolDescriptor};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// 记忆层最多注入的条数
pub const MAX_MEMORIES: usize = 3;
/// 合成阶段带入的历史条数
pub const SYNTHESIS_HISTORY: usize = 5;
/// 分页继续时每次多取的件数
pub const PAGE_STEP: usize = 5;

const DEFAULT_PERSONA: &str = "あなたは親しみやすく頼れる音声アシスタントです。";

/// 工具使用策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// 明示的な指示があるときだけ動く
    #[default]
    Assist,
    /// 文脈から推測して先回りする
    Auto,
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assist" => Ok(PolicyMode::Assist),
            "auto" => Ok(PolicyMode::Auto),
            other => Err(format!("unknown policy mode: {other}")),
        }
    }
}

/// 组装 prompt 所需的一次性上下文
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub mode: PolicyMode,
    pub tools: Vec<ToolDescriptor>,
    pub profile: BTreeMap<String, String>,
    pub memories: Vec<String>,
    pub listing: ListingState,
    /// 最近由工具确认的实体 ID
    pub latest_entity_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// 生成阶段的完整 system prompt
    pub fn build_system(&self, ctx: &PromptContext) -> String {
        let mut out = String::new();
        self.persona_layer(&mut out);
        policy_layer(&mut out, ctx.mode);
        if !ctx.tools.is_empty() {
            tool_layer(&mut out, ctx);
        }
        profile_layer(&mut out, &ctx.profile);
        memory_layer(&mut out, &ctx.memories);
        listing_layer(&mut out, &ctx.listing);
        out.trim_end().to_string()
    }

    /// 生成阶段的消息：system + 历史 + 本轮发言
    pub fn reasoning_messages(&self, utterance: &str, history: &[Turn], ctx: &PromptContext) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.build_system(ctx)));
        messages.extend(history.iter().map(Turn::to_message));
        messages.push(Message::user(utterance));
        messages
    }

    /// 合成阶段的消息：简短 system + 最近 5 条历史 + 「原始请求 + 结果摘要」
    pub fn synthesis_messages(
        &self,
        original_utterance: &str,
        results: &[ActionResult],
        history: &[Turn],
    ) -> Vec<Message> {
        let system = [
            "以下のツール実行結果をもとに、ユーザーへの返答を作ってください。",
            "• 必ず1〜2文で簡潔に答える",
            "• 結論を先に、必要なら短い補足",
            "• 結果をそのまま伝え、余計な解釈を足さない",
            "• 技術的な詳細は省き、自然な話し言葉で",
        ]
        .join("\n");

        let start = history.len().saturating_sub(SYNTHESIS_HISTORY);
        let mut messages = vec![Message::system(system)];
        messages.extend(history[start..].iter().map(Turn::to_message));
        messages.push(Message::user(format!(
            "元のリクエスト: {}\n\nツール実行結果:\n{}\n\n上記の結果を1〜2文で簡潔に伝えてください。",
            original_utterance,
            summarize_results(results)
        )));
        messages
    }

    fn persona_layer(&self, out: &mut String) {
        section(out, "【第1層】人格・会話スタイル");
        let _ = writeln!(out, "{}\n", self.persona);
        out.push_str(
            "会話の基本ルール:\n\
             • 1〜2文で要点だけ伝える\n\
             • 結論を先に、必要なら簡潔な補足\n\
             • 声で聞いて心地よい、柔らかい口調で話す\n\
             • 長い説明が必要なら「詳しく聞きますか？」と区切る\n\n",
        );
    }
}

/// 结果摘要：每行 `tool: message|json|エラー`
pub fn summarize_results(results: &[ActionResult]) -> String {
    results
        .iter()
        .map(ActionResult::summary_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "{RULE}\n{title}\n{RULE}\n");
}

fn policy_layer(out: &mut String, mode: PolicyMode) {
    section(out, "【第2層】意図理解・ツール実行判断");
    match mode {
        PolicyMode::Assist => out.push_str(
            "アシストモード:\n\
             • ユーザーが明示的に頼んだときだけツールを実行する\n\
             • 例: 「おはよう」→ 挨拶のみ / 「メール見て」→ mailbox を実行\n\
             • ツールを提案してもよいが、勝手に実行しない\n\n",
        ),
        PolicyMode::Auto => out.push_str(
            "全自動モード:\n\
             • 雑談や挨拶からも必要な情報を推測してツールを実行する\n\
             • 例: 「おはよう」→ メールと予定を確認\n\
             • ユーザーの潜在的なニーズに先回りする\n\n",
        ),
    }
    out.push_str(
        "判断の目安:\n\
         • 「確認」「見て」「教えて」は情報取得ツール\n\
         • 「送って」「返信して」「セット」は実行系ツール\n\
         • 雑談・感想のみならツール不要\n\n",
    );
}

fn tool_layer(out: &mut String, ctx: &PromptContext) {
    section(out, "【第3層】ツール実行の仕様");
    out.push_str("利用可能なツール:\n");
    for tool in &ctx.tools {
        let _ = writeln!(out, "• {}: {}", tool.name, tool.description);
        match tool.name.as_str() {
            "mailbox" => mailbox_examples(out, &tool.name, ctx.latest_entity_id.as_deref()),
            "clock" => {
                let _ = writeln!(
                    out,
                    "  例: {TOOL_CALL_MARKER} {{\"name\":\"{}\",\"parameters\":{{\"action\":\"time\"}}}}",
                    tool.name
                );
            }
            "calculator" => {
                let _ = writeln!(
                    out,
                    "  例: {TOOL_CALL_MARKER} {{\"name\":\"{}\",\"parameters\":{{\"expression\":\"(3 + 4) * 2\"}}}}",
                    tool.name
                );
            }
            _ => generic_params(out, tool),
        }
    }

    let _ = write!(
        out,
        "\nツール実行の共通ルール:\n\
         • 形式: {TOOL_CALL_MARKER} {{\"name\":\"ツール名\",\"parameters\":{{...}}}}\n\
         • 1行に1つ、JSONは必ず閉じる\n\
         • 存在しないパラメータは使わない\n\
         • メールや予定は推測せず、必ずツールで確認する\n\n\
         呼び出しオブジェクトのJSON Schema:\n{}\n\n",
        action_call_schema_json()
    );
}

/// 列表与「回复最新一封」的示例；已知最新 ID 时直接给出，否则要求先列出
fn mailbox_examples(out: &mut String, name: &str, latest_id: Option<&str>) {
    let _ = writeln!(
        out,
        "  キーワード: メール / 受信 / 返信\n\
         \x20 • 一覧: {m} {{\"name\":\"{n}\",\"parameters\":{{\"action\":\"list\",\"max_results\":5}}}}\n\
         \x20 • 最新1件: {m} {{\"name\":\"{n}\",\"parameters\":{{\"action\":\"list\",\"max_results\":1}}}}\n\
         \x20 • 未読: {m} {{\"name\":\"{n}\",\"parameters\":{{\"action\":\"list\",\"query\":\"is:unread\"}}}}\n\
         \x20 • 送信者で検索: query=\"from:名前\" / 件名で検索: query=\"subject:キーワード\"",
        m = TOOL_CALL_MARKER,
        n = name
    );
    out.push_str("  返信のルール:\n");
    match latest_id {
        Some(id) => {
            let _ = writeln!(
                out,
                "    - 最新メールID: {id} を使う\n\
                 \x20   - 例: {m} {{\"name\":\"{n}\",\"parameters\":{{\"action\":\"reply\",\"message_id\":\"{id}\",\"body\":\"<返信内容>\"}}}}",
                m = TOOL_CALL_MARKER,
                n = name
            );
        }
        None => out.push_str(
            "    - まず一覧を取得してIDを確認し、それから返信する\n\
             \x20   - 「メールID」などのプレースホルダーは使わない\n",
        ),
    }
    out.push_str("    - 返信内容はユーザーの指示に忠実に、丁寧な言葉で\n");
}

/// 没有专门示例的工具：列出 schema 中的参数名
fn generic_params(out: &mut String, tool: &ToolDescriptor) {
    let params: Vec<&str> = tool
        .parameters_schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|p| p.keys().map(String::as_str).collect())
        .unwrap_or_default();
    if !params.is_empty() {
        let _ = writeln!(out, "  パラメータ: {}", params.join(", "));
    }
}

fn profile_layer(out: &mut String, profile: &BTreeMap<String, String>) {
    if profile.is_empty() {
        return;
    }
    section(out, "【個人情報】");
    for (key, value) in profile {
        let _ = writeln!(out, "• {key}: {value}");
    }
    out.push_str("\n名前で呼びかけたり、趣味や好みに合わせて応答してください。\n\n");
}

fn memory_layer(out: &mut String, memories: &[String]) {
    if memories.is_empty() {
        return;
    }
    section(out, "【過去の記憶】");
    for m in memories.iter().take(MAX_MEMORIES) {
        let _ = writeln!(out, "• {m}");
    }
    out.push_str("\n会話の継続性を大切にしてください。\n\n");
}

fn listing_layer(out: &mut String, listing: &ListingState) {
    if listing.is_empty() {
        return;
    }
    section(out, "【一覧の表示状態】");
    let action = listing.last_action.as_deref().unwrap_or("list");
    let _ = writeln!(
        out,
        "• 表示済みの件数: {}件\n\
         • 次の表示位置（オフセット）: {}\n\n\
         「他のも見せて」「次」などの続きの要求には、件数を増やして再取得してください:\n\
         \x20 例: {} {{\"name\":\"mailbox\",\"parameters\":{{\"action\":\"{}\",\"max_results\":{}}}}}\n\
         \x20 表示済みの分は返答で省略してください。\n",
        listing.shown_count,
        listing.cursor_offset,
        TOOL_CALL_MARKER,
        action,
        listing.cursor_offset + PAGE_STEP
    );
}
