//! Hibiki - 对话编排器的命令行入口
//!
//! 加载配置、初始化日志、检查后端，然后从标准输入逐行读取发言（每行一个回合）。
//! 用法：`hibiki [--config path/to/config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use hibiki::config::load_config;
use hibiki::core::{OrchestratorBuilder, Session};
use hibiki::llm::Health;
use hibiki::memory::InMemoryFactStore;
use hibiki::tools::{CalculatorTool, ClockTool, MailMessage, MailboxTool, ToolRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// 演示用收件箱
fn demo_mailbox() -> MailboxTool {
    let now = Utc::now();
    MailboxTool::with_messages(vec![
        MailMessage::new("m-1001", "田中", "来週の打ち合わせ", "火曜の10時でいかがでしょうか。")
            .received_at(now - chrono::Duration::hours(5)),
        MailMessage::new("m-1002", "佐藤", "資料送付", "昨日の資料を添付します。")
            .received_at(now - chrono::Duration::hours(2)),
        MailMessage::new("m-1003", "鈴木", "ランチ", "明日ランチ行きませんか？")
            .received_at(now - chrono::Duration::minutes(20)),
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hibiki::observability::init();

    let config = load_config(config_path_from_args()).context("Failed to load config")?;
    let context = config.context.clone();

    let mut registry = ToolRegistry::new();
    registry.register(demo_mailbox());
    registry.register(ClockTool);
    registry.register(CalculatorTool);

    let facts = Arc::new(InMemoryFactStore::new(200));
    let orchestrator = OrchestratorBuilder::new(config)
        .with_tool_registry(registry)
        .with_fact_store(facts)
        .build()
        .context("Failed to build orchestrator")?;

    let providers = orchestrator.facade().initialize().await;
    if !providers.iter().any(|p| p.health == Health::Available) {
        tracing::warn!("no healthy backend; only rule replies will work");
    }

    let mut session = Session::new(Arc::new(orchestrator), &context);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout.write_all("> ".as_bytes()).await?;
    stdout.flush().await?;
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let utterance = line.trim();
        match utterance {
            "" => {}
            "/quit" | "/exit" => break,
            "/reset" => session.reset(),
            _ => {
                let outcome = session.handle(utterance).await;
                stdout.write_all(format!("{}\n", outcome.reply).as_bytes()).await?;
            }
        }
        stdout.write_all("> ".as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!(session = %session.id(), turns = session.turns_handled(), "bye");
    Ok(())
}
