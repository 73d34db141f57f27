//! 时钟工具：当前时刻 / 日期

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde_json::Value;

use crate::tools::{Tool, ToolOutput};

const WEEKDAYS: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "現在の時刻や日付を返します"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["time", "date"] }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let now = Local::now();
        let message = match args.get("action").and_then(|v| v.as_str()).unwrap_or("time") {
            "time" => time_sentence(&now),
            "date" => date_sentence(&now),
            other => return Err(format!("unknown clock action: {other}")),
        };
        Ok(ToolOutput::new(serde_json::json!({
            "message": message,
            "iso": now.to_rfc3339(),
        })))
    }
}

/// 例：「現在の時刻は14時05分です。」
pub fn time_sentence<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!("現在の時刻は{}時{:02}分です。", now.hour(), now.minute())
}

/// 例：「今日は2026年10月16日（金曜日）です。」
pub fn date_sentence<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    let weekday = WEEKDAYS[now.weekday().num_days_from_monday() as usize];
    format!(
        "今日は{}年{}月{}日（{}曜日）です。",
        now.year(),
        now.month(),
        now.day(),
        weekday
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sentences() {
        let t = Utc.with_ymd_and_hms(2026, 10, 16, 9, 5, 0).unwrap();
        assert_eq!(time_sentence(&t), "現在の時刻は9時05分です。");
        assert_eq!(date_sentence(&t), "今日は2026年10月16日（金曜日）です。");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        assert!(ClockTool
            .execute(serde_json::json!({"action": "alarm"}))
            .await
            .is_err());
    }
}
