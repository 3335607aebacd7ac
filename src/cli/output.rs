//! Output formatting for CLI commands

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::event::NotificationEvent;
use crate::relay::Disposition;
use crate::store::SentRecord;

/// Pretty JSON, falling back to `{}` when serialization fails
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// Epoch millis as local `YYYY-MM-DD HH:MM:SS`
pub fn format_time(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

/// 单行展示，超长截断
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

pub fn format_history(records: &[SentRecord]) -> String {
    if records.is_empty() {
        return "暂无发送记录".to_string();
    }

    let mut out = format!("最近 {} 条发送记录:\n", records.len());
    for record in records {
        out.push_str(&format!(
            "\n  [{}] {} -> {}\n    {}\n",
            format_time(record.time),
            record.code,
            record.url,
            preview(&record.text, 120)
        ));
    }
    out
}

pub fn format_archive(events: &[NotificationEvent]) -> String {
    if events.is_empty() {
        return "暂无通知".to_string();
    }

    let mut out = format!("最近 {} 条通知:\n", events.len());
    for event in events {
        out.push_str(&format!(
            "\n  [{}] {}\n    {}: {}\n",
            format_time(event.post_time),
            event.package,
            event.title,
            preview(event.payload_text(), 120)
        ));
    }
    out
}

/// 处理结果的人类可读描述
pub fn describe(disposition: &Disposition, destination: &str) -> String {
    match disposition {
        Disposition::Sent { code } => format!("已发送 ({}) -> {}", code, destination),
        Disposition::Filtered => "包名不在白名单，未发送".to_string(),
        Disposition::NotPayment => "不符合发送条件，未发送".to_string(),
        Disposition::BlankPayload => "正文为空，未发送".to_string(),
        Disposition::Duplicate => "重复通知，已忽略".to_string(),
        Disposition::PublishFailed(reason) => format!("发送失败: {}", reason),
    }
}
