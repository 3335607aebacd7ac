//! 通知事件与出站消息
//!
//! `NotificationEvent` 是平台投递的一条原始通知，`OutboundMessage` 是发往
//! 收集端的 JSON 载荷（`package` / `title` / `text` / `postTime`）。

use serde::{Deserialize, Serialize};

/// 原始通知事件（创建后不可变，每条只被管线消费一次）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// 来源应用包名
    #[serde(default)]
    pub package: String,
    /// 标题
    #[serde(default)]
    pub title: String,
    /// 短文本
    #[serde(default)]
    pub text: String,
    /// 扩展文本（展开后的长文本）
    #[serde(default, rename = "bigText")]
    pub big_text: String,
    /// 发布时间（epoch 毫秒）
    #[serde(default, rename = "postTime")]
    pub post_time: i64,
}

impl NotificationEvent {
    /// 创建只有标题和正文的事件
    pub fn new(
        package: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            title: title.into(),
            text: text.into(),
            big_text: String::new(),
            post_time: 0,
        }
    }

    /// 设置扩展文本
    pub fn with_big_text(mut self, big_text: impl Into<String>) -> Self {
        self.big_text = big_text.into();
        self
    }

    /// 设置发布时间
    pub fn with_post_time(mut self, post_time: i64) -> Self {
        self.post_time = post_time;
        self
    }

    /// 选择要转发的正文：扩展文本非空白时优先
    pub fn payload_text(&self) -> &str {
        if self.big_text.trim().is_empty() {
            &self.text
        } else {
            &self.big_text
        }
    }

    /// 标题、正文、扩展文本拼接（用于关键词匹配）
    pub fn joined_content(&self) -> String {
        [self.title.as_str(), self.text.as_str(), self.big_text.as_str()].join(" ")
    }
}

/// 发往收集端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub package: String,
    /// 规范化后的标题
    pub title: String,
    /// 规范化后的正文
    pub text: String,
    #[serde(rename = "postTime")]
    pub post_time: i64,
}

impl OutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_prefers_big_text() {
        let event = NotificationEvent::new("pkg", "t", "short").with_big_text("long text");
        assert_eq!(event.payload_text(), "long text");

        let event = NotificationEvent::new("pkg", "t", "short").with_big_text("   ");
        assert_eq!(event.payload_text(), "short");
    }

    #[test]
    fn test_event_deserialize_missing_fields() {
        let json = r#"{"package":"com.example","title":"Hola"}"#;
        let event: NotificationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.package, "com.example");
        assert_eq!(event.title, "Hola");
        assert!(event.text.is_empty());
        assert!(event.big_text.is_empty());
        assert_eq!(event.post_time, 0);
    }

    #[test]
    fn test_outbound_wire_keys() {
        let msg = OutboundMessage {
            package: "com.bcp.bo.wallet".to_string(),
            title: "Pago".to_string(),
            text: "Recibiste S/10".to_string(),
            post_time: 1_700_000_000_000,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["package"], "com.bcp.bo.wallet");
        assert_eq!(value["title"], "Pago");
        assert_eq!(value["text"], "Recibiste S/10");
        assert_eq!(value["postTime"], 1_700_000_000_000i64);
    }
}
