//! 传输层 - 把出站消息送到收集端
//!
//! # 设计目标
//! 1. 统一接口：所有后端实现 `Transport` trait
//! 2. 可替换：持久 MQTT、一次性 MQTT、HTTP POST 按部署选择
//! 3. 有界阻塞：连接、请求都有超时，重试次数有上限
//! 4. 重试属于连接层：发布失败不会重放事件，由 `KeepAlive` 负责重连

pub mod http;
pub mod mqtt;
pub mod oneshot;
pub mod supervisor;

pub use http::HttpTransport;
pub use mqtt::{normalize_broker_scheme, MqttTransport};
pub use oneshot::OneShot;
pub use supervisor::{connect_with_retry, KeepAlive, RetryPolicy};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{SettingsSource, TransportConfig, TransportMode};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{}", s)
    }
}

/// 发布结果
#[derive(Debug, Clone, PartialEq)]
pub enum PublishResult {
    /// 已发送，`code` 为成功标记（MQTT 为 200，HTTP 为响应状态码）
    Sent { code: u16 },
    /// 发送失败
    Failed(String),
}

impl PublishResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishResult::Sent { .. })
    }
}

/// 传输层错误
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("client error: {0}")]
    Client(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}")]
    Status(u16),
}

/// 传输后端
#[async_trait]
pub trait Transport: Send + Sync {
    /// 后端名称（用于日志）
    fn name(&self) -> &str;

    /// 目的地描述（写入发送记录）
    fn destination(&self) -> String;

    /// 建立连接，返回是否真正连上
    async fn connect(&self) -> bool;

    /// 发布一条 JSON 载荷
    async fn publish(&self, payload: &str) -> PublishResult;

    /// 断开连接（失败只记录日志）
    async fn disconnect(&self);

    /// 当前是否已连接
    async fn is_connected(&self) -> bool;
}

/// 根据配置创建传输后端
pub fn build_transport(
    config: &TransportConfig,
    settings: Arc<dyn SettingsSource>,
) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match config.mode {
        TransportMode::Mqtt => Arc::new(MqttTransport::new(config.clone(), settings)),
        TransportMode::MqttOnce => {
            Arc::new(OneShot::new(MqttTransport::new(config.clone(), settings)))
        }
        TransportMode::Http => Arc::new(HttpTransport::new(&config.server_host)?),
    };
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticSettings;

    #[test]
    fn test_publish_result_is_sent() {
        assert!(PublishResult::Sent { code: 200 }.is_sent());
        assert!(!PublishResult::Failed("boom".to_string()).is_sent());
    }

    #[test]
    fn test_build_transport_by_mode() {
        let settings: Arc<dyn SettingsSource> = Arc::new(StaticSettings::default());
        let mut config = TransportConfig::default();

        let t = build_transport(&config, settings.clone()).unwrap();
        assert_eq!(t.name(), "mqtt");
        assert_eq!(t.destination(), "MQTT: checker/payments");

        config.mode = TransportMode::MqttOnce;
        let t = build_transport(&config, settings.clone()).unwrap();
        assert_eq!(t.name(), "mqtt-once");

        config.mode = TransportMode::Http;
        let t = build_transport(&config, settings).unwrap();
        assert_eq!(t.name(), "http");
        assert_eq!(t.destination(), "http://localhost:4444/payment-received");
    }
}
