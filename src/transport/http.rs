//! HTTP 收集端客户端
//!
//! 每条消息一次阻塞 POST 到 `<base>/payment-received`，非 2xx 或网络错误即失败，
//! 本层不重试。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use super::{PublishResult, Transport, TransportError};
use crate::diagnostics;

/// 收集端接收路径
pub const PAYMENT_PATH: &str = "/payment-received";
/// 健康检查路径
pub const HEALTH_PATH: &str = "/health";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 健康检查响应
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// HTTP 传输
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// 创建客户端，`base_url` 如 `http://192.168.1.10:4444`
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        // 收集端通常在局域网内，不走系统代理
        let client = Client::builder().timeout(REQUEST_TIMEOUT).no_proxy().build()?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, PAYMENT_PATH)
    }

    /// POST 载荷，返回响应状态码
    pub async fn post(&self, payload: &str) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(TransportError::Status(status.as_u16()))
        }
    }

    /// 连通性测试：GET `<base>/health`
    pub async fn check_health(&self) -> Result<HealthResponse, TransportError> {
        let url = format!("{}{}", self.base_url, HEALTH_PATH);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn destination(&self) -> String {
        self.endpoint()
    }

    async fn connect(&self) -> bool {
        true
    }

    async fn publish(&self, payload: &str) -> PublishResult {
        match self.post(payload).await {
            Ok(code) => {
                info!(url = %self.endpoint(), status = code, "Payment posted");
                diagnostics::log(format!("HTTP POST {} -> {}", self.endpoint(), code));
                PublishResult::Sent { code }
            }
            Err(e) => {
                warn!(url = %self.endpoint(), error = %e, "Payment POST failed");
                diagnostics::log(format!("HTTP POST failed: {}", e));
                PublishResult::Failed(e.to_string())
            }
        }
    }

    async fn disconnect(&self) {}

    async fn is_connected(&self) -> bool {
        true
    }
}
