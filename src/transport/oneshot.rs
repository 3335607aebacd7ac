//! 一次性发送：连接、发布一次、立即断开
//!
//! 适合不想长期占用连接的部署。发布失败时也会尝试断开，避免留下半开会话。

use async_trait::async_trait;
use tracing::debug;

use super::{PublishResult, Transport};
use crate::diagnostics;

/// 把任意传输包装成一次性发送
pub struct OneShot<T> {
    inner: T,
}

impl<T: Transport> OneShot<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for OneShot<T> {
    fn name(&self) -> &str {
        "mqtt-once"
    }

    fn destination(&self) -> String {
        self.inner.destination()
    }

    /// 一次性模式下连接只在发布时建立，这里只探测可达性
    async fn connect(&self) -> bool {
        let ok = self.inner.connect().await;
        self.inner.disconnect().await;
        ok
    }

    async fn publish(&self, payload: &str) -> PublishResult {
        diagnostics::log("Connecting for single publish");
        if !self.inner.connect().await {
            diagnostics::log("Single publish aborted: connect failed");
            return PublishResult::Failed("connect failed".to_string());
        }

        let result = self.inner.publish(payload).await;
        self.inner.disconnect().await;
        debug!(sent = result.is_sent(), "Single publish finished, session closed");
        result
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    async fn is_connected(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 记录调用次数的 mock 传输
    #[derive(Default)]
    struct MockTransport {
        connect_ok: bool,
        publish_ok: bool,
        connected: AtomicBool,
        connects: AtomicUsize,
        publishes: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &str {
            "mock"
        }

        fn destination(&self) -> String {
            "MQTT: test".to_string()
        }

        async fn connect(&self) -> bool {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(self.connect_ok, Ordering::SeqCst);
            self.connect_ok
        }

        async fn publish(&self, _payload: &str) -> PublishResult {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            if self.publish_ok {
                PublishResult::Sent { code: 200 }
            } else {
                PublishResult::Failed("boom".to_string())
            }
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_publish_connects_and_disconnects() {
        let once = OneShot::new(MockTransport {
            connect_ok: true,
            publish_ok: true,
            ..Default::default()
        });

        assert!(once.publish("{}").await.is_sent());
        assert_eq!(once.inner().connects.load(Ordering::SeqCst), 1);
        assert_eq!(once.inner().publishes.load(Ordering::SeqCst), 1);
        assert_eq!(once.inner().disconnects.load(Ordering::SeqCst), 1);
        assert!(!once.inner().is_connected().await);
    }

    #[tokio::test]
    async fn test_failed_publish_still_disconnects() {
        let once = OneShot::new(MockTransport {
            connect_ok: true,
            publish_ok: false,
            ..Default::default()
        });

        assert!(!once.publish("{}").await.is_sent());
        assert_eq!(once.inner().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_publish() {
        let once = OneShot::new(MockTransport::default());

        assert!(!once.publish("{}").await.is_sent());
        assert_eq!(once.inner().publishes.load(Ordering::SeqCst), 0);
        assert!(!once.is_connected().await);
    }
}
