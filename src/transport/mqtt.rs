//! 持久 MQTT 连接
//!
//! 连接参数：非 clean session、keep-alive 20 秒、最多 10 条在途消息、
//! 连接超时 10 秒。连接调用返回后必须收到 broker 的 ConnAck 才算连上。
//!
//! 连上后由后台 driver 任务持续 poll 事件循环；网络错误后 rumqttc 会在下一次
//! poll 时自动重连，driver 只负责跟踪链路状态。
//!
//! 发布使用 QoS 0（至多一次）、不保留。未连接时先尝试一次连接。

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConnectionState, PublishResult, Transport, TransportError};
use crate::config::{ConfigError, SettingsSource, TransportConfig};
use crate::diagnostics;

/// 连接超时
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// MQTT keep-alive 间隔
pub const KEEP_ALIVE: Duration = Duration::from_secs(20);
/// 在途消息上限
pub const MAX_INFLIGHT: u16 = 10;
/// 发布成功时写入发送记录的状态码
pub const SUCCESS_CODE: u16 = 200;

const DEFAULT_PORT: u16 = 1883;
const REQUEST_CAPACITY: usize = 10;
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// 把 `mqtt://` 改写为客户端需要的 `tcp://`
pub fn normalize_broker_scheme(broker: &str) -> Cow<'_, str> {
    match broker.strip_prefix("mqtt://") {
        Some(rest) => Cow::Owned(format!("tcp://{}", rest)),
        None => Cow::Borrowed(broker),
    }
}

/// broker 主机和端口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// 解析 broker 地址（`tcp://host[:port]`，也接受 `mqtt://` 和不带 scheme 的写法）
pub fn parse_broker(broker: &str) -> Result<BrokerEndpoint, ConfigError> {
    let trimmed = broker.trim();
    let normalized = normalize_broker_scheme(trimmed);
    let with_scheme = if normalized.contains("://") {
        normalized.into_owned()
    } else {
        format!("tcp://{}", normalized)
    };

    let url = reqwest::Url::parse(&with_scheme)
        .map_err(|_| ConfigError::InvalidBroker(broker.to_string()))?;
    if url.scheme() != "tcp" {
        return Err(ConfigError::InvalidBroker(broker.to_string()));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBroker(broker.to_string()))?;

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_PORT),
    })
}

/// 一次已建立的会话
struct Session {
    state: ConnectionState,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    /// driver 观察到的底层链路状态
    link_up: Arc<AtomicBool>,
}

impl Session {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            client: None,
            driver: None,
            cancel: CancellationToken::new(),
            link_up: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.client.is_some()
            && self.link_up.load(Ordering::SeqCst)
    }

    /// 直接丢弃当前会话（不发送 DISCONNECT）
    fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.client = None;
        self.link_up.store(false, Ordering::SeqCst);
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// 持久 MQTT 传输
pub struct MqttTransport {
    config: TransportConfig,
    settings: Arc<dyn SettingsSource>,
    session: Mutex<Session>,
}

impl MqttTransport {
    pub fn new(config: TransportConfig, settings: Arc<dyn SettingsSource>) -> Self {
        Self {
            config,
            settings,
            session: Mutex::new(Session::idle()),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 当前状态
    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.state
    }

    fn options(&self, endpoint: &BrokerEndpoint) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &endpoint.host, endpoint.port);
        options
            .set_keep_alive(KEEP_ALIVE)
            .set_clean_session(false)
            .set_inflight(MAX_INFLIGHT);
        options
    }

    async fn connect_locked(&self, session: &mut Session) -> bool {
        session.teardown();
        session.state = ConnectionState::Connecting;

        match self.open_session(session).await {
            Ok(()) => {
                session.state = ConnectionState::Connected;
                self.settings.set_connected(true);
                info!(broker = %self.config.broker, "MQTT connected");
                diagnostics::log("MQTT connected");
                true
            }
            Err(e) => {
                session.teardown();
                self.settings.set_connected(false);
                warn!(broker = %self.config.broker, error = %e, "MQTT connect failed");
                diagnostics::log(format!("MQTT connect failed: {}", e));
                false
            }
        }
    }

    async fn open_session(&self, session: &mut Session) -> Result<(), TransportError> {
        let endpoint = parse_broker(&self.config.broker)?;
        if self.config.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic.into());
        }
        // 非 clean session 需要非空 client id
        if self.config.client_id.trim().is_empty() {
            return Err(ConfigError::EmptyClientId.into());
        }

        if self.config.broker.trim().starts_with("mqtt://") {
            diagnostics::log("Rewriting broker scheme mqtt:// to tcp://");
        }
        diagnostics::log(format!(
            "Connecting to MQTT broker tcp://{}:{} as {}",
            endpoint.host, endpoint.port, self.config.client_id
        ));

        let (client, mut eventloop) = AsyncClient::new(self.options(&endpoint), REQUEST_CAPACITY);

        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::ConnectTimeout(CONNECT_TIMEOUT))??;

        let cancel = CancellationToken::new();
        let link_up = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive(eventloop, link_up.clone(), cancel.clone()));

        session.client = Some(client);
        session.driver = Some(driver);
        session.cancel = cancel;
        session.link_up = link_up;
        Ok(())
    }

    fn mark_disconnected(&self, session: &mut Session) {
        session.state = ConnectionState::Disconnected;
        self.settings.set_connected(false);
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn destination(&self) -> String {
        format!("MQTT: {}", self.config.topic)
    }

    async fn connect(&self) -> bool {
        let mut session = self.session.lock().await;
        self.connect_locked(&mut session).await
    }

    async fn publish(&self, payload: &str) -> PublishResult {
        let mut session = self.session.lock().await;

        if !session.is_live() {
            diagnostics::log("MQTT disconnected, reconnecting before publish");
            if !self.connect_locked(&mut session).await {
                diagnostics::log("MQTT reconnect failed, message not sent");
                return PublishResult::Failed("not connected".to_string());
            }
        }

        let Some(client) = session.client.clone() else {
            self.mark_disconnected(&mut session);
            return PublishResult::Failed("no client".to_string());
        };

        let topic = self.config.topic.clone();
        let send = client.publish(
            topic.as_str(),
            QoS::AtMostOnce,
            false,
            payload.as_bytes().to_vec(),
        );
        match tokio::time::timeout(PUBLISH_TIMEOUT, send).await {
            Ok(Ok(())) => {
                debug!(topic = %topic, bytes = payload.len(), "MQTT message queued");
                diagnostics::log(format!("MQTT message sent to topic {}", topic));
                PublishResult::Sent { code: SUCCESS_CODE }
            }
            Ok(Err(e)) => {
                self.mark_disconnected(&mut session);
                warn!(topic = %topic, error = %e, "MQTT publish failed");
                diagnostics::log(format!("MQTT publish failed: {}", e));
                PublishResult::Failed(e.to_string())
            }
            Err(_) => {
                self.mark_disconnected(&mut session);
                warn!(topic = %topic, "MQTT publish timed out");
                diagnostics::log("MQTT publish timed out");
                PublishResult::Failed("publish timed out".to_string())
            }
        }
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;

        if let Some(client) = session.client.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, client.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "MQTT disconnect request failed"),
                Err(_) => warn!("MQTT disconnect request timed out"),
            }
        }

        // 等 driver 把 DISCONNECT 发出去
        if let Some(mut driver) = session.driver.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                driver.abort();
            }
        }

        let was_connected = session.state == ConnectionState::Connected;
        session.teardown();
        self.settings.set_connected(false);
        if was_connected {
            info!("MQTT disconnected");
            diagnostics::log("MQTT disconnected");
        }
    }

    async fn is_connected(&self) -> bool {
        let mut session = self.session.lock().await;
        if session.state == ConnectionState::Connected && !session.is_live() {
            self.mark_disconnected(&mut session);
        }
        session.state == ConnectionState::Connected
    }
}

/// 等待 broker 的 ConnAck
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Refused(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        }
    }
}

/// 后台 driver：持续 poll，事件循环出错后由 rumqttc 在下一次 poll 时重连
async fn drive(mut eventloop: EventLoop, link_up: Arc<AtomicBool>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if !link_up.swap(true, Ordering::SeqCst) {
                            info!("MQTT link restored");
                            diagnostics::log("MQTT link restored");
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        link_up.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if link_up.swap(false, Ordering::SeqCst) {
                            warn!(error = %e, "MQTT link dropped");
                            diagnostics::log(format!("MQTT link dropped: {}", e));
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }
    }
    debug!("MQTT driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, StaticSettings};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn unreachable_transport(broker: &str, topic: &str) -> (MqttTransport, Arc<StaticSettings>) {
        let settings = Arc::new(StaticSettings::new(Settings {
            mqtt_connected: true,
            ..Settings::default()
        }));
        let config = TransportConfig {
            broker: broker.to_string(),
            topic: topic.to_string(),
            ..TransportConfig::default()
        };
        (MqttTransport::new(config, settings.clone()), settings)
    }

    /// 读取一个 MQTT 报文，返回固定头首字节和剩余部分
    async fn read_packet(socket: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = socket.read_u8().await.unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = socket.read_u8().await.unwrap();
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    /// 单连接的本地 broker：应答 CONNECT，收下一条 PUBLISH 后关闭
    async fn one_publish_broker() -> (u16, tokio::task::JoinHandle<(u8, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (header, _) = read_packet(&mut socket).await;
            assert_eq!(header & 0xf0, 0x10);
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            read_packet(&mut socket).await
        });
        (port, handle)
    }

    #[test]
    fn test_normalize_broker_scheme() {
        assert_eq!(normalize_broker_scheme("mqtt://broker:1883"), "tcp://broker:1883");
        assert_eq!(normalize_broker_scheme("tcp://broker:1883"), "tcp://broker:1883");
        assert_eq!(normalize_broker_scheme("broker:1883"), "broker:1883");
    }

    #[test]
    fn test_parse_broker() {
        assert_eq!(
            parse_broker("mqtt://broker.hivemq.com:1883").unwrap(),
            BrokerEndpoint { host: "broker.hivemq.com".to_string(), port: 1883 }
        );
        assert_eq!(parse_broker("tcp://10.0.0.5:2883").unwrap().port, 2883);
        assert_eq!(parse_broker("tcp://10.0.0.5").unwrap().port, 1883);
        assert_eq!(parse_broker(" 192.168.1.10:1884 ").unwrap().host, "192.168.1.10");
    }

    #[test]
    fn test_parse_broker_rejects_other_schemes() {
        assert!(matches!(parse_broker("ws://broker:8000"), Err(ConfigError::InvalidBroker(_))));
        assert!(matches!(parse_broker(""), Err(ConfigError::InvalidBroker(_))));
    }

    #[test]
    fn test_destination_uses_topic() {
        let (transport, _) = unreachable_transport("tcp://127.0.0.1:1", "pagos/yape");
        assert_eq!(transport.destination(), "MQTT: pagos/yape");
        assert_eq!(transport.name(), "mqtt");
    }

    #[tokio::test]
    async fn test_connect_refused_stays_disconnected() {
        let (transport, settings) = unreachable_transport("tcp://127.0.0.1:1", "checker/payments");

        assert!(!transport.connect().await);
        assert_eq!(transport.state().await, ConnectionState::Disconnected);
        assert!(!transport.is_connected().await);
        assert!(!settings.settings().mqtt_connected);
    }

    #[tokio::test]
    async fn test_empty_topic_fails_connect() {
        let (transport, _) = unreachable_transport("tcp://127.0.0.1:1", "  ");
        assert!(!transport.connect().await);
    }

    #[tokio::test]
    async fn test_empty_client_id_fails_connect() {
        let settings = Arc::new(StaticSettings::default());
        let config = TransportConfig {
            broker: "tcp://127.0.0.1:1".to_string(),
            client_id: String::new(),
            ..TransportConfig::default()
        };
        let transport = MqttTransport::new(config, settings.clone());

        assert!(!transport.connect().await);
        assert!(!transport.is_connected().await);
        assert!(!settings.settings().mqtt_connected);
    }

    #[tokio::test]
    async fn test_connect_publish_then_link_drop() {
        let (port, broker) = one_publish_broker().await;
        let settings = Arc::new(StaticSettings::default());
        let config = TransportConfig {
            broker: format!("tcp://127.0.0.1:{}", port),
            topic: "pagos/yape".to_string(),
            client_id: "relay-test".to_string(),
            ..TransportConfig::default()
        };
        let transport = MqttTransport::new(config, settings.clone());

        assert!(transport.connect().await);
        assert!(transport.is_connected().await);
        assert!(settings.settings().mqtt_connected);

        let payload = r#"{"title":"Yape"}"#;
        assert_eq!(transport.publish(payload).await, PublishResult::Sent { code: 200 });

        // QoS 0：主题长度 + 主题 + 负载，没有报文 id
        let (header, body) = broker.await.unwrap();
        assert_eq!(header, 0x30);
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        assert_eq!(&body[2..2 + topic_len], b"pagos/yape");
        assert_eq!(&body[2 + topic_len..], payload.as_bytes());

        // broker 已关闭，重连也会失败
        let mut connected = true;
        for _ in 0..50 {
            connected = transport.is_connected().await;
            if !connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!connected);
        assert!(!settings.settings().mqtt_connected);
    }

    #[tokio::test]
    async fn test_publish_without_broker_fails() {
        let (transport, _) = unreachable_transport("mqtt://127.0.0.1:1", "checker/payments");

        let result = transport.publish(r#"{"package":"x"}"#).await;
        assert!(!result.is_sent());
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let (transport, settings) = unreachable_transport("tcp://127.0.0.1:1", "t");
        transport.disconnect().await;
        assert_eq!(transport.state().await, ConnectionState::Disconnected);
        assert!(!settings.settings().mqtt_connected);
    }
}
