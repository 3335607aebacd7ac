//! Payment Relay - 把手机付款通知转发到 MQTT broker 或 HTTP 收集端

pub mod cli;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod event;
pub mod relay;
pub mod service;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, FileSettings, FilterConfig, Settings, SettingsSource, StaticSettings,
    TransportConfig, TransportMode,
};
pub use diagnostics::LogBus;
pub use event::{NotificationEvent, OutboundMessage};
pub use relay::{Disposition, Dispatcher, PipelineError};
pub use service::{InstanceLock, RelayService, ServiceOptions};
pub use store::{NotificationArchive, SendHistory, SentRecord};
pub use transport::{
    build_transport, ConnectionState, HttpTransport, KeepAlive, MqttTransport, OneShot,
    PublishResult, Transport, TransportError,
};
