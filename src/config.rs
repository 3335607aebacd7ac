//! 配置 - 过滤策略、传输参数与日志开关
//!
//! 配置保存在 `~/.config/payment-relay/settings.json`，所有字段都有默认值，
//! 旧版本文件缺字段时也能正常加载。核心管线只读取配置，唯一的写入是连接后
//! 记录的 `mqtt_connected` 状态（仅供展示）。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid broker address '{0}'")]
    InvalidBroker(String),
    #[error("mqtt topic is empty")]
    EmptyTopic,
    #[error("mqtt client id is empty")]
    EmptyClientId,
}

/// 包名过滤配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// 是否启用包名白名单
    pub filter_enabled: bool,
    /// 白名单
    pub allowed_packages: BTreeSet<String>,
    /// 转发所有通知（不要求像付款通知）
    pub send_all: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_enabled: false,
            allowed_packages: BTreeSet::new(),
            send_all: true,
        }
    }
}

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// 持久 MQTT 连接
    #[default]
    Mqtt,
    /// 每条消息单独连接、发布、断开
    MqttOnce,
    /// 同步 HTTP POST
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportMode::Mqtt => "mqtt",
            TransportMode::MqttOnce => "mqtt-once",
            TransportMode::Http => "http",
        };
        write!(f, "{}", s)
    }
}

/// 传输配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// MQTT broker 地址，`mqtt://` 会被改写为 `tcp://`
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    /// HTTP 收集端地址
    pub server_host: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Mqtt,
            broker: "mqtt://broker.hivemq.com:1883".to_string(),
            topic: "checker/payments".to_string(),
            client_id: "payment-relay".to_string(),
            server_host: "http://localhost:4444".to_string(),
        }
    }
}

/// 全部配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub filter: FilterConfig,
    pub transport: TransportConfig,
    /// 诊断日志开关
    pub logging_enabled: bool,
    /// 最近一次连接结果（仅供展示）
    pub mqtt_connected: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            transport: TransportConfig::default(),
            logging_enabled: true,
            mqtt_connected: false,
        }
    }
}

/// 配置来源
pub trait SettingsSource: Send + Sync {
    /// 当前配置快照
    fn settings(&self) -> Settings;

    /// 记录连接状态
    fn set_connected(&self, connected: bool);
}

/// 配置目录 `~/.config/payment-relay`
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("payment-relay")
}

/// 基于 JSON 文件的配置
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认位置的配置文件
    pub fn default_location() -> Self {
        Self::new(config_dir().join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取配置，文件不存在时返回默认值
    pub fn load(&self) -> Result<Settings, ConfigError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// 原子写入配置（临时文件 + rename）
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(settings).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let temp = self.path.with_extension("tmp");
        fs::write(&temp, content).map_err(io_err)?;
        fs::rename(&temp, &self.path).map_err(io_err)?;
        Ok(())
    }

    /// 读取、修改并保存，整个过程持有 `settings.lock` 排他锁
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings, ConfigError> {
        use fs2::FileExt;

        let lock_path = self.path.with_extension("lock");
        let lock_err = |source| ConfigError::Io {
            path: lock_path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(lock_err)?;
        lock.lock_exclusive().map_err(lock_err)?;

        let mut settings = self.load()?;
        f(&mut settings);
        self.save(&settings)?;

        lock.unlock().map_err(lock_err)?;
        Ok(settings)
    }
}

impl SettingsSource for FileSettings {
    fn settings(&self) -> Settings {
        match self.load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                Settings::default()
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        if let Err(e) = self.update(|s| s.mqtt_connected = connected) {
            warn!(error = %e, "Failed to persist connection status");
        }
    }
}

/// 内存配置（测试和一次性命令使用）
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: Mutex<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Mutex::new(settings),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl SettingsSource for StaticSettings {
    fn settings(&self) -> Settings {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_connected(&self, connected: bool) {
        self.update(|s| s.mqtt_connected = connected);
    }
}
