// src/cli/bootstrap.rs
//! 组件装配 - 按配置创建传输、存储和分发器
//!
//! 所有命令共享同一个数据目录（默认 `~/.config/payment-relay`）：
//! `settings.json`、`sent.json`、`notifications.json`、`relay.log`、`relay.lock`。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{config_dir, FileSettings, SettingsSource, TransportConfig, TransportMode};
use crate::diagnostics::{self, LogBus};
use crate::relay::Dispatcher;
use crate::store::{NotificationArchive, SendHistory};
use crate::transport::build_transport;

/// 诊断日志文件名
pub const LOG_FILE: &str = "relay.log";

/// 命令运行环境
pub struct Bootstrap {
    data_dir: PathBuf,
    settings: Arc<FileSettings>,
}

impl Bootstrap {
    /// 默认数据目录
    pub fn new() -> Self {
        Self::with_data_dir(config_dir())
    }

    /// 指定数据目录（测试使用）
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let settings = Arc::new(FileSettings::new(data_dir.join("settings.json")));
        Self { data_dir, settings }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &Arc<FileSettings> {
        &self.settings
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// 按配置打开诊断日志，并镜像到 `relay.log`
    pub fn init_diagnostics(&self) {
        diagnostics::set_enabled(self.settings.settings().logging_enabled);
        LogBus::global().set_log_file(Some(self.log_file()));
    }

    /// 生效的传输配置（命令行参数覆盖配置文件）
    pub fn transport_config(&self, mode: Option<TransportMode>) -> TransportConfig {
        let mut config = self.settings.settings().transport;
        if let Some(mode) = mode {
            config.mode = mode;
        }
        config
    }

    pub fn open_history(&self) -> Result<SendHistory> {
        SendHistory::open_history(&self.data_dir)
            .with_context(|| format!("无法读取发送记录: {}", self.data_dir.display()))
    }

    pub fn open_archive(&self) -> Result<NotificationArchive> {
        NotificationArchive::open_archive(&self.data_dir)
            .with_context(|| format!("无法读取通知存档: {}", self.data_dir.display()))
    }

    /// 创建分发器
    pub fn dispatcher(&self, config: &TransportConfig) -> Result<Dispatcher> {
        let settings: Arc<dyn SettingsSource> = self.settings.clone();
        let transport = build_transport(config, settings.clone())?;

        Ok(Dispatcher::new(
            settings,
            transport,
            Arc::new(self.open_archive()?),
            Arc::new(self.open_history()?),
        ))
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}
