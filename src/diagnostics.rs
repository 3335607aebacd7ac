//! 诊断日志总线
//!
//! 管线每个关键步骤写一行人类可读的日志，供 `payrelay logs` 查看：
//! - 开关（`set_enabled`），关闭后 `log` 直接返回
//! - 内存保留最近 200 行
//! - 可选镜像到日志文件
//! - 同时作为 `tracing` 事件输出
//!
//! 写日志失败永远不会影响调用方。

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

/// 内存中保留的行数
pub const REPLAY_LINES: usize = 200;

static GLOBAL: OnceLock<LogBus> = OnceLock::new();

/// 打开或关闭全局日志总线
pub fn set_enabled(enabled: bool) {
    LogBus::global().set_enabled(enabled);
}

pub fn is_enabled() -> bool {
    LogBus::global().is_enabled()
}

/// 写一行到全局日志总线
pub fn log(message: impl AsRef<str>) {
    LogBus::global().log(message.as_ref());
}

/// 日志总线
#[derive(Debug)]
pub struct LogBus {
    enabled: AtomicBool,
    lines: Mutex<VecDeque<String>>,
    file: Mutex<Option<PathBuf>>,
}

impl Default for LogBus {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            lines: Mutex::new(VecDeque::new()),
            file: Mutex::new(None),
        }
    }
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// 进程级实例
    pub fn global() -> &'static LogBus {
        GLOBAL.get_or_init(LogBus::new)
    }

    /// 镜像写入到文件（`None` 关闭镜像）
    pub fn set_log_file(&self, path: Option<PathBuf>) {
        if let Ok(mut file) = self.file.lock() {
            *file = path;
        }
    }

    /// 写一行日志
    pub fn log(&self, message: &str) {
        if !self.is_enabled() {
            return;
        }

        tracing::info!(target: "payment_relay::diag", "{}", message);

        let line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);

        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() >= REPLAY_LINES {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }

        let path = match self.file.lock() {
            Ok(file) => file.clone(),
            Err(_) => None,
        };
        if let Some(path) = path {
            let _ = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| writeln!(f, "{}", line));
        }
    }

    /// 最近的日志行（从旧到新）
    pub fn recent(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

/// 读取日志文件最后 `n` 行
pub fn tail_file(path: &std::path::Path, n: usize) -> std::io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let mut lines: Vec<String> = content.lines().rev().take(n).map(|l| l.to_string()).collect();
    lines.reverse();
    Ok(lines)
}
