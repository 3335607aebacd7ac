//! 本地存储 - 发送记录与通知存档
//!
//! 两者都是"最新在前"的有界列表，超出上限时丢弃最旧的记录：
//! - `SendHistory`：成功转发的记录，最多 100 条
//! - `NotificationArchive`：收到的原始通知，最多 500 条
//!
//! 带路径打开时每次写入都会整体重写 JSON 文件（文件锁 + 临时文件原子替换）。

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::event::NotificationEvent;

/// 发送记录上限
pub const MAX_SENT_RECORDS: usize = 100;
/// 通知存档上限
pub const MAX_ARCHIVED_NOTIFICATIONS: usize = 500;

/// 发送记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    /// 已发送的 JSON 载荷
    pub text: String,
    /// 目的地描述（`MQTT: <topic>` 或 URL）
    pub url: String,
    /// 成功标记 / HTTP 状态码
    pub code: u16,
    /// 记录时间（epoch 毫秒）
    pub time: i64,
}

/// 最新在前的有界列表
pub struct BoundedStore<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl<T> BoundedStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// 纯内存存储
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            path: None,
        }
    }

    /// 打开文件存储，文件不存在时为空
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let mut items: VecDeque<T> = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                VecDeque::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            VecDeque::new()
        };
        items.truncate(capacity);

        Ok(Self {
            items: Mutex::new(items),
            capacity,
            path: Some(path),
        })
    }

    /// 插入到最前面，超出上限时丢弃最旧的
    pub fn add(&self, item: T) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.push_front(item);
        items.truncate(self.capacity);
        self.persist(&items)
    }

    /// 全部记录（最新在前）
    pub fn get_all(&self) -> Vec<T> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.iter().cloned().collect()
    }

    pub fn clear(&self) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.clear();
        self.persist(&items)
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self, items: &VecDeque<T>) -> Result<()> {
        use fs2::FileExt;

        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // 锁文件与数据文件分开，rename 后锁仍然有效
        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new().create(true).write(true).open(&lock_path)?;
        lock.lock_exclusive()?;

        let temp_path = path.with_extension("tmp");
        {
            let mut temp = File::create(&temp_path)?;
            let json = serde_json::to_string(items)?;
            temp.write_all(json.as_bytes())?;
        }
        fs::rename(&temp_path, path)?;

        lock.unlock()?;
        Ok(())
    }
}

/// 发送记录
pub type SendHistory = BoundedStore<SentRecord>;
/// 通知存档
pub type NotificationArchive = BoundedStore<NotificationEvent>;

impl BoundedStore<SentRecord> {
    pub fn history_in_memory() -> Self {
        Self::in_memory(MAX_SENT_RECORDS)
    }

    /// 默认位置 `~/.config/payment-relay/sent.json`
    pub fn open_history(dir: &Path) -> Result<Self> {
        Self::open(dir.join("sent.json"), MAX_SENT_RECORDS)
    }
}

impl BoundedStore<NotificationEvent> {
    pub fn archive_in_memory() -> Self {
        Self::in_memory(MAX_ARCHIVED_NOTIFICATIONS)
    }

    /// 默认位置 `~/.config/payment-relay/notifications.json`
    pub fn open_archive(dir: &Path) -> Result<Self> {
        Self::open(dir.join("notifications.json"), MAX_ARCHIVED_NOTIFICATIONS)
    }
}
