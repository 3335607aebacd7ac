//! 通知去重缓存 - 短时间内相同内容只转发一次
//!
//! 平台经常在几秒内重复投递同一条通知（更新、重新展开等）。
//!
//! ## 去重策略
//! 1. key = `package|title|payload`（规范化之前的原始文本）
//! 2. 60 秒时间窗口，每次查询前先清理过期记录
//! 3. 最多保留 200 个 key，超出时淘汰最久未访问的记录
//!
//! 缓存本身不加锁，由调用方（Dispatcher）在同一个临界区内完成整次检查。

use std::collections::HashMap;

/// 默认去重窗口（毫秒）
pub const DEFAULT_WINDOW_MS: i64 = 60_000;
/// 默认容量
pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_seen: i64,
    /// 访问序号，越小越久未访问
    touched: u64,
}

/// 带时间窗口和 LRU 淘汰的去重缓存
#[derive(Debug)]
pub struct DedupCache {
    entries: HashMap<String, Entry>,
    window_ms: i64,
    capacity: usize,
    tick: u64,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    /// 创建默认 60 秒窗口、200 容量的缓存
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WINDOW_MS, DEFAULT_CAPACITY)
    }

    /// 指定窗口和容量
    pub fn with_limits(window_ms: i64, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            window_ms,
            capacity: capacity.max(1),
            tick: 0,
        }
    }

    /// 生成去重 key
    pub fn key(package: &str, title: &str, payload: &str) -> String {
        format!("{}|{}|{}", package, title, payload)
    }

    /// 检查是否重复
    ///
    /// 返回 `true` 表示窗口内已见过（缓存不更新时间），`false` 表示首次出现并已记录
    pub fn is_duplicate(&mut self, key: &str, observed_at: i64) -> bool {
        self.prune(observed_at);
        self.tick += 1;
        let tick = self.tick;

        if let Some(entry) = self.entries.get_mut(key) {
            if observed_at - entry.last_seen <= self.window_ms {
                entry.touched = tick;
                return true;
            }
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                last_seen: observed_at,
                touched: tick,
            },
        );
        false
    }

    /// 当前记录数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: i64) {
        let window = self.window_ms;
        self.entries.retain(|_, e| now - e.last_seen <= window);
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.touched)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
