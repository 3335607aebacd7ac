//! 事件分发器 - 单条通知的完整处理流程
//!
//! 按顺序执行，任一步不满足即短路：
//! 1. 存档原始通知（无条件）
//! 2. 包名过滤
//! 3. 是否需要发送（高优先级 / 全部转发 / 像付款通知）
//! 4. 选择正文（扩展文本优先）
//! 5. 规范化标题和正文，空正文丢弃
//! 6. 去重（key 用规范化之前的原始文本）
//! 7. 构造出站 JSON
//! 8. 发布，成功后写发送记录；失败不重放该事件
//!
//! `handle` 是管线边界：所有错误在这里记录，不向通知源传播。

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::classifier::classify;
use super::dedup::DedupCache;
use super::filter::should_consider;
use super::normalizer::normalize;
use crate::clock::{Clock, SystemClock};
use crate::config::SettingsSource;
use crate::diagnostics::LogBus;
use crate::event::{NotificationEvent, OutboundMessage};
use crate::store::{NotificationArchive, SendHistory, SentRecord};
use crate::transport::{PublishResult, Transport};

/// 管线步骤（用于错误上下文）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Archive,
    Encode,
    Record,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::Archive => "archive",
            Step::Encode => "encode",
            Step::Record => "record",
        };
        write!(f, "{}", s)
    }
}

/// 管线内部错误
#[derive(Debug, Error)]
#[error("{step} step failed: {source}")]
pub struct PipelineError {
    pub step: Step,
    #[source]
    pub source: anyhow::Error,
}

impl PipelineError {
    fn at(step: Step, source: impl Into<anyhow::Error>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

/// 单条通知的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// 已发送并记录
    Sent { code: u16 },
    /// 包名不在白名单
    Filtered,
    /// 不像付款通知且未开启全部转发
    NotPayment,
    /// 规范化后正文为空
    BlankPayload,
    /// 窗口内重复
    Duplicate,
    /// 传输失败（不记录、不重试）
    PublishFailed(String),
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Sent { .. } => "sent",
            Disposition::Filtered => "filtered",
            Disposition::NotPayment => "not-payment",
            Disposition::BlankPayload => "blank-payload",
            Disposition::Duplicate => "duplicate",
            Disposition::PublishFailed(_) => "publish-failed",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 事件分发器
pub struct Dispatcher {
    settings: Arc<dyn SettingsSource>,
    transport: Arc<dyn Transport>,
    archive: Arc<NotificationArchive>,
    history: Arc<SendHistory>,
    /// 清理、查询、插入在同一个临界区内完成
    dedup: Mutex<DedupCache>,
    clock: Arc<dyn Clock>,
    diag: &'static LogBus,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        transport: Arc<dyn Transport>,
        archive: Arc<NotificationArchive>,
        history: Arc<SendHistory>,
    ) -> Self {
        Self {
            settings,
            transport,
            archive,
            history,
            dedup: Mutex::new(DedupCache::new()),
            clock: Arc::new(SystemClock),
            diag: LogBus::global(),
        }
    }

    /// 注入时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 替换去重缓存（自定义窗口/容量）
    pub fn with_dedup(mut self, cache: DedupCache) -> Self {
        self.dedup = Mutex::new(cache);
        self
    }

    /// 替换诊断日志总线（默认全局实例）
    pub fn with_log_bus(mut self, bus: &'static LogBus) -> Self {
        self.diag = bus;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn history(&self) -> &Arc<SendHistory> {
        &self.history
    }

    pub fn archive(&self) -> &Arc<NotificationArchive> {
        &self.archive
    }

    /// 处理一条通知，错误只记录不传播
    pub async fn handle(&self, event: &NotificationEvent) -> Option<Disposition> {
        match self.process(event).await {
            Ok(disposition) => {
                debug!(
                    package = %event.package,
                    disposition = %disposition,
                    "Notification processed"
                );
                Some(disposition)
            }
            Err(e) => {
                error!(
                    package = %event.package,
                    step = %e.step,
                    error = %e.source,
                    "Pipeline failed"
                );
                self.note(format!(
                    "Error processing notification from {} at {} step: {}",
                    event.package, e.step, e.source
                ));
                None
            }
        }
    }

    /// 执行完整管线
    pub async fn process(&self, event: &NotificationEvent) -> Result<Disposition, PipelineError> {
        // 每条事件重新读取配置，日志开关先于第一行日志生效
        let settings = self.settings.settings();
        self.diag.set_enabled(settings.logging_enabled);
        self.note(format!("Notification received from {}", event.package));

        // 1. 存档与转发决策无关
        self.archive
            .add(event.clone())
            .map_err(|e| PipelineError::at(Step::Archive, e))?;
        self.note(format!("Stored notification from {}", event.package));

        // 2. 包名过滤
        if !should_consider(&event.package, &settings.filter) {
            self.note(format!("Package not allowed, not sending: {}", event.package));
            return Ok(Disposition::Filtered);
        }

        // 3. 发送决策
        let classification = classify(event);
        if !classification.should_send(settings.filter.send_all) {
            self.note("Notification does not meet sending criteria");
            return Ok(Disposition::NotPayment);
        }
        if classification.is_high_priority {
            info!(package = %event.package, "High priority notification, forwarding");
            self.note(format!("Priority notification from {}, sending", event.package));
        }

        // 4-5. 正文选择与规范化
        let raw_payload = event.payload_text();
        let text = normalize(raw_payload);
        if text.trim().is_empty() {
            self.note("Notification has no usable text, not sending");
            return Ok(Disposition::BlankPayload);
        }
        let title = normalize(&event.title);

        // 6. 去重
        let key = DedupCache::key(&event.package, &event.title, raw_payload);
        let now = self.clock.now_millis();
        let duplicate = {
            let mut cache = self.dedup.lock().unwrap_or_else(|e| e.into_inner());
            cache.is_duplicate(&key, now)
        };
        if duplicate {
            self.note(format!("Duplicate notification ignored for {}", event.package));
            return Ok(Disposition::Duplicate);
        }

        // 7. 出站消息
        let message = OutboundMessage {
            package: event.package.clone(),
            title,
            text,
            post_time: event.post_time,
        };
        let json = message
            .to_json()
            .map_err(|e| PipelineError::at(Step::Encode, e))?;
        self.note(format!(
            "Sending - title: '{}', text: '{}'",
            message.title, message.text
        ));

        // 8. 发布
        match self.transport.publish(&json).await {
            PublishResult::Sent { code } => {
                self.history
                    .add(SentRecord {
                        text: json,
                        url: self.transport.destination(),
                        code,
                        time: self.clock.now_millis(),
                    })
                    .map_err(|e| PipelineError::at(Step::Record, e))?;
                info!(
                    package = %event.package,
                    transport = self.transport.name(),
                    code,
                    "Payment notification forwarded"
                );
                self.note(format!("Forwarded via {}", self.transport.name()));
                Ok(Disposition::Sent { code })
            }
            PublishResult::Failed(reason) => {
                warn!(
                    package = %event.package,
                    transport = self.transport.name(),
                    reason = %reason,
                    "Failed to forward notification"
                );
                self.note(format!("Error sending via {}: {}", self.transport.name(), reason));
                Ok(Disposition::PublishFailed(reason))
            }
        }
    }
}

impl Dispatcher {
    fn note(&self, message: impl AsRef<str>) {
        self.diag.log(message.as_ref());
    }
}
