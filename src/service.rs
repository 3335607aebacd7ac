//! 转发服务 - 工作池、保活监督与单实例锁
//!
//! 每条通知在独立任务中处理，并发数由信号量限制。单个任务 panic 只记录日志，
//! 不影响其它通知和服务本身。`shutdown` 依次停止保活循环、等待在途任务
//! （超时后中止）、断开传输并释放实例锁。

use anyhow::{anyhow, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::diagnostics;
use crate::event::NotificationEvent;
use crate::relay::Dispatcher;
use crate::transport::{KeepAlive, RetryPolicy, Transport};

/// 默认并发处理数
pub const DEFAULT_WORKERS: usize = 8;
/// 关闭时等待在途任务的时间
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// 服务参数
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub workers: usize,
    pub shutdown_grace: Duration,
    /// 是否运行保活循环（仅持久连接需要）
    pub keep_alive: bool,
    pub keep_alive_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            shutdown_grace: SHUTDOWN_GRACE,
            keep_alive: true,
            keep_alive_interval: crate::transport::supervisor::CHECK_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// 单实例锁（`<data dir>/relay.lock`）
///
/// 持有期间其它进程无法启动服务，drop 时释放。
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| anyhow!("relay service already running (lock: {})", path.display()))?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self { file, path })
    }

    /// 默认锁文件位置
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("relay.lock")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// 转发服务
pub struct RelayService {
    dispatcher: Arc<Dispatcher>,
    keep_alive: KeepAlive,
    options: ServiceOptions,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    /// 停止保活循环与新任务
    cancel: CancellationToken,
    /// 宽限期结束后中止在途任务
    abort: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    lock: Mutex<Option<InstanceLock>>,
}

impl RelayService {
    pub fn new(dispatcher: Arc<Dispatcher>, options: ServiceOptions) -> Self {
        let keep_alive = KeepAlive::new(dispatcher.transport().clone())
            .with_interval(options.keep_alive_interval)
            .with_retry_policy(options.retry_policy);

        Self {
            dispatcher,
            keep_alive,
            permits: Arc::new(Semaphore::new(options.workers.max(1))),
            options,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
            supervisor: Mutex::new(None),
            lock: Mutex::new(None),
        }
    }

    /// 服务运行期间持有实例锁
    pub fn with_instance_lock(self, lock: InstanceLock) -> Self {
        *self.lock.lock().unwrap_or_else(|e| e.into_inner()) = Some(lock);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.dispatcher.transport()
    }

    /// 启动保活循环（如已启用）
    pub fn start(&self) {
        info!(
            transport = self.transport().name(),
            destination = %self.transport().destination(),
            workers = self.options.workers,
            "Relay service starting"
        );
        diagnostics::log(format!("Relay service started ({})", self.transport().name()));

        if !self.options.keep_alive {
            return;
        }
        if let Some(handle) = self.keep_alive.spawn(self.cancel.clone()) {
            *self.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }
    }

    pub fn is_supervising(&self) -> bool {
        self.keep_alive.is_running()
    }

    /// 提交一条通知，立即返回；服务关闭后返回 false
    pub fn submit(&self, event: NotificationEvent) -> bool {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            warn!(package = %event.package, "Relay service stopped, notification dropped");
            return false;
        }

        let dispatcher = self.dispatcher.clone();
        let permits = self.permits.clone();
        let abort = self.abort.clone();

        self.tracker.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let package = event.package.clone();
            // 内层任务隔离 panic
            let mut worker = tokio::spawn(async move {
                dispatcher.handle(&event).await;
            });

            tokio::select! {
                result = &mut worker => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(package = %package, "Notification worker panicked");
                            diagnostics::log(format!(
                                "Worker crashed while processing {}",
                                package
                            ));
                        }
                    }
                }
                _ = abort.cancelled() => {
                    worker.abort();
                    warn!(package = %package, "Notification worker aborted on shutdown");
                }
            }
        });
        true
    }

    /// 在途任务数
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 停止服务
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let supervisor = self.supervisor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                warn!(error = %e, "Keep-alive task ended abnormally");
            }
        }

        self.tracker.close();
        if tokio::time::timeout(self.options.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.tracker.len(),
                "Workers still running after grace period, aborting"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }

        self.transport().disconnect().await;

        let lock = self.lock.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(lock);

        info!("Relay service stopped");
        diagnostics::log("Relay service stopped");
    }
}
