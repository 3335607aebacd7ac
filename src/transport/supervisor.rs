//! Keep-alive supervisor for the persistent transport
//!
//! Independent of individual events, the supervisor:
//! 1. connects at startup with a bounded retry sequence
//! 2. wakes every 30 seconds and checks `is_connected`
//! 3. re-runs the retry sequence when the connection has dropped
//!
//! Only one loop may run per `KeepAlive`; a second `spawn` is refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Transport;
use crate::diagnostics;

/// Default supervisor wake-up period
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded retry policy for (re)connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum connect attempts per sequence
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Try to connect up to `policy.max_attempts` times.
///
/// Returns early on success; the cancellation token interrupts the wait
/// between attempts.
pub async fn connect_with_retry(
    transport: &dyn Transport,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        if transport.connect().await {
            info!(transport = transport.name(), attempt, "Transport connected");
            diagnostics::log(format!("Connected after {} attempt(s)", attempt));
            return true;
        }

        debug!(transport = transport.name(), attempt, "Connect attempt failed");
        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    warn!(
        transport = transport.name(),
        attempts = policy.max_attempts,
        "Giving up connecting until next keep-alive check"
    );
    diagnostics::log(format!(
        "Could not connect after {} attempts",
        policy.max_attempts
    ));
    false
}

/// Keep-alive loop owner
pub struct KeepAlive {
    transport: Arc<dyn Transport>,
    interval: Duration,
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when the loop exits on any path
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl KeepAlive {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            interval: CHECK_INTERVAL,
            policy: RetryPolicy::default(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the loop. Returns `None` if a loop from this supervisor is
    /// already running.
    pub fn spawn(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Keep-alive loop already running");
            return None;
        }

        let guard = RunningGuard(self.running.clone());
        let transport = self.transport.clone();
        let interval = self.interval;
        let policy = self.policy;

        Some(tokio::spawn(async move {
            let _guard = guard;
            run_loop(transport, interval, policy, cancel).await;
        }))
    }
}

async fn run_loop(
    transport: Arc<dyn Transport>,
    interval: Duration,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    connect_with_retry(transport.as_ref(), policy, &cancel).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if transport.is_connected().await {
            debug!(transport = transport.name(), "Keep-alive: connection healthy");
            diagnostics::log("Keep-alive: connection active");
        } else {
            warn!(transport = transport.name(), "Keep-alive: connection lost, reconnecting");
            diagnostics::log("Keep-alive: disconnected, reconnecting");
            connect_with_retry(transport.as_ref(), policy, &cancel).await;
        }
    }

    info!(transport = transport.name(), "Keep-alive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PublishResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Transport whose first `fail_first` connects fail
    struct FlakyTransport {
        fail_first: u32,
        attempts: AtomicU32,
        connected: AtomicBool,
    }

    impl FlakyTransport {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                attempts: AtomicU32::new(0),
                connected: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn name(&self) -> &str {
            "flaky"
        }

        fn destination(&self) -> String {
            "flaky".to_string()
        }

        async fn connect(&self) -> bool {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let ok = n > self.fail_first;
            self.connected.store(ok, Ordering::SeqCst);
            ok
        }

        async fn publish(&self, _payload: &str) -> PublishResult {
            PublishResult::Failed("unused".to_string())
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_succeeds_after_failures() {
        let transport = FlakyTransport::new(2);
        let cancel = CancellationToken::new();
        let ok = connect_with_retry(&transport, RetryPolicy::default(), &cancel).await;
        assert!(ok);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_respects_attempt_cap() {
        let transport = FlakyTransport::new(u32::MAX);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        };
        assert!(!connect_with_retry(&transport, policy, &CancellationToken::new()).await);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reconnects_after_drop() {
        let transport = Arc::new(FlakyTransport::new(0));
        let keep_alive = KeepAlive::new(transport.clone());
        let cancel = CancellationToken::new();
        let handle = keep_alive.spawn(cancel.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(transport.is_connected().await);

        // 模拟断线
        transport.disconnect().await;
        tokio::time::sleep(CHECK_INTERVAL + Duration::from_secs(1)).await;
        assert!(transport.is_connected().await);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
        assert!(!keep_alive.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_refuses_duplicate_loop() {
        let keep_alive = KeepAlive::new(Arc::new(FlakyTransport::new(0)));
        let cancel = CancellationToken::new();

        let first = keep_alive.spawn(cancel.clone());
        assert!(first.is_some());
        assert!(keep_alive.spawn(cancel.clone()).is_none());

        cancel.cancel();
        first.unwrap().await.unwrap();

        // 旧循环退出后可以重新启动
        let again = keep_alive.spawn(cancel.clone());
        assert!(again.is_some());
        again.unwrap().await.unwrap();
    }
}
