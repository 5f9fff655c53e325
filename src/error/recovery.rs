//! Exponential-backoff retry for `Service`/`Internal` errors.
//!
//! A single strategy, deliberately: `min(base * 2^(n-1), ceiling)`, with no
//! jitter, circuit-breaker, or fibonacci variants. The kernel retries
//! transient dependency failures; it does not need a strategy catalog to
//! do that.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use super::{ErrorKind, OrchestratorError};

/// Backoff knobs for the recovery manager.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound any computed delay is clamped to.
    pub ceiling: Duration,
    /// Hard cap on attempts (including the first). Exceeding it converts the
    /// error to a terminal `Service` failure wrapping the last cause.
    pub max_attempts: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            ceiling: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RecoveryPolicy {
    /// `min(base * 2^(n-1), ceiling)` for attempt `n` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let scaled = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        let scaled = Duration::from_secs_f64(scaled.max(0.0));
        scaled.min(self.ceiling)
    }
}

/// A cancellation signal the recovery loop observes between sleeps.
///
/// A plain `tokio::sync::Notify`-style boolean is enough for the kernel: the
/// façade and background tasks trip it from a `tokio::sync::watch` receiver.
#[async_trait::async_trait]
pub trait CancellationToken: Send + Sync {
    /// Resolves once cancellation has been requested, with the reason.
    async fn cancelled(&self) -> String;
}

/// Drives automatic retry of `Service`/`Internal` errors under exponential
/// backoff, keyed per operation id so concurrent callers don't share attempt
/// counters.
///
/// The manager MUST NOT hold the wrapping error beyond the retry window and
/// MUST reset the per-operation counter on success — both are implemented by
/// only ever reading/writing the counter entry for the duration of a single
/// `execute` call and removing it on any terminal outcome.
pub struct RecoveryManager {
    policy: RecoveryPolicy,
    attempts: RwLock<HashMap<String, u32>>,
    // Serializes attempt-counter mutation per operation id without holding
    // the map lock across an await.
    op_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecoveryManager {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            attempts: RwLock::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, op_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.op_locks.lock().await;
        locks
            .entry(op_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `op` to completion, retrying `Service`/`Internal` failures under
    /// backoff until `policy.max_attempts` is exhausted. Other error kinds
    /// (Validation, NotFound, InvalidState, Session) are surfaced on the
    /// first failure. `cancel.cancelled()` is raced against every sleep; a
    /// trip short-circuits the wait and returns the cancellation reason.
    pub async fn execute_with_recovery<F, Fut, T>(
        &self,
        op_id: &str,
        cancel: &dyn CancellationToken,
        mut op: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let op_lock = self.lock_for(op_id).await;
        let _guard = op_lock.lock().await;

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    self.attempts.write().await.remove(op_id);
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        self.attempts.write().await.remove(op_id);
                        return Err(err);
                    }

                    self.attempts.write().await.insert(op_id.to_string(), attempt);

                    if attempt >= self.policy.max_attempts {
                        self.attempts.write().await.remove(op_id);
                        return Err(OrchestratorError::new(
                            ErrorKind::Service,
                            format!(
                                "operation '{op_id}' exhausted {attempt} attempts: {}",
                                err.message
                            ),
                        )
                        .with_detail("operation_id", op_id));
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(operation = op_id, attempt, ?delay, "retrying after transient error");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        reason = cancel.cancelled() => {
                            self.attempts.write().await.remove(op_id);
                            return Err(OrchestratorError::new(
                                ErrorKind::Internal,
                                format!("operation '{op_id}' cancelled: {reason}"),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Current attempt count for an in-flight operation, if any.
    pub async fn attempts_for(&self, op_id: &str) -> Option<u32> {
        self.attempts.read().await.get(op_id).copied()
    }
}

/// A [`CancellationToken`] that never fires — used when a caller has no
/// cancellation source of its own.
pub struct NeverCancel;

#[async_trait::async_trait]
impl CancellationToken for NeverCancel {
    async fn cancelled(&self) -> String {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RecoveryPolicy {
            base_delay: Duration::from_millis(100),
            ceiling: Duration::from_secs(1),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        // clamps to ceiling
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_service_errors_and_succeeds() {
        let manager = RecoveryManager::new(RecoveryPolicy {
            base_delay: Duration::from_millis(1),
            ceiling: Duration::from_millis(10),
            max_attempts: 5,
        });

        let calls = AtomicU32::new(0);
        let result = manager
            .execute_with_recovery("op-1", &NeverCancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(OrchestratorError::service("not yet"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(manager.attempts_for("op-1").await, None);
    }

    #[tokio::test]
    async fn validation_errors_never_retry() {
        let manager = RecoveryManager::new(RecoveryPolicy::default());
        let calls = AtomicU32::new(0);

        let result = manager
            .execute_with_recovery("op-2", &NeverCancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(OrchestratorError::validation("bad input")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_attempts_converts_to_terminal_service_error() {
        let manager = RecoveryManager::new(RecoveryPolicy {
            base_delay: Duration::from_millis(1),
            ceiling: Duration::from_millis(5),
            max_attempts: 3,
        });

        let result: Result<(), _> = manager
            .execute_with_recovery("op-3", &NeverCancel, || async {
                Err(OrchestratorError::internal("boom"))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Service);
        assert_eq!(manager.attempts_for("op-3").await, None);
    }

    /// Fires cancellation after a fixed delay — long enough to land mid-sleep
    /// between retry attempts, short enough to keep the test fast.
    struct FireAfter(Duration);

    #[async_trait::async_trait]
    impl CancellationToken for FireAfter {
        async fn cancelled(&self) -> String {
            tokio::time::sleep(self.0).await;
            "deadline exceeded".to_string()
        }
    }

    #[tokio::test]
    async fn cancellation_mid_sleep_short_circuits_the_backoff_wait() {
        let manager = RecoveryManager::new(RecoveryPolicy {
            base_delay: Duration::from_secs(10),
            ceiling: Duration::from_secs(30),
            max_attempts: 10,
        });
        let cancel = FireAfter(Duration::from_millis(5));

        let start = std::time::Instant::now();
        let result: Result<(), _> = manager
            .execute_with_recovery("op-4", &cancel, || async {
                Err(OrchestratorError::service("still failing"))
            })
            .await;

        // The 10s base delay never elapses; cancellation wins the race.
        assert!(start.elapsed() < Duration::from_secs(1));
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.message.contains("cancelled"));
        assert_eq!(manager.attempts_for("op-4").await, None);
    }
}
