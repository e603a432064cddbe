//! Timeout and retry policy for collaborator calls.
//!
//! Model calls go through [`CallPolicy::call`]. With a timeout set, the call
//! runs on its own thread and the caller waits on a channel; when the wait
//! elapses the caller gets [`KbError::CollaboratorTimeout`] and the worker
//! thread is left to finish on its own, its result discarded. Nothing the
//! worker computes after the deadline reaches the store.
//!
//! Retryable failures are repeated with exponential backoff
//! (`initial_backoff * 2^(attempt-1)`, exponent capped at 5).

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::config::CollaboratorsConfig;
use crate::errors::{KbError, KbResult};

/// Largest backoff exponent.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// How collaborator calls are bounded and retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPolicy {
    /// Per-attempt deadline. `None` runs the call inline with no deadline.
    pub timeout: Option<Duration>,
    /// Extra attempts after the first for retryable failures.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&CollaboratorsConfig::default())
    }
}

impl CallPolicy {
    /// Build from the `collaborators` config section.
    pub fn from_config(config: &CollaboratorsConfig) -> Self {
        Self {
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Single inline attempt, no deadline.
    pub fn immediate() -> Self {
        Self {
            timeout: None,
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }

    /// Run `op` under this policy.
    pub fn call<T, F>(&self, collaborator: &str, op: F) -> KbResult<T>
    where
        T: Send + 'static,
        F: Fn() -> KbResult<T> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                trace!("{} retry {} after {:?}", collaborator, attempt, delay);
                thread::sleep(delay);
            }

            match self.attempt(collaborator, Arc::clone(&op)) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        collaborator,
                        attempt + 1,
                        self.max_retries + 1,
                        err
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt<T, F>(&self, collaborator: &str, op: Arc<F>) -> KbResult<T>
    where
        T: Send + 'static,
        F: Fn() -> KbResult<T> + Send + Sync + 'static,
    {
        let Some(timeout) = self.timeout else {
            return (*op)();
        };

        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(format!("kbsync-{}", collaborator))
            .spawn(move || {
                // The receiver is gone if the caller already timed out
                let _ = tx.send((*op)());
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(KbError::CollaboratorTimeout {
                collaborator: collaborator.to_string(),
                after: timeout,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(KbError::collaborator(
                collaborator,
                "call panicked before returning",
                false,
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = CallPolicy::immediate().with_retries(10, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(6), Duration::from_millis(3200));
        assert_eq!(policy.backoff(9), Duration::from_millis(3200));
    }

    #[test]
    fn test_from_config_zero_timeout_disables() {
        let config = CollaboratorsConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(CallPolicy::from_config(&config).timeout, None);
    }

    #[test]
    fn test_retries_retryable_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = CallPolicy::immediate().with_retries(2, Duration::ZERO);

        let result = policy.call("embedder", move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(KbError::transport("embedder", "refused"))
            } else {
                Ok(7)
            }
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_does_not_retry_permanent_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = CallPolicy::immediate().with_retries(3, Duration::ZERO);

        let result: KbResult<()> = policy.call("embedder", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(KbError::collaborator("embedder", "bad request", false))
        });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let policy = CallPolicy::immediate().with_retries(1, Duration::ZERO);

        let result: KbResult<()> = policy.call("summarizer", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(KbError::transport("summarizer", "refused"))
        });

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timeout() {
        let policy = CallPolicy::immediate().with_timeout(Duration::from_millis(50));
        let result: KbResult<()> = policy.call("embedder", || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert!(matches!(
            result,
            Err(KbError::CollaboratorTimeout { .. })
        ));
    }

    #[test]
    fn test_fast_call_under_timeout() {
        let policy = CallPolicy::immediate().with_timeout(Duration::from_secs(5));
        let value = policy.call("embedder", || Ok("done".to_string())).unwrap();
        assert_eq!(value, "done");
    }
}
