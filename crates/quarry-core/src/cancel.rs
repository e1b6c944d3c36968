//! Cancellation and deadlines for backend round trips.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{BackendError, Error};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every request holding this token.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-request cancellation token and deadline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keep the earlier of the current deadline and `timeout` from now.
    pub(crate) fn bounded_by(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            let limit = Instant::now() + timeout;
            self.deadline = Some(self.deadline.map_or(limit, |d| d.min(limit)));
        }
        self
    }

    /// Run one backend round trip for `stage`.
    ///
    /// Fails without polling `round_trip` if the token is already cancelled,
    /// and interrupts it when the token fires or the deadline passes.
    pub async fn run<T, F>(&self, stage: &str, round_trip: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                stage: stage.to_string(),
            });
        }

        let guarded = async {
            tokio::select! {
                result = round_trip => result.map_err(|source| Error::Backend {
                    stage: stage.to_string(),
                    source,
                }),
                _ = self.cancel.cancelled() => Err(Error::Cancelled {
                    stage: stage.to_string(),
                }),
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::DeadlineExceeded {
                        stage: stage.to_string(),
                    })
                }),
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_before_round_trip() {
        let ctx = RequestContext::new();
        ctx.cancel.cancel();
        let err = ctx
            .run("primary", async { Ok::<_, BackendError>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { ref stage } if stage == "primary"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_round_trip() {
        let ctx = RequestContext::new();
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = ctx
            .run("hydrate images", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(5));
        let err = ctx
            .run("primary", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn test_backend_error_keeps_source() {
        let ctx = RequestContext::new();
        let err = ctx
            .run("primary", async { Err::<(), BackendError>("socket closed".into()) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backend error during primary: socket closed");
    }
}
