//! Cancellation and deadlines for async calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason a call was aborted before it produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Per-call context carrying a cancellation token and an optional deadline.
///
/// Repository and publisher calls are wrapped with [`CallContext::run`]. An
/// aborted call drops the inner future, so an in-flight storage transaction is
/// rolled back rather than partially committed.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets the deadline, keeping the earlier one if a deadline is already set.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// A context cancelled together with this one but which can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runs `fut` unless the context is cancelled or its deadline passes first.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Interrupted::DeadlineExceeded.into());
        }

        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Interrupted::Cancelled.into()),
            () = expiry => Err(Interrupted::DeadlineExceeded.into()),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Interrupted(Interrupted),
    }

    impl From<Interrupted> for TestError {
        fn from(e: Interrupted) -> Self {
            TestError::Interrupted(e)
        }
    }

    #[tokio::test]
    async fn completes_when_not_interrupted() {
        let ctx = CallContext::new();
        let result: Result<u32, TestError> = ctx.run(async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = CallContext::new();
        ctx.cancel();
        let result: Result<u32, TestError> = ctx.run(async { Ok(1) }).await;
        assert_eq!(result, Err(TestError::Interrupted(Interrupted::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = CallContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_slow_future() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let result: Result<(), TestError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert_eq!(
            result,
            Err(TestError::Interrupted(Interrupted::DeadlineExceeded))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }
}
