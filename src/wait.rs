//! Bounded, cancellable polling.
//!
//! Readiness checks retry at a fixed interval for a fixed number of attempts.
//! A [`WaitContext`] lets the caller abandon the wait early, either through a
//! [`CancelHandle`] or an absolute deadline.

use std::future::{Future, pending};
use std::time::Duration;

use thiserror::Error;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Attempts and interval used for both readiness phases.
pub const READINESS_POLICY: PollPolicy = PollPolicy::new(60, Duration::from_secs(10));

/// Reasons a wait ended without a result.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// Every attempt ran without producing a result.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// The wait was cancelled through its [`CancelHandle`].
    #[error("wait cancelled")]
    Cancelled,
    /// The wait context deadline passed.
    #[error("wait deadline exceeded")]
    DeadlineExceeded,
}

/// Fixed-interval retry budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of attempts.
    pub attempts: u32,
    /// Pause between consecutive attempts.
    pub interval: Duration,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Fires the paired [`CancelToken`]s.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels every wait observing the paired token. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observes cancellation requested through a [`CancelHandle`].
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns a token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                pending::<()>().await;
            }
        }
    }
}

/// Creates a linked cancel handle and token.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelToken { receiver })
}

/// Cancellation and deadline shared by every wait in one operation.
#[derive(Clone, Debug)]
pub struct WaitContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Default for WaitContext {
    fn default() -> Self {
        Self::new(CancelToken::never())
    }
}

impl WaitContext {
    /// Creates a context without a deadline.
    #[must_use]
    pub const fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Adds an absolute deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..self
        }
    }

    /// Fails fast when the context is already cancelled or expired.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Cancelled`] or [`WaitError::DeadlineExceeded`].
    pub fn check(&self) -> Result<(), WaitError> {
        if self.cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(WaitError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleeps for `interval`, waking early on cancellation or at the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Cancelled`] or [`WaitError::DeadlineExceeded`]
    /// when the sleep is cut short.
    pub async fn pause(&self, interval: Duration) -> Result<(), WaitError> {
        self.check()?;
        let wake = Instant::now() + interval;
        let clipped = self.deadline.filter(|deadline| *deadline < wake);

        select! {
            () = sleep_until(clipped.unwrap_or(wake)) => {}
            () = self.cancel.cancelled() => return Err(WaitError::Cancelled),
        }

        if clipped.is_some() {
            return Err(WaitError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `fut` until it completes, cancellation arrives, or the deadline
    /// passes. A future that loses the race is dropped mid-flight.
    async fn race<T>(&self, fut: impl Future<Output = T>) -> Result<T, WaitError> {
        let expiry = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        select! {
            value = fut => Ok(value),
            () = self.cancel.cancelled() => Err(WaitError::Cancelled),
            () = expiry => Err(WaitError::DeadlineExceeded),
        }
    }
}

/// Calls `attempt` with a 1-based attempt number until it yields `Some`,
/// pausing `policy.interval` between attempts. No pause follows the final
/// attempt.
///
/// # Errors
///
/// Returns [`WaitError::Exhausted`] when the budget runs out, or the
/// context's cancellation or deadline error.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    ctx: &WaitContext,
    mut attempt: F,
) -> Result<T, WaitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for number in 1..=policy.attempts {
        ctx.check()?;
        if let Some(value) = ctx.race(attempt(number)).await? {
            return Ok(value);
        }
        if number < policy.attempts {
            ctx.pause(policy.interval).await?;
        }
    }

    Err(WaitError::Exhausted {
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: PollPolicy = PollPolicy::new(5, Duration::from_millis(1));

    #[tokio::test]
    async fn returns_first_successful_attempt() {
        let ctx = WaitContext::default();
        let result = poll_until(FAST, &ctx, |n| async move { (n == 3).then_some(n) }).await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn exhausts_after_budget_without_trailing_pause() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::new(3, Duration::from_millis(200));
        let ctx = WaitContext::default();
        let started = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = poll_until(policy, &ctx, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;

        assert_eq!(result, Err(WaitError::Exhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(
            started.elapsed() < Duration::from_millis(600),
            "two pauses expected, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn zero_attempts_exhausts_immediately() {
        let ctx = WaitContext::default();
        let result: Result<(), _> =
            poll_until(PollPolicy::new(0, Duration::ZERO), &ctx, |_| async { None }).await;
        assert_eq!(result, Err(WaitError::Exhausted { attempts: 0 }));
    }

    #[tokio::test]
    async fn cancellation_interrupts_pause() {
        let (handle, token) = cancellation();
        let ctx = WaitContext::new(token);
        let policy = PollPolicy::new(10, Duration::from_secs(3600));

        let waiter = tokio::spawn(async move {
            poll_until::<(), _, _>(policy, &ctx, |_| async { None }).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = waiter
            .await
            .unwrap_or_else(|err| panic!("join failed: {err}"));
        assert_eq!(result, Err(WaitError::Cancelled));
    }

    #[tokio::test]
    async fn already_cancelled_context_never_attempts() {
        let (handle, token) = cancellation();
        handle.cancel();
        let ctx = WaitContext::new(token);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = poll_until(FAST, &ctx, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;

        assert_eq!(result, Err(WaitError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deadline_clips_long_pause() {
        let ctx = WaitContext::default().with_timeout(Duration::from_millis(30));
        let policy = PollPolicy::new(10, Duration::from_secs(3600));
        let started = Instant::now();

        let result: Result<(), _> = poll_until(policy, &ctx, |_| async { None }).await;

        assert_eq!(result, Err(WaitError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_interrupts_running_attempt() {
        let (handle, token) = cancellation();
        let ctx = WaitContext::new(token);
        let started = Instant::now();

        let waiter = tokio::spawn(async move {
            poll_until::<(), _, _>(FAST, &ctx, |_| pending::<Option<()>>()).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = waiter
            .await
            .unwrap_or_else(|err| panic!("join failed: {err}"));
        assert_eq!(result, Err(WaitError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn deadline_interrupts_running_attempt() {
        let ctx = WaitContext::default().with_timeout(Duration::from_millis(30));
        let started = Instant::now();

        let result: Result<(), _> = poll_until(FAST, &ctx, |_| pending::<Option<()>>()).await;

        assert_eq!(result, Err(WaitError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn never_token_is_not_cancelled() {
        assert!(!CancelToken::never().is_cancelled());
    }
}
