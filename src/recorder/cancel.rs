//! Cooperative cancellation
//!
//! One [`CancelToken`] per session is shared by the polling threads (which
//! sleep on it between ticks) and the async lifecycle code (which awaits it).
//! The async side is a plain [`CancellationToken`]; the condvar only serves
//! the blocking sleeps of worker threads.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct CancelInner {
    token: CancellationToken,
    lock: Mutex<()>,
    condvar: Condvar,
}

/// Cloneable, set-once cancellation signal
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                token: CancellationToken::new(),
                lock: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Fire the token. Later calls do nothing.
    pub fn cancel(&self) {
        if self.inner.token.is_cancelled() {
            return;
        }
        self.inner.token.cancel();
        {
            // Sleepers check the flag under this lock before waiting
            let _guard = self.inner.lock.lock();
            self.inner.condvar.notify_all();
        }
        tracing::debug!("Cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Block the current thread for up to `timeout`
    ///
    /// Returns `true` as soon as the token is cancelled, `false` if the full
    /// timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self
                .inner
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.is_cancelled();
            }
        }
        true
    }

    /// Wait asynchronously until the token is cancelled
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// The underlying async token, for `select!` arms in caller code
    pub fn as_cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_times_out_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_wakes_sleeping_thread() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let cancelled = sleeper.wait_timeout(Duration::from_secs(10));
            (cancelled, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
        let (cancelled, waited) = handle.join().unwrap();
        assert!(cancelled);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_is_sticky() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_async_waiter_is_released() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("waiter should be released")
            .unwrap();

        // Already cancelled: returns immediately
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_inner_token_follows_cancel() {
        let token = CancelToken::new();
        let inner = token.as_cancellation_token().clone();
        assert!(!inner.is_cancelled());

        token.cancel();
        assert!(inner.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), inner.cancelled())
            .await
            .unwrap();
    }
}
