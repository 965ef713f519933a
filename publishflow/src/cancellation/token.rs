//! Cancellation controller and token for cooperative cancellation.

use crate::errors::PipelineError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A callback type for cancellation notifications. Receives the reason.
pub type CancelCallback = Box<dyn FnOnce(&str) + Send>;

#[derive(Default)]
struct Shared {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: Mutex<Vec<CancelCallback>>,
    /// Wakes tasks parked in `cancelled()`.
    notify: Notify,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

/// Single authority for aborting one pipeline run.
///
/// Cloning yields another handle to the same signal. Triggering is idempotent
/// and safe from any number of concurrent callers: only the first call records
/// its reason and runs the registered callbacks.
#[derive(Clone, Default)]
pub struct CancellationController {
    shared: Arc<Shared>,
}

impl CancellationController {
    /// Creates a new, untriggered controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an observe-only token for this controller.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns true if this call triggered the controller, false if it was
    /// already triggered. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        // Held until the reason is recorded so `on_cancel` never observes
        // the flag without it.
        let callbacks = {
            let mut registered = self.shared.callbacks.lock();
            if self
                .shared
                .cancelled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return false;
            }
            *self.shared.reason.write() = Some(reason.clone());
            std::mem::take(&mut *registered)
        };

        debug!(reason = %reason, "Pipeline cancellation requested");
        self.shared.notify.notify_waiters();

        for callback in callbacks {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&reason);
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        }

        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.shared.reason()
    }
}

impl std::fmt::Debug for CancellationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationController")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Observe-only view of a [`CancellationController`].
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.shared.reason()
    }

    /// Fails with a cancellation error on behalf of `stage` if triggered.
    pub fn check(&self, stage: &str) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::cancelled(stage, self.reason().unwrap_or_default()))
        } else {
            Ok(())
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut callbacks = self.shared.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            let reason = self.reason().unwrap_or_default();
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&reason);
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_controller_default_not_cancelled() {
        let controller = CancellationController::new();
        assert!(!controller.is_cancelled());
        assert!(controller.reason().is_none());
        assert!(controller.token().check("stage").is_ok());
    }

    #[test]
    fn test_cancel_visible_through_token() {
        let controller = CancellationController::new();
        let token = controller.token();

        assert!(controller.cancel("job aborted"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("job aborted".to_string()));
        let err = token.check("tree-source").unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_cancel_idempotent() {
        let controller = CancellationController::new();
        assert!(controller.cancel("First reason"));
        assert!(!controller.cancel("Second reason"));

        // First reason wins
        assert_eq!(controller.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_runs_once() {
        let controller = CancellationController::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        controller.token().on_cancel(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        controller.cancel("a");
        controller.cancel("b");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancellation() {
        let controller = CancellationController::new();
        controller.cancel("test");

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        // Should invoke immediately
        controller.token().on_cancel(move |reason| {
            *seen_clone.lock() = Some(reason.to_string());
        });

        assert_eq!(seen.lock().as_deref(), Some("test"));
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let controller = CancellationController::new();

        controller.token().on_cancel(|_| {
            panic!("Intentional panic");
        });

        // Should not panic
        controller.cancel("test");
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_cancel_triggers_once() {
        let controller = CancellationController::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.cancel(format!("stage-{i}")) })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let triggered = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(triggered, 1);
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let controller = CancellationController::new();
        let token = controller.token();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.cancel("shutdown");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
