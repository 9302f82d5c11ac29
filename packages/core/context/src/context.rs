use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("context canceled")]
pub struct Canceled;

#[derive(Default)]
struct Inner {
    canceled: Mutex<bool>,
    cond: Condvar,
}

/// Cancellation token for one in-flight call.
///
/// Clones share the same state, so the pending table can keep one copy while the invoked method
/// polls another. Cancellation is cooperative: nothing stops a method that never looks at its token.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token canceled and wakes every waiter.
    /// Returns false if it was already canceled.
    pub fn cancel(&self) -> bool {
        let mut canceled = self.inner.canceled.lock();
        if *canceled {
            return false;
        }
        *canceled = true;
        self.inner.cond.notify_all();
        true
    }

    pub fn is_canceled(&self) -> bool {
        *self.inner.canceled.lock()
    }

    pub fn err(&self) -> Option<Canceled> {
        self.is_canceled().then_some(Canceled)
    }

    /// Blocks until the token is canceled or `timeout` elapses. Returns true when canceled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut canceled = self.inner.canceled.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !*canceled {
                    if self.inner.cond.wait_until(&mut canceled, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*canceled {
                    self.inner.cond.wait(&mut canceled);
                }
            }
        }
        *canceled
    }

    /// True if both handles refer to the same token.
    pub fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("canceled", &self.is_canceled()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Canceled, Context};

    #[test]
    fn cancel_only_once() {
        let ctx = Context::new();
        assert!(!ctx.is_canceled());
        assert_eq!(ctx.err(), None);

        assert!(ctx.cancel());
        assert!(!ctx.cancel());
        assert!(ctx.is_canceled());
        assert_eq!(ctx.err(), Some(Canceled));
    }

    #[test]
    fn clones_share_state() {
        let ctx = Context::new();
        let other = ctx.clone();
        assert!(ctx.same(&other));
        assert!(!ctx.same(&Context::new()));

        other.cancel();
        assert!(ctx.is_canceled());
    }

    #[test]
    fn wait_timeout_without_cancel() {
        let ctx = Context::new();
        assert!(!ctx.wait(Duration::from_millis(10)));
    }

    #[test]
    fn wait_wakes_on_cancel() {
        let ctx = Context::new();
        let remote = ctx.clone();
        let join = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        assert!(ctx.wait(Duration::from_secs(10)));
        join.join().expect("Should join");
    }

    #[test]
    fn wait_returns_immediately_when_already_canceled() {
        let ctx = Context::new();
        ctx.cancel();
        assert!(ctx.wait(Duration::MAX));
    }
}
