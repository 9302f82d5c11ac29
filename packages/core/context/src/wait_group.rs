use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    count: Mutex<usize>,
    cond: Condvar,
}

/// Completion tracker for detached calls. Each [`WaitGuard`] counts as one outstanding call until it
/// is dropped.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

pub struct WaitGuard {
    inner: Arc<Inner>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) -> WaitGuard {
        *self.inner.count.lock() += 1;
        WaitGuard { inner: self.inner.clone() }
    }

    pub fn count(&self) -> usize {
        *self.inner.count.lock()
    }

    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count > 0 {
            self.inner.cond.wait(&mut count);
        }
    }

    /// Returns true if every guard was dropped before `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                self.wait();
                return true;
            }
        };
        let mut count = self.inner.count.lock();
        while *count > 0 {
            if self.inner.cond.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        *count == 0
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        let mut count = self.inner.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::WaitGroup;

    #[test]
    fn guard_drop_decrements() {
        let wg = WaitGroup::new();
        let g1 = wg.add();
        let g2 = wg.add();
        assert_eq!(wg.count(), 2);
        drop(g1);
        assert_eq!(wg.count(), 1);
        assert!(!wg.wait_timeout(Duration::from_millis(10)));
        drop(g2);
        assert_eq!(wg.count(), 0);
        assert!(wg.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_for_threads() {
        let wg = WaitGroup::new();
        for _ in 0..4 {
            let guard = wg.add();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                drop(guard);
            });
        }
        wg.wait();
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn guard_released_on_panic() {
        let wg = WaitGroup::new();
        let guard = wg.add();
        let join = std::thread::spawn(move || {
            let _guard = guard;
            panic!("boom");
        });
        assert!(join.join().is_err());
        assert_eq!(wg.count(), 0);
    }
}
