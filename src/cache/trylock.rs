//! Non-blocking single-bit lock
//!
//! Used to answer "is somebody already refreshing this entry?" without
//! queueing behind them. Losing the race means skipping the work, not waiting.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct TryLock {
    locked: AtomicBool,
}

impl TryLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock if it is free. The lock is released when the guard drops.
    pub fn try_lock(&self) -> Option<TryLockGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TryLockGuard { lock: self })
    }

    /// Whether somebody currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Releases the [`TryLock`] on drop, including during unwinding
#[derive(Debug)]
pub struct TryLockGuard<'a> {
    lock: &'a TryLock,
}

impl Drop for TryLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_second_acquire_fails() {
        let lock = TryLock::new();
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let lock = TryLock::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.try_lock().unwrap();
            panic!("regeneration blew up");
        }));

        assert!(result.is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_exclusive_across_threads() {
        let lock = Arc::new(TryLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(_guard) = lock.try_lock() {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
