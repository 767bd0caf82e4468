//! Non-blocking, non-reentrant task lock.

use std::sync::atomic::{AtomicBool, Ordering};

/// A try-lock guarding one task body.
///
/// Acquisition never blocks: a second caller simply gets `None` and is
/// expected to skip its run.
#[derive(Debug, Default)]
pub struct TaskLock {
    held: AtomicBool,
}

impl TaskLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<TaskLockGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TaskLockGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the [`TaskLock`] when dropped, including during unwinding.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct TaskLockGuard<'a> {
    lock: &'a TaskLock,
}

impl Drop for TaskLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn second_acquire_fails_while_held() {
        let lock = TaskLock::new();
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.is_held());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn released_on_panic() {
        let lock = TaskLock::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.try_acquire();
            panic!("task body failed");
        }));
        assert!(result.is_err());
        assert!(!lock.is_held());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn at_most_one_holder(threads in 2usize..8, rounds in 1usize..50) {
            let lock = Arc::new(TaskLock::new());
            let inside = Arc::new(AtomicUsize::new(0));
            let overlap = Arc::new(AtomicBool::new(false));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    let inside = Arc::clone(&inside);
                    let overlap = Arc::clone(&overlap);
                    std::thread::spawn(move || {
                        for _ in 0..rounds {
                            if let Some(_guard) = lock.try_acquire() {
                                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                    overlap.store(true, Ordering::SeqCst);
                                }
                                std::thread::yield_now();
                                inside.fetch_sub(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            prop_assert!(!overlap.load(Ordering::SeqCst));
            prop_assert!(!lock.is_held());
        }
    }
}
