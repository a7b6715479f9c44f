//! The report lock.
//!
//! A spin mutex that remembers which thread holds it. Locking again from the
//! owning thread (a report handler that logs a breadcrumb, or a fault raised
//! while a report is being assembled) returns `None` instead of spinning
//! forever.

use core::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};

const NO_OWNER: usize = 0;

/// A token that is unique among live threads, or `NO_OWNER` while the
/// current thread's locals are being torn down.
fn thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    TOKEN
        .try_with(|token| core::ptr::from_ref(token) as usize)
        .unwrap_or(NO_OWNER)
}

pub(crate) struct ReportLock<T> {
    inner: spin::Mutex<T>,
    owner: AtomicUsize,
}

pub(crate) struct ReportGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    owner: &'a AtomicUsize,
}

impl<T> ReportLock<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    /// Acquires the lock, or returns `None` if this thread already holds it.
    pub(crate) fn lock(&self) -> Option<ReportGuard<'_, T>> {
        let token = thread_token();
        if self.held_by(token) {
            return None;
        }
        let guard = self.inner.lock();
        Some(self.claim(guard, token))
    }

    /// Like [`lock`](Self::lock), but gives up after `attempts` failed
    /// tries.
    pub(crate) fn try_lock_for(&self, attempts: usize) -> Option<ReportGuard<'_, T>> {
        let token = thread_token();
        if self.held_by(token) {
            return None;
        }
        for _ in 0..attempts {
            if let Some(guard) = self.inner.try_lock() {
                return Some(self.claim(guard, token));
            }
            core::hint::spin_loop();
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn is_held_by_current_thread(&self) -> bool {
        self.held_by(thread_token())
    }

    fn held_by(&self, token: usize) -> bool {
        // Only this thread ever stores its own token, so a relaxed load
        // cannot observe it spuriously.
        token != NO_OWNER && self.owner.load(Ordering::Relaxed) == token
    }

    fn claim<'a>(&'a self, guard: spin::MutexGuard<'a, T>, token: usize) -> ReportGuard<'a, T> {
        self.owner.store(token, Ordering::Relaxed);
        ReportGuard {
            guard,
            owner: &self.owner,
        }
    }
}

impl<T> Drop for ReportGuard<'_, T> {
    fn drop(&mut self) {
        // Runs before `guard` is dropped, so the owner is cleared while the
        // mutex is still held.
        self.owner.store(NO_OWNER, Ordering::Relaxed);
    }
}

impl<T> Deref for ReportGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ReportGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
