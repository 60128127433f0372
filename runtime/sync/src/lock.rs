//! Recursive Lock with scoped acquisition
//!
//! A `Lock` can be held by one thread at a time. The holder may acquire it
//! again (the depth is counted) and must release it the same number of
//! times. Waiters block on the kernel primitive until the lock is released or
//! their timeout elapses.
//!
//! # Example
//! ```
//! use core::cell::Cell;
//! use keel_sync::Lock;
//!
//! let counter = Lock::new(Cell::new(0));
//! {
//!     let guard = counter.scoped();
//!     guard.set(guard.get() + 1);
//! } // released here, on every exit path
//! assert!(!counter.is_locked());
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::time::Duration;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::{critical, misuse, LockError, Result};

/// Timeout value that waits until the lock becomes available
pub const WAIT_FOREVER: Duration = Duration::MAX;

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Recursive mutual-exclusion lock, optionally guarding a value
///
/// The guarded value is only reachable through a [`ScopedLock`]. Because the
/// owner may hold several guards at once, guards hand out shared references;
/// put a `Cell` or `RefCell` inside for mutable state.
pub struct Lock<T: ?Sized = ()> {
    ownership: Mutex<Ownership>,
    released: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: the value is only reached by the thread currently owning the lock.
unsafe impl<T: ?Sized + Send> Send for Lock<T> {}
// SAFETY: ownership is exclusive to one thread at a time, so sharing the lock
// only ever moves access to `T` between threads, which `T: Send` allows.
unsafe impl<T: ?Sized + Send> Sync for Lock<T> {}

impl<T> Lock<T> {
    /// Create an unlocked lock guarding `value`
    pub const fn new(value: T) -> Self {
        Self {
            ownership: Mutex::new(Ownership {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the lock and return the guarded value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Lock<T> {
    fn ownership(&self) -> MutexGuard<'_, Ownership> {
        self.ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock, waiting at most `timeout`
    ///
    /// Re-acquisition by the owning thread always succeeds immediately.
    ///
    /// # Errors
    /// - `LockError::WouldBlock` if `timeout` is zero and another thread owns the lock
    /// - `LockError::Timeout` if the lock was not released within `timeout`
    pub fn acquire(&self, timeout: Duration) -> Result<()> {
        if !timeout.is_zero() {
            critical::assert_not_in_critical("Lock::acquire");
            if critical::isr::is_active() {
                misuse::fatal("blocking Lock::acquire called from interrupt context");
            }
        }

        let me = thread::current().id();
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.ownership();

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(());
                }
                Some(_) => {}
            }

            if timeout.is_zero() {
                return Err(LockError::WouldBlock);
            }

            state = match deadline {
                None => self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(LockError::Timeout { waited: timeout });
                    }
                    self.released
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Acquire the lock only if it is free or already owned by this thread
    pub fn try_acquire(&self) -> Result<()> {
        self.acquire(Duration::ZERO)
    }

    /// Release one level of ownership
    ///
    /// Releasing a lock this thread does not hold is fatal misuse.
    #[track_caller]
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.ownership();

        let problem = match state.owner {
            Some(owner) if owner == me => {
                state.depth -= 1;
                if state.depth == 0 {
                    state.owner = None;
                    drop(state);
                    self.released.notify_one();
                }
                return;
            }
            Some(_) => "Lock released by a thread that does not own it",
            None => "Lock released while not held",
        };

        drop(state);
        misuse::fatal(problem);
    }

    /// Acquire the lock, waiting as long as it takes, and release it when
    /// the returned guard is dropped
    pub fn scoped(&self) -> ScopedLock<'_, T> {
        loop {
            if self.acquire(WAIT_FOREVER).is_ok() {
                return ScopedLock::new(self);
            }
        }
    }

    /// Like [`Lock::scoped`], giving up after `timeout`
    pub fn scoped_timeout(&self, timeout: Duration) -> Result<ScopedLock<'_, T>> {
        self.acquire(timeout)?;
        Ok(ScopedLock::new(self))
    }

    /// Whether any thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.ownership().owner.is_some()
    }

    /// Whether the calling thread holds the lock
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.ownership().owner == Some(thread::current().id())
    }

    /// Current recursion depth (0 when unlocked)
    pub fn depth(&self) -> usize {
        self.ownership().depth
    }

    /// Mutable access without locking, proven exclusive by `&mut self`
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Lock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.ownership();
        f.debug_struct("Lock")
            .field("locked", &state.owner.is_some())
            .field("depth", &state.depth)
            .finish_non_exhaustive()
    }
}

/// Guard proving the current thread holds a [`Lock`]
///
/// Dropping the guard releases one level of ownership, whichever way the
/// enclosing scope is left.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a, T: ?Sized = ()> {
    lock: &'a Lock<T>,
    // Ownership is per thread, so the guard must be dropped where it was made.
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> ScopedLock<'a, T> {
    fn new(lock: &'a Lock<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// The lock this guard holds
    pub fn lock(&self) -> &'a Lock<T> {
        self.lock
    }
}

impl<T: ?Sized> Deref for ScopedLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while this thread owns the lock, and
        // the owner only ever receives shared references.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for ScopedLock<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ScopedLock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedLock").field(&&**self).finish()
    }
}

static_assertions::assert_impl_all!(Lock<core::cell::RefCell<u32>>: Send, Sync);
static_assertions::assert_not_impl_any!(ScopedLock<'static, u32>: Send);
