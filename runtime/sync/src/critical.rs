//! Critical sections - interrupt masking with explicit nesting tokens
//!
//! A critical section masks interrupts and preemption for a span short
//! enough to read or update interrupt-shared state (a GPIO level, a flag set
//! by a driver's ISR). Nothing inside one may block.
//!
//! The actual masking is delegated to the `critical-section` crate, so each
//! board links its own implementation (`cortex-m`, `esp`, ...) while host
//! builds use the std implementation.
//!
//! Each [`enter`] returns a [`CriticalToken`] recording its nesting depth and
//! whether it was taken from interrupt context. Only the outermost [`exit`]
//! restores the previous interrupt state.

use core::cell::Cell;
use core::marker::PhantomData;

use critical_section::RestoreState;

use crate::misuse;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static ISR_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Proof of an entered critical section, consumed by [`exit`]
#[must_use = "a critical section must be exited with critical::exit"]
#[derive(Debug)]
pub struct CriticalToken {
    restore: RestoreState,
    depth: usize,
    from_isr: bool,
    _not_send: PhantomData<*const ()>,
}

impl CriticalToken {
    /// Nesting depth this token was created at (1 for the outermost)
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the section was entered from interrupt context
    pub fn from_isr(&self) -> bool {
        self.from_isr
    }

    /// Whether exiting this token restores the interrupt state
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

/// Enter a critical section
///
/// Safe to call from thread and interrupt context; nested calls stack.
pub fn enter() -> CriticalToken {
    // SAFETY: the restore state is handed back to `release` by `exit`, which
    // enforces that tokens are exited innermost-first on this thread.
    let restore = unsafe { critical_section::acquire() };
    let depth = DEPTH.with(|d| {
        let depth = d.get() + 1;
        d.set(depth);
        depth
    });

    CriticalToken {
        restore,
        depth,
        from_isr: isr::is_active(),
        _not_send: PhantomData,
    }
}

/// Exit a critical section
///
/// Tokens must be exited innermost-first. Exiting out of order is fatal
/// misuse; the token's interrupt state is still restored and the nesting
/// depth drops below the token, so the section cannot stay entered.
#[track_caller]
pub fn exit(token: CriticalToken) {
    leave(&token);
}

#[track_caller]
fn leave(token: &CriticalToken) {
    let current = depth();
    if token.depth <= current {
        DEPTH.with(|d| d.set(token.depth - 1));
    }

    // SAFETY: `token.restore` came from the matching `acquire` in `enter`, and
    // every token is released once since `exit` and `Section` consume it.
    // Restore states of inner sections never unmask, so releasing an outer
    // token before an inner one only ends the section early.
    unsafe { critical_section::release(token.restore) };

    if token.depth != current {
        misuse::fatal("critical section exited out of order");
    }
}

/// Exits the section when dropped, including on unwind
struct Section(CriticalToken);

impl Drop for Section {
    fn drop(&mut self) {
        leave(&self.0);
    }
}

/// Run `f` inside a critical section
///
/// The section is exited even if `f` panics.
pub fn with<R>(f: impl FnOnce(&CriticalToken) -> R) -> R {
    let section = Section(enter());
    f(&section.0)
}

/// Current nesting depth on this thread
pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Whether this thread is inside a critical section
pub fn is_active() -> bool {
    depth() > 0
}

/// Report fatal misuse if called inside a critical section
///
/// Every blocking operation calls this before it can block.
#[track_caller]
pub fn assert_not_in_critical(operation: &str) {
    if is_active() {
        misuse::fatal(&format!("{operation} would block inside a critical section"));
    }
}

pub use isr::IsrGuard;

/// Interrupt-context marking
///
/// Interrupt handlers wrap their body in an [`IsrGuard`] so that primitives
/// can tell they are running in interrupt context.
pub mod isr {
    use super::ISR_DEPTH;
    use core::cell::Cell;
    use core::marker::PhantomData;

    /// Marks the current thread as executing an interrupt handler
    #[must_use = "interrupt context ends when the guard is dropped"]
    #[derive(Debug)]
    pub struct IsrGuard {
        _not_send: PhantomData<*const ()>,
    }

    /// Enter interrupt context
    pub fn enter() -> IsrGuard {
        ISR_DEPTH.with(|d| d.set(d.get() + 1));
        IsrGuard {
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread is running an interrupt handler
    pub fn is_active() -> bool {
        ISR_DEPTH.with(Cell::get) > 0
    }

    impl Drop for IsrGuard {
        fn drop(&mut self) {
            ISR_DEPTH.with(|d| d.set(d.get() - 1));
        }
    }
}
