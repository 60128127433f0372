//! Fatal misuse reporting
//!
//! Programming errors such as releasing a lock twice cannot be returned to a
//! caller that believes it did nothing wrong. Debug builds stop right there;
//! release builds log the report and carry on.

use core::sync::atomic::{AtomicUsize, Ordering};

static REPORTED: AtomicUsize = AtomicUsize::new(0);

/// Report a fatal misuse of a runtime primitive
///
/// Panics when `debug_assertions` are enabled.
#[track_caller]
pub fn fatal(message: &str) {
    REPORTED.fetch_add(1, Ordering::Relaxed);
    log::error!("Fatal misuse: {message}");

    if cfg!(debug_assertions) {
        panic!("fatal misuse: {message}");
    }
}

/// Number of misuse reports since process start
pub fn reported() -> usize {
    REPORTED.load(Ordering::Relaxed)
}
