//! Timing sources for the three waits of a bus call.
//!
//! Each wait (first signal, section hand-off, element hand-off) asks its
//! own [`TimerFn`] for a future that resolves when the wait should give
//! up. Production code uses `tokio::time::sleep`; tests swap in
//! [`expired`] to force one specific wait to time out.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Produces a future that completes once `Duration` has elapsed.
pub type TimerFn = Arc<dyn Fn(Duration) -> BoxFuture + Send + Sync>;

#[derive(Clone)]
pub struct Timers {
    /// Wait for the handler's first signal.
    pub response: TimerFn,
    /// Wait for the caller to accept a section.
    pub section: TimerFn,
    /// Wait for the caller to accept an element.
    pub element: TimerFn,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            response: sleep(),
            section: sleep(),
            element: sleep(),
        }
    }
}

impl Timers {
    pub fn with_response(mut self, timer: TimerFn) -> Self {
        self.response = timer;
        self
    }

    pub fn with_section(mut self, timer: TimerFn) -> Self {
        self.section = timer;
        self
    }

    pub fn with_element(mut self, timer: TimerFn) -> Self {
        self.element = timer;
        self
    }
}

impl fmt::Debug for Timers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers").finish_non_exhaustive()
    }
}

/// Wall-clock timer backed by `tokio::time::sleep`.
pub fn sleep() -> TimerFn {
    Arc::new(|d| Box::pin(tokio::time::sleep(d)))
}

/// Timer that has already fired, whatever the duration.
pub fn expired() -> TimerFn {
    Arc::new(|_| Box::pin(std::future::ready(())))
}

/// Timer that never fires.
pub fn never() -> TimerFn {
    Arc::new(|_| Box::pin(std::future::pending()))
}
