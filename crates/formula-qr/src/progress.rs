//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Result, TransportError};

/// Receives `(percent, message)` updates from long-running operations.
///
/// `percent` is in `0.0..=100.0`. Implementations must tolerate being called
/// from more than one thread.
pub trait ProgressObserver: Sync {
    fn report(&self, percent: f32, message: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(f32, &str) + Sync,
{
    fn report(&self, percent: f32, message: &str) {
        self(percent, message)
    }
}

/// Observer that drops every update.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn report(&self, _percent: f32, _message: &str) {}
}

/// Maps `0..=100` onto a sub-range of a parent observer.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressObserver,
    start: f32,
    span: f32,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn ProgressObserver, start: f32, end: f32) -> Self {
        Self {
            inner,
            start,
            span: end - start,
        }
    }
}

impl ProgressObserver for ScaledProgress<'_> {
    fn report(&self, percent: f32, message: &str) {
        self.inner
            .report(self.start + self.span * percent / 100.0, message)
    }
}

/// Serializes calls into an observer when producers run in parallel.
#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
pub(crate) struct SerializedObserver<'a> {
    inner: &'a dyn ProgressObserver,
    lock: Mutex<()>,
}

#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
impl<'a> SerializedObserver<'a> {
    pub(crate) fn new(inner: &'a dyn ProgressObserver) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

impl ProgressObserver for SerializedObserver<'_> {
    fn report(&self, percent: f32, message: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.report(percent, message);
    }
}

/// Shared cancellation flag, polled between fragment-level steps.
///
/// Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }
}
