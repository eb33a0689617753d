//! Cancellation aggregation for fetches shared by several callers.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Joins the cancellation of every caller waiting on one fetch into the
/// token handed to that fetch.
pub trait CancellationAggregator: Send + Sync + fmt::Debug {
    /// Register a waiting caller. Dropping the returned guard counts as that
    /// caller giving up.
    fn enroll(&self) -> Enrollment;

    /// Token observed by the shared fetch.
    fn token(&self) -> CancellationToken;

    /// Cancel the shared fetch regardless of enrolled callers.
    fn abort(&self);
}

/// Fires only once every enrolled caller has given up, so one caller
/// cancelling does not starve the others.
#[derive(Debug, Default)]
pub struct EnrollAndWaitForAll {
    group: Arc<WaitGroup>,
}

#[derive(Debug, Default)]
struct WaitGroup {
    pending: Mutex<usize>,
    token: CancellationToken,
}

impl WaitGroup {
    fn release(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.token.cancel();
        }
    }
}

impl EnrollAndWaitForAll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        *self.group.pending.lock()
    }
}

impl CancellationAggregator for EnrollAndWaitForAll {
    fn enroll(&self) -> Enrollment {
        *self.group.pending.lock() += 1;
        Enrollment {
            group: Some(Arc::clone(&self.group)),
        }
    }

    fn token(&self) -> CancellationToken {
        self.group.token.clone()
    }

    fn abort(&self) {
        self.group.token.cancel();
    }
}

/// Enrollment is a no-op. Installed once a result has resolved so late
/// readers cannot cancel a finished fetch.
#[derive(Debug, Default)]
pub struct IgnoreCancellation {
    token: CancellationToken,
}

impl CancellationAggregator for IgnoreCancellation {
    fn enroll(&self) -> Enrollment {
        Enrollment::noop()
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn abort(&self) {}
}

/// A caller's stake in a shared fetch.
#[must_use = "dropping an enrollment withdraws the caller immediately"]
#[derive(Debug)]
pub struct Enrollment {
    group: Option<Arc<WaitGroup>>,
}

impl Enrollment {
    pub fn noop() -> Self {
        Self { group: None }
    }

    /// The caller received its result; leave without counting as a cancel.
    pub fn complete(mut self) {
        self.group = None;
    }
}

impl Drop for Enrollment {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            group.release();
        }
    }
}
