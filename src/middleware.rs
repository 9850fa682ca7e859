use crate::codec::FanoutRequest;
use crate::fanout::FanoutOutcome;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The handler a [`Middleware`] wraps: a decoded fanout request in, a fanout
/// outcome out. The innermost handler is the engine itself.
pub type Handler = Arc<dyn Fn(FanoutRequest) -> BoxFuture<FanoutOutcome> + Send + Sync>;

/// User-appended middleware. Runs after the built-in admission gates,
/// closest to the engine. The first middleware in the chain is outermost.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Handler) -> Handler;
}

pub fn chain(base: Handler, middleware: &[Arc<dyn Middleware>]) -> Handler {
    middleware
        .iter()
        .rev()
        .fold(base, |next, middleware| middleware.wrap(next))
}

/// Process-wide admission gate shared by every fanout handler.
///
/// Admission is a plain atomic increment with rollback; there is no lock on
/// this path.
pub struct BusyGate {
    max: i64,
    current: AtomicI64,
}

impl BusyGate {
    pub fn new(max: i64) -> Arc<Self> {
        Arc::new(BusyGate {
            max,
            current: AtomicI64::new(0),
        })
    }

    /// Admits the caller unless the in-flight count would exceed the cap.
    /// The permit releases its slot when dropped.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BusyPermit> {
        let admitted = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        if admitted > self.max {
            self.current.fetch_sub(1, Ordering::AcqRel);
            return None;
        }

        Some(BusyPermit { gate: self.clone() })
    }

    pub fn in_flight(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }
}

pub struct BusyPermit {
    gate: Arc<BusyGate>,
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.gate.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-fanout concurrency gate. Acquisition never blocks; a saturated gate
/// rejects immediately.
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        ConcurrencyGate {
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
