//! Per-call context: purpose attribution, cancellation, and the HTTP debug
//! capture seam (§5, §9).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation signal threaded through every public
/// operation (§5). Cloning shares the same underlying flag; cancelling any
/// clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-request HTTP capture buffer for debugging (`dump_on_success`).
///
/// This is the disentangling pattern §9 calls for: instead of one
/// shared-mutable buffer on a driver's transport (which would corrupt
/// itself under concurrent requests), every call carries its own capture
/// object through [`RequestContext`]. A transport that receives no capture
/// falls back to a shared buffer and should warn, since concurrent use of
/// that fallback is unsafe for its intended purpose.
#[derive(Debug, Clone, Default)]
pub struct CallCapture {
    inner: Arc<Mutex<Vec<String>>>,
}

impl CallCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, line: impl Into<String>) {
        self.inner.lock().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.inner.lock().clone()
    }
}

/// Context carried through a single call: which purpose it serves (for
/// cost/metric attribution, §4.6 step 4), cancellation, and debug capture.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub purpose: Option<String>,
    pub cancellation: CancellationToken,
    pub capture: Option<CallCapture>,
}

impl RequestContext {
    pub fn for_purpose(purpose: impl Into<String>) -> Self {
        Self {
            purpose: Some(purpose.into()),
            ..Default::default()
        }
    }
}
