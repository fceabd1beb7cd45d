use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scoped "suppress capture" state shared by an interceptor and anything it
/// calls while capturing.
///
/// Capturing pushes a scope; while any scope is alive, nested console calls
/// still reach the original console but are not captured again.
#[derive(Debug, Clone, Default)]
pub struct CaptureGuard {
    depth: Arc<AtomicUsize>,
}

impl CaptureGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suppressed(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    pub fn suppress(&self) -> SuppressionScope {
        self.depth.fetch_add(1, Ordering::AcqRel);
        SuppressionScope {
            depth: Arc::clone(&self.depth),
        }
    }
}

/// Pops its suppression level when dropped, on every exit path.
#[must_use = "capture is only suppressed while the scope is alive"]
#[derive(Debug)]
pub struct SuppressionScope {
    depth: Arc<AtomicUsize>,
}

impl Drop for SuppressionScope {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}
