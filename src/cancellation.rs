use std::{
    fmt::Debug,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::payload::Payload;

/// 取消控制器
///
/// One-shot veto handle handed to every listener of a "will" phase.
///
/// All clones share the same flag. Once cancelled it stays cancelled and the
/// first reason given wins.
#[derive(Clone, Default)]
pub struct CancellationController(Arc<CancellationState>);

#[derive(Default)]
struct CancellationState {
    cancelled: AtomicBool,
    reason: OnceLock<Payload>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消, 不附带原因
    pub fn cancel(&self) {
        self.abort(Payload::none());
    }

    /// 取消并附带原因
    pub fn abort(&self, reason: Payload) {
        let _ = self.0.reason.set(reason);
        self.0.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Payload {
        self.0.reason.get().cloned().unwrap_or_default()
    }
}

impl Debug for CancellationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationController")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared_and_monotonic() {
        let controller = CancellationController::new();
        let listener_copy = controller.clone();
        assert!(!controller.is_cancelled());

        listener_copy.abort(Payload::new("blocked"));
        assert!(controller.is_cancelled());
        assert_eq!(controller.reason().downcast_ref::<&str>(), Some(&"blocked"));

        // 第一个原因保留
        controller.abort(Payload::new("later"));
        assert!(controller.is_cancelled());
        assert_eq!(controller.reason().downcast_ref::<&str>(), Some(&"blocked"));
    }
}
