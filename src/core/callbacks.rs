//! Ordered handler lists with per-call panic isolation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered list of handlers for one event kind.
///
/// Dispatch works on a snapshot of the list, so a handler may register
/// further handlers (or call back into the component) without deadlocking.
pub(crate) struct CallbackList<H: ?Sized> {
    handlers: RwLock<Vec<(HandlerId, Arc<H>)>>,
}

impl<H: ?Sized> Default for CallbackList<H> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> CallbackList<H> {
    pub(crate) fn push(&self, handler: Arc<H>) -> HandlerId {
        let id = HandlerId::next();
        self.handlers.write().push((id, handler));
        id
    }

    /// Remove one handler. Returns `false` if it is not in this list.
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub(crate) fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Invoke every handler in registration order. A panicking handler is
    /// logged and skipped. Returns the number of handlers that panicked.
    pub(crate) fn dispatch<F>(&self, event: &'static str, mut call: F) -> usize
    where
        F: FnMut(&H),
    {
        let snapshot: Vec<Arc<H>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let mut failures = 0;
        for handler in &snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(handler))) {
                failures += 1;
                tracing::error!(
                    event,
                    error = %panic_message(payload.as_ref()),
                    "callback panicked; continuing with remaining handlers"
                );
            }
        }
        failures
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
