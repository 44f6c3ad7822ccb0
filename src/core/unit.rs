//! Async unit abstraction shared by the monitor and the scheduler.
//!
//! A unit is a spawned Tokio task whose body returns [`AppResult<T>`]. The
//! owner keeps the [`SpawnedUnit`] to await the value; anyone else (the
//! monitor, a cancel request) works through the cloneable [`UnitHandle`],
//! which can tell whether the unit finished, how it finished, and request
//! cooperative cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use crate::core::callbacks::panic_message;
use crate::core::error::AppResult;
use crate::runtime::TokioSpawner;

/// How a unit finished, as seen from outside (no result value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The body returned `Ok`.
    Completed,
    /// The body returned `Err` or panicked; carries the rendered error.
    Failed(String),
    /// The unit was aborted before it finished.
    Cancelled,
}

#[derive(Debug, Default)]
struct UnitShared {
    outcome: Mutex<Option<UnitOutcome>>,
    cancel_requested: AtomicBool,
}

/// Cloneable, non-owning view of a spawned unit.
#[derive(Debug, Clone)]
pub struct UnitHandle {
    abort: AbortHandle,
    shared: Arc<UnitShared>,
}

impl UnitHandle {
    /// Whether the underlying task has stopped running.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Final outcome, or `None` while the unit is still running.
    pub fn outcome(&self) -> Option<UnitOutcome> {
        if let Some(outcome) = self.shared.outcome.lock().clone() {
            return Some(outcome);
        }
        if !self.abort.is_finished() {
            return None;
        }
        // Finished without recording an outcome: either aborted or panicked.
        if self.shared.cancel_requested.load(Ordering::Acquire) {
            Some(UnitOutcome::Cancelled)
        } else {
            Some(UnitOutcome::Failed("unit panicked".to_string()))
        }
    }

    /// Request cooperative cancellation. Takes effect at the unit's next
    /// suspension point. Returns `false` if the unit already finished.
    pub fn cancel(&self) -> bool {
        if self.abort.is_finished() {
            return false;
        }
        self.shared.cancel_requested.store(true, Ordering::Release);
        self.abort.abort();
        true
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::Acquire)
    }
}

/// How a unit finished, as seen by its owner.
#[derive(Debug)]
pub enum Finished<T> {
    /// The body returned a value.
    Value(T),
    /// The body returned an error.
    Error(anyhow::Error),
    /// The unit was aborted.
    Cancelled,
    /// The body panicked.
    Panicked(String),
}

/// A spawned unit together with the join handle that yields its value.
#[derive(Debug)]
pub struct SpawnedUnit<T> {
    handle: UnitHandle,
    join: JoinHandle<AppResult<T>>,
}

impl<T: Send + 'static> SpawnedUnit<T> {
    /// Handle for observers.
    pub fn handle(&self) -> UnitHandle {
        self.handle.clone()
    }

    /// Wait for the unit to finish.
    pub async fn join(self) -> Finished<T> {
        match self.join.await {
            Ok(Ok(value)) => Finished::Value(value),
            Ok(Err(err)) => Finished::Error(err),
            Err(err) if err.is_cancelled() => Finished::Cancelled,
            Err(err) => Finished::Panicked(panic_message(err.into_panic().as_ref())),
        }
    }
}

/// Spawn `fut` as a cancellable unit on `spawner`'s runtime.
pub fn spawn_unit<F, T>(spawner: &TokioSpawner, fut: F) -> SpawnedUnit<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let shared = Arc::new(UnitShared::default());
    let recorder = Arc::clone(&shared);
    let join = spawner.spawn(async move {
        let result = fut.await;
        let outcome = match &result {
            Ok(_) => UnitOutcome::Completed,
            Err(err) => UnitOutcome::Failed(format!("{err:#}")),
        };
        *recorder.outcome.lock() = Some(outcome);
        result
    });
    SpawnedUnit {
        handle: UnitHandle {
            abort: join.abort_handle(),
            shared,
        },
        join,
    }
}
