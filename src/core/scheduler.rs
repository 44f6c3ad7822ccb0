//! Priority/dependency-aware task scheduler with bounded concurrency and
//! retries.
//!
//! Submitted work is parked as `Waiting` until its prerequisites complete,
//! then queued by priority (FIFO within a priority). A dispatcher task admits
//! queued work while fewer than `max_concurrent` tasks are running. Every
//! running attempt is registered with the injected [`Monitor`], and the
//! scheduler reacts to the monitor's timeout events through callbacks; the
//! two components never touch each other's tables directly.
//!
//! # Locking
//!
//! Tokio may poll the dispatcher, the execution drivers and the monitor on
//! different threads, so the task table, the ready queue and the reverse
//! dependency index live behind one `parking_lot::Mutex`. The guard is never
//! held across an `.await` or while user callbacks run. When both locks are
//! needed the order is scheduler, then monitor.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::callbacks::{panic_message, CallbackList, HandlerId};
use crate::core::error::{AppResult, CancelReason, MonitorError, SchedulerError, WaitError};
use crate::core::monitor::{Monitor, TaskRecord};
use crate::core::ready_queue::ReadyQueue;
use crate::core::task::{
    ManagedTask, TaskConfig, TaskFuture, TaskSnapshot, TaskState, TaskWork,
};
use crate::core::unit::{spawn_unit, Finished};
use crate::runtime::TokioSpawner;
use crate::util::clock::now_ms;
use crate::util::serde::{RecordId, TaskId};

/// Handler invoked with a snapshot of a finished task.
pub type TaskHandler<T> = dyn Fn(&TaskSnapshot<T>) + Send + Sync;

/// Scheduler counters and gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks ever submitted.
    pub total_submitted: u64,
    /// Tasks that completed.
    pub total_completed: u64,
    /// Tasks that failed after exhausting retries.
    pub total_failed: u64,
    /// Tasks cancelled, including cascaded cancellations.
    pub total_cancelled: u64,
    /// Retries scheduled.
    pub total_retries: u64,
    /// Tasks currently running.
    pub current_running: usize,
    /// Tasks currently queued.
    pub current_queued: usize,
    /// Tasks currently waiting on prerequisites.
    pub current_waiting: usize,
    /// Tasks currently between attempts.
    pub current_retrying: usize,
    /// Concurrency cap.
    pub max_concurrent: usize,
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    retries: u64,
}

struct SchedulerState<T> {
    tasks: HashMap<TaskId, ManagedTask<T>>,
    ready: ReadyQueue,
    /// Reverse dependency edges: prerequisite -> tasks that named it.
    dependents: HashMap<TaskId, Vec<TaskId>>,
    /// Monitor record -> task, for resolving monitor events.
    records: HashMap<RecordId, TaskId>,
    running: usize,
    next_seq: u64,
    counters: Counters,
}

impl<T> Default for SchedulerState<T> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            ready: ReadyQueue::new(),
            dependents: HashMap::new(),
            records: HashMap::new(),
            running: 0,
            next_seq: 0,
            counters: Counters::default(),
        }
    }
}

struct SchedulerInner<T> {
    config: SchedulerConfig,
    spawner: TokioSpawner,
    monitor: Option<Monitor>,
    /// Our subscriptions on the monitor, removed on drop.
    monitor_handlers: Mutex<Vec<HandlerId>>,
    state: Mutex<SchedulerState<T>>,
    running: AtomicBool,
    wakeup: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    on_complete: CallbackList<TaskHandler<T>>,
    on_failed: CallbackList<TaskHandler<T>>,
}

impl<T> Drop for SchedulerInner<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
        if let Some(monitor) = &self.monitor {
            for id in self.monitor_handlers.get_mut().drain(..) {
                monitor.remove_handler(id);
            }
        }
    }
}

/// Task scheduler. Cloning yields another handle to the same scheduler.
pub struct Scheduler<T> {
    inner: Arc<SchedulerInner<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.inner.running.load(Ordering::Acquire))
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .field(
                "subscribers",
                &(self.inner.on_complete.len() + self.inner.on_failed.len()),
            )
            .finish_non_exhaustive()
    }
}

impl<T> Scheduler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a scheduler on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: SchedulerConfig, monitor: Option<Monitor>) -> Result<Self, SchedulerError> {
        Self::with_spawner(config, monitor, TokioSpawner::current())
    }

    /// Create a scheduler that spawns its work on `spawner`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when `config` fails validation.
    pub fn with_spawner(
        config: SchedulerConfig,
        monitor: Option<Monitor>,
        spawner: TokioSpawner,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let inner = Arc::new(SchedulerInner {
            config,
            spawner,
            monitor,
            monitor_handlers: Mutex::new(Vec::new()),
            state: Mutex::new(SchedulerState::default()),
            running: AtomicBool::new(false),
            wakeup: Arc::new(Notify::new()),
            dispatcher: Mutex::new(None),
            on_complete: CallbackList::default(),
            on_failed: CallbackList::default(),
        });

        if let Some(monitor) = &inner.monitor {
            // Weak so the monitor's handler lists do not keep us alive.
            let weak = Arc::downgrade(&inner);
            let on_timeout = monitor.on_timeout(move |record_id, record| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_monitor_timeout(record_id, record);
                }
            });
            let weak = Arc::downgrade(&inner);
            let on_error = monitor.on_error(move |record_id, record| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_monitor_error(record_id, record);
                }
            });
            inner.monitor_handlers.lock().extend([on_timeout, on_error]);
        }

        Ok(Self { inner })
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Attached monitor, if any.
    pub fn monitor(&self) -> Option<&Monitor> {
        self.inner.monitor.as_ref()
    }

    /// Whether the scheduler accepts and admits work.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start the dispatcher (and the monitor, when monitoring is enabled).
    /// Calling it again while running is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.config.enable_monitor {
            if let Some(monitor) = &self.inner.monitor {
                monitor.start();
            }
        }
        let handle = self.inner.spawner.spawn(dispatch_loop(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.wakeup),
        ));
        if let Some(previous) = self.inner.dispatcher.lock().replace(handle) {
            previous.abort();
        }
        info!(
            max_concurrent = self.inner.config.max_concurrent,
            monitored = self.inner.monitor.is_some() && self.inner.config.enable_monitor,
            "scheduler started"
        );
    }

    /// Stop admitting work.
    ///
    /// With `cancel_running`, running and retrying tasks are cancelled
    /// immediately. Otherwise running tasks get `shutdown_timeout` to finish
    /// and whatever is still running afterwards is cancelled. Queued and
    /// waiting tasks are kept and resume on the next [`start`](Self::start).
    /// The attached monitor is left running; its owner stops it.
    pub async fn stop(&self, cancel_running: bool) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.dispatcher.lock().take() {
            handle.abort();
        }

        if cancel_running {
            self.inner
                .cancel_matching(|s| matches!(s, TaskState::Running | TaskState::Retrying));
        } else {
            let receivers: Vec<watch::Receiver<TaskState>> = {
                let st = self.inner.state.lock();
                st.tasks
                    .values()
                    .filter(|t| t.state == TaskState::Running)
                    .map(|t| t.state_tx.subscribe())
                    .collect()
            };
            let drained = tokio::time::timeout(self.inner.config.shutdown_timeout(), async move {
                for mut rx in receivers {
                    let _ = rx.wait_for(|s| *s != TaskState::Running).await;
                }
            })
            .await;
            if drained.is_err() {
                warn!("running tasks did not finish before shutdown timeout; cancelling them");
                self.inner.cancel_matching(|s| s == TaskState::Running);
            }
        }
        info!("scheduler stopped");
    }

    /// Submit work.
    ///
    /// `work` is called once per attempt to produce the task body. The task
    /// starts `Waiting` when a prerequisite has not completed yet, otherwise
    /// `Queued`. If a prerequisite already failed or was cancelled and the
    /// task cancels on dependency failure, it is `Cancelled` at once.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::NotRunning`] before `start()` or after `stop()`
    /// - [`SchedulerError::UnknownDependency`] for an unknown prerequisite
    /// - [`SchedulerError::Monitor`] when the task is to be monitored but the
    ///   attached monitor is stopped and does not auto-start
    pub fn submit<F, Fut>(
        &self,
        work: F,
        name: Option<&str>,
        config: TaskConfig,
    ) -> Result<TaskId, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        if self.inner.config.enable_monitor && config.monitor_enabled {
            if let Some(monitor) = &self.inner.monitor {
                if !monitor.is_running() && !monitor.config().auto_start {
                    return Err(MonitorError::NotRunning.into());
                }
            }
        }
        let work: TaskWork<T> = Arc::new(move || -> TaskFuture<T> { Box::pin(work()) });

        let mut config = config;
        let mut seen = std::collections::HashSet::new();
        config.dependencies.retain(|dep| seen.insert(*dep));

        let id = TaskId::new();
        let (state, queued) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;

            if let Some(missing) = config
                .dependencies
                .iter()
                .find(|dep| !st.tasks.contains_key(*dep))
            {
                return Err(SchedulerError::UnknownDependency(*missing));
            }

            st.next_seq += 1;
            let seq = st.next_seq;
            let name = name.map_or_else(|| format!("Task-{seq}"), str::to_string);

            let mut blocked = false;
            let mut broken = None;
            for dep in &config.dependencies {
                match st.tasks.get(dep).map(|t| t.state) {
                    Some(TaskState::Completed) => {}
                    Some(TaskState::Failed | TaskState::Cancelled) => {
                        blocked = true;
                        broken.get_or_insert(*dep);
                    }
                    _ => blocked = true,
                }
            }
            for dep in &config.dependencies {
                st.dependents.entry(*dep).or_default().push(id);
            }

            let priority = config.priority;
            let cascade = config.cancel_on_dependency_failure;
            let mut task = ManagedTask::new(id, name, work, config, seq);
            st.counters.submitted += 1;

            let queued = match broken {
                Some(dep) if cascade => {
                    task.cancel_reason = Some(CancelReason::DependencyFailed(dep));
                    task.set_state(TaskState::Cancelled);
                    st.counters.cancelled += 1;
                    false
                }
                _ if blocked => {
                    task.set_state(TaskState::Waiting);
                    false
                }
                _ => {
                    st.ready.push(id, priority, seq);
                    true
                }
            };
            let state = task.state;
            debug!(task_id = %id, name = %task.name, %state, %priority, "task submitted");
            st.tasks.insert(id, task);
            (state, queued)
        };

        if queued {
            self.inner.wakeup.notify_one();
        }
        if state == TaskState::Cancelled {
            self.inner.resolve_dependents(id);
        }
        Ok(id)
    }

    /// Cancel a task.
    ///
    /// Queued, waiting and retrying tasks are cancelled synchronously. A
    /// running task gets a cooperative cancellation request and turns
    /// `Cancelled` once its body reaches a suspension point. Dependents that
    /// cancel on dependency failure are cancelled transitively. Returns
    /// `false` for unknown or already-terminal tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.inner.cancel_with(id, CancelReason::Requested)
    }

    /// Wait until the task reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Failed`] with the body's original error
    /// - [`WaitError::Cancelled`] when the task was cancelled
    /// - [`WaitError::Timeout`] when `timeout` elapsed first (the task keeps going)
    /// - [`WaitError::UnknownTask`] for unknown ids
    pub async fn wait_for(&self, id: TaskId, timeout: Option<Duration>) -> Result<T, WaitError> {
        let mut rx = {
            let st = self.inner.state.lock();
            let task = st.tasks.get(&id).ok_or(WaitError::UnknownTask(id))?;
            task.state_tx.subscribe()
        };

        let settled = async move { rx.wait_for(|s| s.is_terminal()).await.is_ok() };
        let settled = match timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .map_err(|_| WaitError::Timeout)?,
            None => settled.await,
        };
        if !settled {
            return Err(WaitError::Cancelled(CancelReason::Shutdown));
        }

        let st = self.inner.state.lock();
        let task = st.tasks.get(&id).ok_or(WaitError::UnknownTask(id))?;
        match (task.state, &task.result, &task.error) {
            (TaskState::Completed, Some(value), _) => Ok(value.clone()),
            (TaskState::Failed, _, Some(err)) => Err(WaitError::Failed(Arc::clone(err))),
            _ => Err(WaitError::Cancelled(
                task.cancel_reason.unwrap_or(CancelReason::Requested),
            )),
        }
    }

    /// Snapshot of one task.
    pub fn task(&self, id: TaskId) -> Option<TaskSnapshot<T>> {
        self.inner.state.lock().tasks.get(&id).map(ManagedTask::snapshot)
    }

    /// Snapshots of every task, in submission order.
    pub fn tasks(&self) -> Vec<TaskSnapshot<T>> {
        self.collect_tasks(|_| true)
    }

    /// Snapshots of tasks in `state`, in submission order.
    pub fn tasks_by_state(&self, state: TaskState) -> Vec<TaskSnapshot<T>> {
        self.collect_tasks(|t| t.state == state)
    }

    /// Waiting tasks that can never run: a prerequisite failed or was
    /// cancelled and the task does not cancel on dependency failure.
    pub fn stalled_tasks(&self) -> Vec<TaskSnapshot<T>> {
        let st = self.inner.state.lock();
        let mut stalled: Vec<&ManagedTask<T>> = st
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Waiting)
            .filter(|t| {
                t.config.dependencies.iter().any(|dep| {
                    st.tasks
                        .get(dep)
                        .is_some_and(|d| matches!(d.state, TaskState::Failed | TaskState::Cancelled))
                })
            })
            .collect();
        stalled.sort_by_key(|t| t.seq);
        stalled.into_iter().map(ManagedTask::snapshot).collect()
    }

    /// Current counters.
    pub fn stats(&self) -> SchedulerStats {
        let st = self.inner.state.lock();
        let count = |state: TaskState| st.tasks.values().filter(|t| t.state == state).count();
        SchedulerStats {
            total_submitted: st.counters.submitted,
            total_completed: st.counters.completed,
            total_failed: st.counters.failed,
            total_cancelled: st.counters.cancelled,
            total_retries: st.counters.retries,
            current_running: st.running,
            current_queued: count(TaskState::Queued),
            current_waiting: count(TaskState::Waiting),
            current_retrying: count(TaskState::Retrying),
            max_concurrent: self.inner.config.max_concurrent,
        }
    }

    /// Subscribe to completions.
    pub fn on_complete<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&TaskSnapshot<T>) + Send + Sync + 'static,
    {
        self.inner.on_complete.push(Arc::new(handler))
    }

    /// Subscribe to final failures (retries exhausted).
    pub fn on_failed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&TaskSnapshot<T>) + Send + Sync + 'static,
    {
        self.inner.on_failed.push(Arc::new(handler))
    }

    /// Remove a completion or failure subscriber. Returns `false` for
    /// unknown ids.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.on_complete.remove(id) || self.inner.on_failed.remove(id)
    }

    /// Human-readable snapshot. Not a stable format.
    pub fn status_report(&self) -> String {
        let stats = self.stats();
        let mut out = String::new();
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "Scheduler status");
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "generated at: {} ms", now_ms());
        let _ = writeln!(
            out,
            "state: {}",
            if self.is_running() { "running" } else { "stopped" }
        );
        let _ = writeln!(out, "max concurrent: {}", stats.max_concurrent);
        let _ = writeln!(out, "submitted: {}", stats.total_submitted);
        let _ = writeln!(out, "completed: {}", stats.total_completed);
        let _ = writeln!(out, "failed:    {}", stats.total_failed);
        let _ = writeln!(out, "cancelled: {}", stats.total_cancelled);
        let _ = writeln!(out, "retries:   {}", stats.total_retries);
        let _ = writeln!(out, "running:   {}", stats.current_running);
        let _ = writeln!(out, "queued:    {}", stats.current_queued);
        let _ = writeln!(out, "waiting:   {}", stats.current_waiting);
        let _ = writeln!(out, "retrying:  {}", stats.current_retrying);

        let running = self.tasks_by_state(TaskState::Running);
        if !running.is_empty() {
            let _ = writeln!(out, "running tasks:");
            for task in running {
                let _ = writeln!(
                    out,
                    "  - {} ({}) priority {} attempt {} {:.2}s",
                    task.name,
                    task.id,
                    task.priority,
                    task.attempts,
                    task.duration.unwrap_or_default().as_secs_f64()
                );
            }
        }
        let _ = writeln!(out, "{}", "=".repeat(60));
        out
    }

    fn collect_tasks<P>(&self, keep: P) -> Vec<TaskSnapshot<T>>
    where
        P: Fn(&ManagedTask<T>) -> bool,
    {
        let st = self.inner.state.lock();
        let mut selected: Vec<&ManagedTask<T>> = st.tasks.values().filter(|t| keep(t)).collect();
        selected.sort_by_key(|t| t.seq);
        selected.into_iter().map(ManagedTask::snapshot).collect()
    }
}

impl<T> SchedulerInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Admit queued tasks while under the concurrency cap.
    fn admit_ready(self: &Arc<Self>) {
        let admitted: Vec<(TaskId, TaskWork<T>)> = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut admitted = Vec::new();
            while st.running < self.config.max_concurrent {
                let Some(id) = st.ready.pop() else {
                    break;
                };
                let Some(task) = st.tasks.get_mut(&id) else {
                    continue;
                };
                if task.state != TaskState::Queued {
                    continue;
                }
                task.attempts += 1;
                task.started_at = Some(Instant::now());
                task.cancel_reason = None;
                task.set_state(TaskState::Running);
                st.running += 1;
                debug!(
                    task_id = %id,
                    name = %task.name,
                    attempt = task.attempts,
                    running = st.running,
                    "task admitted"
                );
                admitted.push((id, Arc::clone(&task.work)));
            }
            admitted
        };

        for (id, work) in admitted {
            // User code; never called under the lock.
            match catch_unwind(AssertUnwindSafe(|| work())) {
                Ok(body) => self.launch(id, body),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task_id = %id, error = %message, "work factory panicked");
                    let inner = Arc::clone(self);
                    self.spawner.spawn(async move {
                        inner.finish_attempt(id, Finished::Panicked(message)).await;
                    });
                }
            }
        }
    }

    /// Spawn an admitted attempt, register it with the monitor and hand the
    /// join handle to an execution driver.
    fn launch(self: &Arc<Self>, id: TaskId, body: TaskFuture<T>) {
        let unit = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let Some(task) = st.tasks.get_mut(&id) else {
                return;
            };
            if task.cancel_reason.is_some() {
                // Cancelled between admission and launch.
                drop(guard);
                self.finish_cancelled(id);
                return;
            }

            let unit = spawn_unit(&self.spawner, body);
            task.unit = Some(unit.handle());

            if self.config.enable_monitor && task.config.monitor_enabled {
                if let Some(monitor) = &self.monitor {
                    match monitor.register(
                        unit.handle(),
                        Some(&task.name),
                        task.config.timeout,
                        Some(task.config.metadata.clone()),
                    ) {
                        Ok(record_id) => {
                            task.record_id = Some(record_id);
                            st.records.insert(record_id, id);
                        }
                        Err(err) => {
                            warn!(task_id = %id, error = %err, "monitor registration failed; running unmonitored");
                        }
                    }
                }
            }
            unit
        };

        let inner = Arc::clone(self);
        self.spawner.spawn(async move {
            let finished = unit.join().await;
            inner.finish_attempt(id, finished).await;
        });
    }

    async fn finish_attempt(self: &Arc<Self>, id: TaskId, finished: Finished<T>) {
        let cancel_requested = self
            .state
            .lock()
            .tasks
            .get(&id)
            .is_some_and(|t| t.cancel_reason.is_some());

        match finished {
            Finished::Value(value) => self.finish_completed(id, value),
            Finished::Cancelled => self.finish_cancelled(id),
            Finished::Error(_) | Finished::Panicked(_) if cancel_requested => {
                self.finish_cancelled(id);
            }
            Finished::Error(err) => self.finish_error(id, err).await,
            Finished::Panicked(message) => {
                self.finish_error(id, anyhow::anyhow!("task panicked: {message}"))
                    .await;
            }
        }
    }

    /// Clear the running slot and monitor link of an attempt that just
    /// ended. Returns the record to unregister.
    fn release_slot(st: &mut SchedulerState<T>, id: TaskId) -> Option<RecordId> {
        st.running = st.running.saturating_sub(1);
        let task = st.tasks.get_mut(&id)?;
        task.unit = None;
        let record_id = task.record_id.take();
        if let Some(record_id) = record_id {
            st.records.remove(&record_id);
        }
        record_id
    }

    fn unregister(&self, record_id: Option<RecordId>) {
        if let (Some(monitor), Some(record_id)) = (&self.monitor, record_id) {
            monitor.unregister(record_id);
        }
    }

    fn finish_completed(self: &Arc<Self>, id: TaskId, value: T) {
        let (snapshot, record_id) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if st.tasks.get(&id).map(|t| t.state) != Some(TaskState::Running) {
                return;
            }
            let record_id = Self::release_slot(st, id);
            st.counters.completed += 1;
            let Some(task) = st.tasks.get_mut(&id) else {
                return;
            };
            task.result = Some(value);
            task.cancel_reason = None;
            task.set_state(TaskState::Completed);
            (task.snapshot(), record_id)
        };

        self.unregister(record_id);
        info!(
            task_id = %id,
            name = %snapshot.name,
            attempts = snapshot.attempts,
            duration_ms = snapshot.duration.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "task completed"
        );
        self.on_complete
            .dispatch("scheduler.complete", |handler| handler(&snapshot));
        self.resolve_dependents(id);
        self.wakeup.notify_one();
    }

    fn finish_cancelled(self: &Arc<Self>, id: TaskId) {
        let (name, reason, record_id) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if st.tasks.get(&id).map(|t| t.state) != Some(TaskState::Running) {
                return;
            }
            let record_id = Self::release_slot(st, id);
            st.counters.cancelled += 1;
            let Some(task) = st.tasks.get_mut(&id) else {
                return;
            };
            let reason = *task.cancel_reason.get_or_insert(CancelReason::Requested);
            task.set_state(TaskState::Cancelled);
            (task.name.clone(), reason, record_id)
        };

        self.unregister(record_id);
        info!(task_id = %id, name = %name, %reason, "task cancelled");
        self.resolve_dependents(id);
        self.wakeup.notify_one();
    }

    async fn finish_error(self: &Arc<Self>, id: TaskId, err: anyhow::Error) {
        enum Next<T> {
            Retry {
                delay: Duration,
                attempt: u32,
                max_retries: u32,
                name: String,
                error: String,
            },
            Fail(TaskSnapshot<T>),
        }

        let (next, record_id) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if st.tasks.get(&id).map(|t| t.state) != Some(TaskState::Running) {
                return;
            }
            let record_id = Self::release_slot(st, id);
            let Some(task) = st.tasks.get_mut(&id) else {
                return;
            };
            let next = if task.attempts <= task.config.max_retries {
                task.set_state(TaskState::Retrying);
                st.counters.retries += 1;
                Next::Retry {
                    delay: task.config.retry_delay,
                    attempt: task.attempts,
                    max_retries: task.config.max_retries,
                    name: task.name.clone(),
                    error: format!("{err:#}"),
                }
            } else {
                task.error = Some(Arc::new(err));
                task.set_state(TaskState::Failed);
                st.counters.failed += 1;
                Next::Fail(task.snapshot())
            };
            (next, record_id)
        };

        self.unregister(record_id);
        // A slot was freed either way.
        self.wakeup.notify_one();

        match next {
            Next::Retry {
                delay,
                attempt,
                max_retries,
                name,
                error,
            } => {
                warn!(
                    task_id = %id,
                    name = %name,
                    attempt,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "task attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
                self.requeue(id);
            }
            Next::Fail(snapshot) => {
                let rendered = snapshot
                    .error
                    .as_ref()
                    .map(|e| format!("{e:#}"))
                    .unwrap_or_default();
                error!(
                    task_id = %id,
                    name = %snapshot.name,
                    attempts = snapshot.attempts,
                    error = %rendered,
                    "task failed"
                );
                self.on_failed
                    .dispatch("scheduler.failed", |handler| handler(&snapshot));
                self.resolve_dependents(id);
            }
        }
    }

    /// Put a retrying task back in the ready queue, unless it was cancelled
    /// during the delay.
    fn requeue(&self, id: TaskId) {
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let Some(task) = st.tasks.get_mut(&id) else {
                return;
            };
            if task.state != TaskState::Retrying {
                return;
            }
            task.set_state(TaskState::Queued);
            st.ready.push(id, task.config.priority, task.seq);
        }
        debug!(task_id = %id, "task re-queued after retry delay");
        self.wakeup.notify_one();
    }

    fn cancel_with(self: &Arc<Self>, id: TaskId, reason: CancelReason) -> bool {
        let settled_now = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let Some(task) = st.tasks.get_mut(&id) else {
                return false;
            };
            match task.state {
                TaskState::Queued | TaskState::Waiting | TaskState::Retrying => {
                    st.ready.remove(id);
                    task.cancel_reason = Some(reason);
                    task.set_state(TaskState::Cancelled);
                    st.counters.cancelled += 1;
                    true
                }
                TaskState::Running => {
                    if task.cancel_reason.is_none() {
                        task.cancel_reason = Some(reason);
                    }
                    if let Some(unit) = &task.unit {
                        unit.cancel();
                    }
                    false
                }
                TaskState::Completed | TaskState::Failed | TaskState::Cancelled => return false,
            }
        };

        if settled_now {
            info!(task_id = %id, %reason, "task cancelled");
            self.resolve_dependents(id);
        } else {
            debug!(task_id = %id, %reason, "cancellation requested for running task");
        }
        true
    }

    fn cancel_matching<P>(self: &Arc<Self>, select: P)
    where
        P: Fn(TaskState) -> bool,
    {
        let ids: Vec<TaskId> = {
            let st = self.state.lock();
            st.tasks
                .values()
                .filter(|t| select(t.state))
                .map(|t| t.id)
                .collect()
        };
        for id in ids {
            self.cancel_with(id, CancelReason::Shutdown);
        }
    }

    /// Re-evaluate the dependents of a task that just reached a terminal
    /// state: promote those whose prerequisites are now all complete, and
    /// cascade cancellation through those that cancel on dependency failure.
    fn resolve_dependents(&self, id: TaskId) {
        let mut promoted = 0_usize;
        let mut cascaded = Vec::new();
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut pending = vec![id];

            while let Some(done) = pending.pop() {
                let Some(done_state) = st.tasks.get(&done).map(|t| t.state) else {
                    continue;
                };
                let dependents = st.dependents.get(&done).cloned().unwrap_or_default();
                for dependent in dependents {
                    let Some(task) = st.tasks.get(&dependent) else {
                        continue;
                    };
                    if task.state != TaskState::Waiting {
                        continue;
                    }
                    match done_state {
                        TaskState::Completed => {
                            let ready = task.config.dependencies.iter().all(|dep| {
                                st.tasks
                                    .get(dep)
                                    .is_some_and(|d| d.state == TaskState::Completed)
                            });
                            if !ready {
                                continue;
                            }
                            let (priority, seq) = (task.config.priority, task.seq);
                            if let Some(task) = st.tasks.get_mut(&dependent) {
                                task.set_state(TaskState::Queued);
                            }
                            st.ready.push(dependent, priority, seq);
                            promoted += 1;
                        }
                        TaskState::Failed | TaskState::Cancelled => {
                            if !task.config.cancel_on_dependency_failure {
                                warn!(
                                    task_id = %dependent,
                                    dependency = %done,
                                    "prerequisite did not complete; task stays waiting"
                                );
                                continue;
                            }
                            if let Some(task) = st.tasks.get_mut(&dependent) {
                                task.cancel_reason = Some(CancelReason::DependencyFailed(done));
                                task.set_state(TaskState::Cancelled);
                            }
                            st.counters.cancelled += 1;
                            cascaded.push((dependent, done));
                            pending.push(dependent);
                        }
                        _ => {}
                    }
                }
            }
        }

        for (task_id, dependency) in cascaded {
            info!(task_id = %task_id, dependency = %dependency, "task cancelled: dependency did not complete");
        }
        if promoted > 0 {
            debug!(promoted, "dependents promoted to queue");
            self.wakeup.notify_one();
        }
    }

    fn handle_monitor_timeout(self: &Arc<Self>, record_id: RecordId, record: &TaskRecord) {
        let Some(id) = self.state.lock().records.get(&record_id).copied() else {
            return;
        };
        if self.config.auto_cancel_on_timeout {
            warn!(task_id = %id, name = %record.name, "task timed out; cancelling");
            self.cancel_with(id, CancelReason::TimedOut);
        } else {
            warn!(task_id = %id, name = %record.name, "task timed out; letting it run");
        }
    }

    /// Informational only: the execution driver owns the failure transition.
    fn handle_monitor_error(&self, record_id: RecordId, record: &TaskRecord) {
        let task_id = self.state.lock().records.get(&record_id).copied();
        debug!(
            record_id = %record_id,
            task_id = ?task_id,
            error = record.error.as_deref().unwrap_or(""),
            "monitor observed a failed attempt"
        );
    }
}

async fn dispatch_loop<T>(scheduler: Weak<SchedulerInner<T>>, wakeup: Arc<Notify>)
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        {
            let Some(inner) = scheduler.upgrade() else {
                break;
            };
            if !inner.running.load(Ordering::Acquire) {
                break;
            }
            inner.admit_ready();
        }
        wakeup.notified().await;
    }
}
