//! Liveness and timeout monitor for spawned units.
//!
//! The monitor knows nothing about priorities, dependencies or retries. It
//! keeps one [`TaskRecord`] per registered unit, polls them on a fixed
//! interval, and tells subscribers when a unit completes, fails or runs past
//! its timeout. It never cancels a unit on its own; that decision belongs to
//! the timeout subscribers.
//!
//! Terminal records stay retrievable for a grace period and are then purged,
//! so finished work does not accumulate.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::core::callbacks::{CallbackList, HandlerId};
use crate::core::error::{AppResult, MonitorError};
use crate::core::unit::{spawn_unit, SpawnedUnit, UnitHandle, UnitOutcome};
use crate::runtime::TokioSpawner;
use crate::util::clock::now_ms;
use crate::util::serde::{Metadata, RecordId};

/// Status of a monitored unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Registered, not yet observed running.
    Pending,
    /// Running.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Still running past its timeout.
    TimedOut,
    /// Cancellation was requested through the monitor, or the unit was aborted.
    Cancelled,
}

impl RecordStatus {
    /// `Pending` or `Running`.
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Any status other than `Pending` or `Running`.
    pub const fn is_terminal(self) -> bool {
        !self.is_alive()
    }
}

/// Snapshot of one monitored unit.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Display name.
    pub name: String,
    /// Current status.
    pub status: RecordStatus,
    /// Registration time.
    pub started_at: Instant,
    /// Time the unit was observed finished.
    pub ended_at: Option<Instant>,
    /// Effective timeout; `None` means unlimited.
    pub timeout: Option<Duration>,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
    /// Rendered error when the unit failed.
    pub error: Option<String>,
    /// Reason given to [`Monitor::cancel`].
    pub cancel_reason: Option<String>,
    unit: UnitHandle,
}

impl TaskRecord {
    /// Time since registration, frozen once the record has ended.
    pub fn duration(&self) -> Duration {
        self.duration_at(Instant::now())
    }

    /// Duration as of `now`.
    pub fn duration_at(&self, now: Instant) -> Duration {
        self.ended_at
            .unwrap_or(now)
            .saturating_duration_since(self.started_at)
    }

    /// Whether the record has run longer than its timeout.
    pub fn is_timed_out(&self) -> bool {
        self.is_timed_out_at(Instant::now())
    }

    fn is_timed_out_at(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|limit| self.duration_at(now) > limit)
    }

    /// Whether the status is `Pending` or `Running`.
    pub const fn is_alive(&self) -> bool {
        self.status.is_alive()
    }

    /// Handle of the monitored unit.
    pub fn unit(&self) -> &UnitHandle {
        &self.unit
    }
}

/// Monitor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Records ever registered.
    pub total_registered: u64,
    /// Units observed completing.
    pub total_completed: u64,
    /// Units observed failing.
    pub total_failed: u64,
    /// Timeout events raised.
    pub total_timed_out: u64,
    /// Records cancelled.
    pub total_cancelled: u64,
    /// Tracked records whose unit is still running.
    pub current_running: usize,
    /// Records currently tracked.
    pub current_tracked: usize,
}

/// Handler invoked with the record id and a snapshot of the record.
pub type RecordHandler = dyn Fn(RecordId, &TaskRecord) + Send + Sync;

#[derive(Default)]
struct RecordTable {
    records: HashMap<RecordId, TaskRecord>,
    stats: MonitorStats,
    registrations: u64,
}

enum RecordEvent {
    Timeout,
    Error,
    Complete,
}

struct MonitorInner {
    config: MonitorConfig,
    spawner: TokioSpawner,
    table: Mutex<RecordTable>,
    running: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    on_timeout: CallbackList<RecordHandler>,
    on_error: CallbackList<RecordHandler>,
    on_complete: CallbackList<RecordHandler>,
}

/// Liveness/timeout monitor. Cloning yields another handle to the same
/// monitor.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &self.is_running())
            .field("tracked", &self.inner.table.lock().records.len())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Create a monitor bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_spawner(config, TokioSpawner::current())
    }

    /// Create a monitor that spawns its polling loop on `spawner`.
    pub fn with_spawner(config: MonitorConfig, spawner: TokioSpawner) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                spawner,
                table: Mutex::new(RecordTable::default()),
                running: AtomicBool::new(false),
                poll_task: Mutex::new(None),
                on_timeout: CallbackList::default(),
                on_error: CallbackList::default(),
                on_complete: CallbackList::default(),
            }),
        }
    }

    /// Monitor configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start the polling loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let interval = self.inner.config.check_interval();
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.spawner.spawn(poll_loop(weak, interval));
        if let Some(previous) = self.inner.poll_task.lock().replace(handle) {
            previous.abort();
        }
        info!(
            check_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "monitor started"
        );
    }

    /// Stop the polling loop. Records stay in place for inspection.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.poll_task.lock().take() {
            handle.abort();
        }
        info!("monitor stopped");
    }

    /// Whether the polling loop is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start tracking `unit`.
    ///
    /// `timeout` of `None` uses the configured default; `Some(Duration::ZERO)`
    /// means unlimited.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotRunning`] when the loop is stopped and
    /// `auto_start` is off.
    pub fn register(
        &self,
        unit: UnitHandle,
        name: Option<&str>,
        timeout: Option<Duration>,
        metadata: Option<Metadata>,
    ) -> Result<RecordId, MonitorError> {
        if !self.is_running() {
            if self.inner.config.auto_start {
                self.start();
            } else {
                return Err(MonitorError::NotRunning);
            }
        }

        let timeout = match timeout {
            None => self.inner.config.default_timeout(),
            Some(limit) if limit.is_zero() => None,
            Some(limit) => Some(limit),
        };

        let id = RecordId::new();
        let mut table = self.inner.table.lock();
        table.registrations += 1;
        let name = name.map_or_else(|| format!("Task-{}", table.registrations), str::to_string);
        let mut record = TaskRecord {
            id,
            name,
            status: RecordStatus::Pending,
            started_at: Instant::now(),
            ended_at: None,
            timeout,
            metadata: metadata.unwrap_or_default(),
            error: None,
            cancel_reason: None,
            unit,
        };
        record.status = RecordStatus::Running;
        debug!(record_id = %id, name = %record.name, ?timeout, "unit registered");
        table.records.insert(id, record);
        table.stats.total_registered += 1;
        Ok(id)
    }

    /// Spawn `fut` and register it in one step, starting the monitor if
    /// needed.
    ///
    /// # Errors
    ///
    /// Propagates registration errors; the unit is cancelled in that case.
    pub fn watch<F, T>(
        &self,
        fut: F,
        name: Option<&str>,
        timeout: Option<Duration>,
        metadata: Option<Metadata>,
    ) -> Result<(SpawnedUnit<T>, RecordId), MonitorError>
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.start();
        let unit = spawn_unit(&self.inner.spawner, fut);
        match self.register(unit.handle(), name, timeout, metadata) {
            Ok(id) => Ok((unit, id)),
            Err(err) => {
                unit.handle().cancel();
                Err(err)
            }
        }
    }

    /// Stop tracking a record. Returns `false` for unknown ids.
    pub fn unregister(&self, id: RecordId) -> bool {
        let removed = self.inner.table.lock().records.remove(&id).is_some();
        if removed {
            debug!(record_id = %id, "unit unregistered");
        }
        removed
    }

    /// Request cancellation of the unit behind `id` and mark it cancelled.
    ///
    /// Returns `false` if the id is unknown, the unit already finished, or
    /// the record is already completed, failed or cancelled. A timed-out
    /// unit can still be cancelled.
    pub fn cancel(&self, id: RecordId, reason: &str) -> bool {
        let mut table = self.inner.table.lock();
        let Some(record) = table.records.get_mut(&id) else {
            return false;
        };
        let settled = matches!(
            record.status,
            RecordStatus::Completed | RecordStatus::Failed | RecordStatus::Cancelled
        );
        if settled || !record.unit.cancel() {
            return false;
        }
        record.status = RecordStatus::Cancelled;
        record.cancel_reason = Some(reason.to_string());
        info!(record_id = %id, name = %record.name, reason, "unit cancelled by monitor");
        table.stats.total_cancelled += 1;
        true
    }

    /// Snapshot of one record.
    pub fn record(&self, id: RecordId) -> Option<TaskRecord> {
        self.inner.table.lock().records.get(&id).cloned()
    }

    /// Snapshot of every tracked record.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.inner.table.lock().records.values().cloned().collect()
    }

    /// Records marked running whose unit has not finished.
    pub fn running_records(&self) -> Vec<TaskRecord> {
        self.inner
            .table
            .lock()
            .records
            .values()
            .filter(|r| r.status == RecordStatus::Running && !r.unit.is_finished())
            .cloned()
            .collect()
    }

    /// Current counters.
    pub fn stats(&self) -> MonitorStats {
        let table = self.inner.table.lock();
        let mut stats = table.stats.clone();
        stats.current_running = table
            .records
            .values()
            .filter(|r| r.status == RecordStatus::Running && !r.unit.is_finished())
            .count();
        stats.current_tracked = table.records.len();
        stats
    }

    /// Subscribe to timeout events.
    pub fn on_timeout<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(RecordId, &TaskRecord) + Send + Sync + 'static,
    {
        self.inner.on_timeout.push(Arc::new(handler))
    }

    /// Subscribe to failure events.
    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(RecordId, &TaskRecord) + Send + Sync + 'static,
    {
        self.inner.on_error.push(Arc::new(handler))
    }

    /// Subscribe to completion events.
    pub fn on_complete<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(RecordId, &TaskRecord) + Send + Sync + 'static,
    {
        self.inner.on_complete.push(Arc::new(handler))
    }

    /// Remove one subscriber, whichever event it was registered for.
    /// Returns `false` for unknown ids.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.on_timeout.remove(id)
            || self.inner.on_error.remove(id)
            || self.inner.on_complete.remove(id)
    }

    /// Number of registered subscribers across all events.
    pub fn subscriber_count(&self) -> usize {
        self.inner.on_timeout.len() + self.inner.on_error.len() + self.inner.on_complete.len()
    }

    /// Drop every subscriber.
    pub fn clear_callbacks(&self) {
        self.inner.on_timeout.clear();
        self.inner.on_error.clear();
        self.inner.on_complete.clear();
    }

    /// Run one polling pass immediately, independent of the loop.
    pub fn check_now(&self) {
        self.inner.check_records(Instant::now());
    }

    /// Human-readable snapshot. Not a stable format.
    pub fn status_report(&self) -> String {
        let stats = self.stats();
        let now = Instant::now();
        let mut out = String::new();
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "Monitor status");
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "generated at: {} ms", now_ms());
        let _ = writeln!(
            out,
            "state: {}",
            if self.is_running() { "running" } else { "stopped" }
        );
        let _ = writeln!(out, "registered: {}", stats.total_registered);
        let _ = writeln!(out, "completed:  {}", stats.total_completed);
        let _ = writeln!(out, "failed:     {}", stats.total_failed);
        let _ = writeln!(out, "timed out:  {}", stats.total_timed_out);
        let _ = writeln!(out, "cancelled:  {}", stats.total_cancelled);
        let _ = writeln!(out, "running:    {}", stats.current_running);
        let _ = writeln!(out, "tracked:    {}", stats.current_tracked);

        let mut running = self.running_records();
        if !running.is_empty() {
            running.sort_by_key(|r| r.started_at);
            let _ = writeln!(out, "running units:");
            for record in running {
                let _ = write!(
                    out,
                    "  - {} ({}) {:.2}s",
                    record.name,
                    record.id,
                    record.duration_at(now).as_secs_f64()
                );
                if let Some(limit) = record.timeout {
                    let _ = write!(out, " / timeout {:.2}s", limit.as_secs_f64());
                }
                out.push('\n');
            }
        }
        let _ = writeln!(out, "{}", "=".repeat(60));
        out
    }
}

impl MonitorInner {
    /// One polling pass. Classification happens under the table lock;
    /// subscribers run after it is released.
    fn check_records(&self, now: Instant) {
        let grace = self.config.grace_period();
        let mut events: Vec<(RecordEvent, TaskRecord)> = Vec::new();

        {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let mut expired = Vec::new();

            for (id, record) in &mut table.records {
                if let Some(ended) = record.ended_at {
                    if now.saturating_duration_since(ended) > grace {
                        expired.push(*id);
                    }
                    continue;
                }

                if let Some(outcome) = record.unit.outcome() {
                    record.ended_at = Some(now);
                    if record.status == RecordStatus::Cancelled {
                        continue;
                    }
                    match outcome {
                        UnitOutcome::Completed => {
                            record.status = RecordStatus::Completed;
                            table.stats.total_completed += 1;
                            events.push((RecordEvent::Complete, record.clone()));
                        }
                        UnitOutcome::Failed(message) => {
                            record.status = RecordStatus::Failed;
                            record.error = Some(message);
                            table.stats.total_failed += 1;
                            events.push((RecordEvent::Error, record.clone()));
                        }
                        UnitOutcome::Cancelled => {
                            record.status = RecordStatus::Cancelled;
                            table.stats.total_cancelled += 1;
                        }
                    }
                    continue;
                }

                if self.config.enable_timeout_check
                    && record.status == RecordStatus::Running
                    && record.is_timed_out_at(now)
                {
                    record.status = RecordStatus::TimedOut;
                    table.stats.total_timed_out += 1;
                    warn!(
                        record_id = %id,
                        name = %record.name,
                        elapsed_ms = u64::try_from(record.duration_at(now).as_millis()).unwrap_or(u64::MAX),
                        "unit exceeded its timeout"
                    );
                    events.push((RecordEvent::Timeout, record.clone()));
                }
            }

            for id in expired {
                table.records.remove(&id);
                debug!(record_id = %id, "purged terminal record");
            }
        }

        for (event, record) in events {
            let (list, label) = match event {
                RecordEvent::Timeout => (&self.on_timeout, "monitor.timeout"),
                RecordEvent::Error => (&self.on_error, "monitor.error"),
                RecordEvent::Complete => (&self.on_complete, "monitor.complete"),
            };
            list.dispatch(label, |handler| handler(record.id, &record));
        }
    }
}

async fn poll_loop(monitor: Weak<MonitorInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = monitor.upgrade() else {
            break;
        };
        if !inner.running.load(Ordering::Acquire) {
            break;
        }
        inner.check_records(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> MonitorConfig {
        MonitorConfig::default()
            .with_check_interval_secs(0.01)
            .with_default_timeout_secs(0.0)
            .with_grace_period_secs(60.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_requires_running_monitor() {
        let monitor = Monitor::new(fast_config());
        let (unit, _) = {
            let m = Monitor::new(fast_config().with_auto_start(true));
            m.watch(async { Ok::<_, anyhow::Error>(()) }, None, None, None)
                .expect("auto-start registers")
        };
        let err = monitor.register(unit.handle(), None, None, None).unwrap_err();
        assert_eq!(err, MonitorError::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let monitor = Monitor::new(fast_config());
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_is_classified_and_reported() {
        let monitor = Monitor::new(fast_config());
        monitor.start();
        let completions = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&completions);
        monitor.on_complete(move |_, record| {
            assert_eq!(record.status, RecordStatus::Completed);
            c.fetch_add(1, Ordering::SeqCst);
        });

        let (unit, id) = monitor
            .watch(
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, anyhow::Error>(1)
                },
                Some("adder"),
                None,
                None,
            )
            .unwrap();
        let _ = unit.join().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let record = monitor.record(id).expect("still within grace period");
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.name, "adder");
        assert!(record.ended_at.is_some());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.stats().total_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_and_does_not_cancel() {
        let monitor = Monitor::new(fast_config());
        monitor.start();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&timeouts);
        monitor.on_timeout(move |_, _| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        let (unit, id) = monitor
            .watch(
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, anyhow::Error>("late")
                },
                None,
                Some(Duration::from_millis(50)),
                None,
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.record(id).unwrap().status, RecordStatus::TimedOut);

        // The unit keeps running and finishes on its own.
        assert!(matches!(unit.join().await, crate::core::unit::Finished::Value("late")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.record(id).unwrap().status, RecordStatus::Completed);
    }
}
