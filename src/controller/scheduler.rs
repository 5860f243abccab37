//! # Scheduler
//!
//! Runs one task per target and decides when each target cycles next.
//!
//! - Every target owns a task that holds the target's lock for its whole
//!   lifetime, so a re-created target never overlaps its cancelled predecessor.
//! - A global semaphore bounds how many targets are inside a cycle at once.
//!   Tasks waiting for a permit never hold up the timers of other targets.
//! - Each cycle runs under a timeout. Cancellation drops the in-flight cycle at
//!   its next suspension point, so nothing is published for it.
//! - Retryable failures back off exponentially; a healthy cycle resets the
//!   backoff and the target returns to its sync interval.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::types::{
    DriftOutcome, Reconciler, ReconcilerError, SyncOutcome, Target, TargetKey, TriggerSource,
};
use crate::controller::reconciler::TargetMachine;
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// When a target should cycle next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Regular interval
    After(Duration),
    /// Retry after a retryable failure
    Backoff(Duration),
}

impl Requeue {
    pub fn delay(&self) -> Duration {
        match self {
            Requeue::After(d) | Requeue::Backoff(d) => *d,
        }
    }

    pub fn trigger_source(&self) -> TriggerSource {
        match self {
            Requeue::After(_) => TriggerSource::TimerBased,
            Requeue::Backoff(_) => TriggerSource::ErrorBackoff,
        }
    }
}

/// Map a sync outcome to the next requeue
///
/// Healthy outcomes reset the backoff. Revisions rejected for their content
/// wait for the regular interval: retrying sooner cannot change the result.
pub fn next_requeue(
    outcome: &SyncOutcome,
    sync_interval: Duration,
    backoff: &mut ExponentialBackoff,
) -> Requeue {
    if outcome.needs_backoff() {
        Requeue::Backoff(backoff.next_backoff())
    } else {
        if outcome.is_healthy() {
            backoff.reset();
        }
        Requeue::After(sync_interval)
    }
}

/// Timing settings shared by all target tasks
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub cycle_timeout: Duration,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
}

impl From<&ControllerConfig> for SchedulerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_reconciliations.max(1),
            cycle_timeout: config.cycle_timeout(),
            backoff_start: config.backoff_start(),
            backoff_max: config.backoff_max(),
        }
    }
}

struct TaskHandle {
    cancel: CancellationToken,
    target_tx: watch::Sender<Target>,
    trigger: Arc<Notify>,
    join: JoinHandle<()>,
}

type LockMap = Arc<Mutex<HashMap<TargetKey, Arc<AsyncMutex<()>>>>>;

/// Owns the per-target tasks
pub struct Scheduler {
    ctx: Reconciler,
    settings: SchedulerSettings,
    limiter: Arc<Semaphore>,
    tasks: Mutex<HashMap<TargetKey, TaskHandle>>,
    locks: LockMap,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .field("targets", &self.targets())
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(ctx: Reconciler, settings: SchedulerSettings) -> Self {
        info!(
            "Scheduler bounded to {} concurrent reconciliations, cycle timeout {:?}",
            settings.max_concurrent, settings.cycle_timeout
        );
        Self {
            ctx,
            limiter: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            settings,
            tasks: Mutex::new(HashMap::new()),
            locks: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TargetKey, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a target or hand an updated definition to its running task
    ///
    /// An identical definition is ignored. A changed one triggers an
    /// immediate sync.
    pub fn upsert(&self, target: Target) {
        if self.shutdown.is_cancelled() {
            debug!("Scheduler is shutting down, ignoring {}", target.key);
            return;
        }

        let mut tasks = self.tasks();
        if let Some(handle) = tasks.get(&target.key) {
            if !handle.join.is_finished() {
                if *handle.target_tx.borrow() != target {
                    info!("Target {} changed, scheduling sync", target.key);
                    // send only fails once the task is gone
                    let _ = handle.target_tx.send(target);
                }
                return;
            }
        }

        let key = target.key.clone();
        info!("Scheduling target {}", key);

        let cancel = self.shutdown.child_token();
        let (target_tx, target_rx) = watch::channel(target);
        let trigger = Arc::new(Notify::new());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let task = TargetTask {
            key: key.clone(),
            ctx: self.ctx.clone(),
            settings: self.settings,
            limiter: self.limiter.clone(),
            cancel: cancel.clone(),
            trigger: trigger.clone(),
            locks: self.locks.clone(),
        };
        let join = tokio::spawn(task.run(target_rx, lock));

        tasks.insert(
            key,
            TaskHandle {
                cancel,
                target_tx,
                trigger,
                join,
            },
        );
        metrics::set_active_targets(tasks.len());
    }

    /// Stop a target; its in-flight cycle is abandoned without a status write
    pub fn remove(&self, key: &TargetKey) -> bool {
        let mut tasks = self.tasks();
        let removed = tasks.remove(key);
        metrics::set_active_targets(tasks.len());
        match removed {
            Some(handle) => {
                info!("Stopping target {}", key);
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request an immediate sync of a target
    pub fn trigger(&self, key: &TargetKey) -> bool {
        match self.tasks().get(key) {
            Some(handle) => {
                handle.trigger.notify_one();
                true
            }
            None => false,
        }
    }

    /// Keys of all scheduled targets, sorted
    pub fn targets(&self) -> Vec<TargetKey> {
        let mut keys: Vec<TargetKey> = self.tasks().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel every target and wait for the tasks to exit
    pub async fn shutdown(&self) {
        info!("Shutting down scheduler");
        self.shutdown.cancel();
        let handles: Vec<TaskHandle> = self.tasks().drain().map(|(_, h)| h).collect();
        metrics::set_active_targets(0);
        for handle in handles {
            if let Err(e) = handle.join.await {
                warn!("Target task ended abnormally: {}", e);
            }
        }
    }
}

enum Work {
    Sync(TriggerSource),
    Drift,
}

struct TargetTask {
    key: TargetKey,
    ctx: Reconciler,
    settings: SchedulerSettings,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    locks: LockMap,
}

impl TargetTask {
    async fn run(self, mut target_rx: watch::Receiver<Target>, lock: Arc<AsyncMutex<()>>) {
        // Wait for any predecessor of the same key to finish
        let guard = tokio::select! {
            guard = lock.clone().lock_owned() => guard,
            () = self.cancel.cancelled() => {
                self.release_lock(&lock);
                return;
            }
        };

        let mut machine = TargetMachine::new(self.ctx.clone());
        let mut backoff =
            ExponentialBackoff::new(self.settings.backoff_start, self.settings.backoff_max);

        let mut target = target_rx.borrow_and_update().clone();
        let mut next_sync = Instant::now();
        let mut sync_trigger = TriggerSource::SpecChange;
        let mut next_drift = Instant::now() + target.drift_scan_interval;

        loop {
            let work = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                changed = target_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let updated = target_rx.borrow_and_update().clone();
                    if source_moved(&target, &updated) {
                        machine.invalidate();
                    }
                    next_drift = Instant::now() + updated.drift_scan_interval;
                    target = updated;
                    Work::Sync(TriggerSource::SpecChange)
                }
                () = self.trigger.notified() => Work::Sync(TriggerSource::Manual),
                () = tokio::time::sleep_until(next_sync) => Work::Sync(sync_trigger),
                () = tokio::time::sleep_until(next_drift), if target.drift_detection => Work::Drift,
            };

            let wait_started = Instant::now();
            let permit = tokio::select! {
                permit = self.limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = self.cancel.cancelled() => break,
            };
            metrics::observe_limiter_wait(wait_started.elapsed().as_secs_f64());

            match work {
                Work::Sync(trigger) => {
                    let Some(outcome) = self.sync(&mut machine, &target, trigger).await else {
                        break;
                    };
                    drop(permit);

                    let requeue = next_requeue(&outcome, target.sync_interval, &mut backoff);
                    sync_trigger = requeue.trigger_source();
                    next_sync = Instant::now() + requeue.delay();
                    metrics::increment_requeues_total(sync_trigger.as_str());
                    debug!(
                        "Next sync of {} in {:?} ({})",
                        self.key,
                        requeue.delay(),
                        sync_trigger.as_str()
                    );
                }
                Work::Drift => {
                    if self.scan_drift(&mut machine, &target).await.is_none() {
                        break;
                    }
                    drop(permit);
                    next_drift = Instant::now() + target.drift_scan_interval;
                }
            }
        }

        debug!("Target task for {} exiting", self.key);
        drop(guard);
        self.release_lock(&lock);
    }

    /// Run one sync cycle; None when the task was cancelled mid-cycle
    async fn sync(
        &self,
        machine: &mut TargetMachine,
        target: &Target,
        trigger: TriggerSource,
    ) -> Option<SyncOutcome> {
        let span = info_span!(
            "sync",
            target.namespace = %target.key.namespace,
            target.name = %target.key.name,
            target.environment = %target.environment,
            trigger = trigger.as_str(),
        );
        let started = Instant::now();
        let timeout = self.settings.cycle_timeout;

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, machine.sync(target)).instrument(span.clone()) => result,
            () = self.cancel.cancelled() => {
                debug!("Sync of {} cancelled mid-cycle", self.key);
                return None;
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(parent: &span, "Sync of {} exceeded {:?}, abandoning cycle", self.key, timeout);
                machine.abandon_cycle();
                tokio::select! {
                    published = self.ctx.reporter.publish_timeout(target, timeout) => {
                        if let Err(e) = published {
                            warn!(parent: &span, "Failed to record timeout for {}: {}", self.key, e);
                        }
                    }
                    () = self.cancel.cancelled() => {
                        debug!("Sync of {} cancelled while recording its timeout", self.key);
                        return None;
                    }
                }
                SyncOutcome::Failed(ReconcilerError::Timeout(timeout))
            }
        };

        metrics::increment_cycles("sync", outcome.as_str());
        metrics::observe_cycle_duration(started.elapsed().as_secs_f64());
        match &outcome {
            SyncOutcome::Unchanged { .. } => {}
            SyncOutcome::Succeeded {
                revision,
                applied,
                unchanged,
            } => info!(
                parent: &span,
                "Synced {} to {}: {} applied, {} unchanged",
                self.key, revision, applied, unchanged
            ),
            SyncOutcome::PartiallyFailed { revision, failures } => warn!(
                parent: &span,
                "Sync of {} to {} failed for {} objects",
                self.key,
                revision,
                failures.len()
            ),
            SyncOutcome::Failed(e) => warn!(parent: &span, "Sync of {} failed: {}", self.key, e),
        }
        Some(outcome)
    }

    /// Run one drift scan; None when the task was cancelled mid-scan
    async fn scan_drift(&self, machine: &mut TargetMachine, target: &Target) -> Option<DriftOutcome> {
        let span = info_span!(
            "drift",
            target.namespace = %target.key.namespace,
            target.name = %target.key.name,
            target.environment = %target.environment,
            trigger = TriggerSource::DriftTimer.as_str(),
        );
        let timeout = self.settings.cycle_timeout;

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, machine.scan_drift(target)).instrument(span.clone()) => result,
            () = self.cancel.cancelled() => return None,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(parent: &span, "Drift scan of {} exceeded {:?}", self.key, timeout);
                machine.abandon_cycle();
                DriftOutcome::Failed(ReconcilerError::Timeout(timeout))
            }
        };
        metrics::increment_cycles("drift", outcome.as_str());
        Some(outcome)
    }

    /// Drop the lock entry once no other task refers to it
    fn release_lock(&self, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let unused = locks
            .get(&self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(entry) == 2);
        if unused {
            locks.remove(&self.key);
        }
    }
}

/// Whether an update points the target at different manifests
fn source_moved(old: &Target, new: &Target) -> bool {
    old.repository != new.repository || old.reference != new.reference || old.path != new.path
}
