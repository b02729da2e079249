//! Priority-aware worker pool
//!
//! A fixed-floor, elastic-ceiling pool of OS threads draining four
//! strict-priority queues. Workers scan CRITICAL, HIGH, NORMAL, LOW in that
//! order on every claim; sustained critical load starving LOW is an accepted
//! trade-off. When nothing is queued a worker parks on the queue condvar with
//! a short timeout rather than spinning.
//!
//! A monitor thread samples queue depth once per second and grows the pool by
//! one worker when queued work exceeds twice the worker count, up to the
//! ceiling. The pool never shrinks; idle workers simply stay parked.
//!
//! Every task failure (an `Err` or a panic) is caught, recorded on the task's
//! handle, and logged - a failing task never kills a worker thread.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::Priority;

/// How long a worker parks before re-checking for shutdown
const CLAIM_WAIT: Duration = Duration::from_millis(10);

/// A unit of deferred work
pub type TaskFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Observable state of a submitted task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

struct TaskShared {
    id: Uuid,
    state: Mutex<TaskStatus>,
    done: Condvar,
}

impl TaskShared {
    fn transition(&self, next: TaskStatus) {
        let mut state = self.state.lock().unwrap();
        *state = next;
        self.done.notify_all();
    }

    /// Move Pending -> Running; loses the race against a concurrent cancel
    fn try_start(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == TaskStatus::Pending {
            *state = TaskStatus::Running;
            true
        } else {
            false
        }
    }
}

/// Handle through which a caller observes completion, failure, or
/// cancellation of a submitted task
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(TaskShared {
                id: Uuid::new_v4(),
                state: Mutex::new(TaskStatus::Pending),
                done: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.state.lock().unwrap().clone()
    }

    /// Cancel if the task has not started. Returns whether execution was
    /// prevented; cancelling a running task is a no-op.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if *state == TaskStatus::Pending {
            *state = TaskStatus::Cancelled;
            self.shared.done.notify_all();
            true
        } else {
            false
        }
    }

    /// Block until the task reaches a terminal state or the timeout elapses
    pub fn wait(&self, timeout: Duration) -> TaskStatus {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        while !state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .shared
                .done
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
        }
        state.clone()
    }
}

struct Task {
    job: TaskFn,
    handle: TaskHandle,
    priority: Priority,
    enqueued: Instant,
}

struct Lanes {
    queues: [VecDeque<Task>; 4],
}

impl Lanes {
    fn total(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

/// Read-only pool statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Queue depth per priority lane, critical first
    pub depth: [usize; 4],
    pub workers: usize,
    pub busy: usize,
    pub executed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

struct Inner {
    lanes: Mutex<Lanes>,
    /// Signalled on every push; workers park here when idle
    available: Condvar,
    /// Signalled when a worker goes idle; shutdown drains on this
    idle: Condvar,
    accepting: AtomicBool,
    shutdown: AtomicBool,
    workers: AtomicUsize,
    busy: AtomicUsize,
    ceiling: usize,
    executed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// The worker pool
pub struct Scheduler {
    inner: Arc<Inner>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Pool with default tuning (floor 2, ceiling 8)
    pub fn new() -> Result<Self> {
        Self::with_config(&limeconf::SchedulerConfig::default())
    }

    /// Pool with explicit tuning.
    ///
    /// Failing to spawn the worker floor is fatal; everything after startup
    /// degrades gracefully instead.
    pub fn with_config(config: &limeconf::SchedulerConfig) -> Result<Self> {
        if config.worker_floor == 0 {
            bail!("scheduler worker floor must be at least 1");
        }
        if config.worker_ceiling < config.worker_floor {
            bail!(
                "scheduler ceiling {} below floor {}",
                config.worker_ceiling,
                config.worker_floor
            );
        }

        let inner = Arc::new(Inner {
            lanes: Mutex::new(Lanes {
                queues: Default::default(),
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            accepting: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            workers: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            ceiling: config.worker_ceiling,
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        });

        let threads = Arc::new(Mutex::new(Vec::new()));
        for index in 0..config.worker_floor {
            let handle = spawn_worker(&inner, index)
                .with_context(|| format!("failed to spawn worker {index} of the floor"))?;
            threads.lock().unwrap().push(handle);
        }

        let monitor = {
            let inner = inner.clone();
            let threads = threads.clone();
            let interval = Duration::from_millis(config.monitor_interval_ms.max(1));
            thread::Builder::new()
                .name("sched-monitor".into())
                .spawn(move || monitor_loop(inner, threads, interval))
                .context("failed to spawn scheduler monitor")?
        };

        info!(
            floor = config.worker_floor,
            ceiling = config.worker_ceiling,
            "scheduler started"
        );

        Ok(Self {
            inner,
            threads,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Queue a task at `priority`, returning its handle
    pub fn submit<F>(&self, priority: Priority, job: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = TaskHandle::new();
        let task = Task {
            job: Box::new(job),
            handle: handle.clone(),
            priority,
            enqueued: Instant::now(),
        };

        let mut lanes = self.inner.lanes.lock().unwrap();
        // Checked under the lanes lock: a push racing shutdown's final drain
        // would otherwise leave its handle Pending forever
        if !self.inner.accepting.load(Ordering::Relaxed) {
            drop(lanes);
            warn!("task submitted after shutdown began; cancelling");
            handle.shared.transition(TaskStatus::Cancelled);
            return handle;
        }
        lanes.queues[priority.lane()].push_back(task);
        drop(lanes);
        self.inner.available.notify_one();
        handle
    }

    /// CRITICAL convenience wrapper for latency-critical trigger work
    pub fn submit_realtime<F>(&self, job: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.submit(Priority::Critical, job)
    }

    /// HIGH convenience wrapper for direct user-interaction work
    pub fn submit_ui<F>(&self, job: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.submit(Priority::High, job)
    }

    pub fn stats(&self) -> SchedulerStats {
        let lanes = self.inner.lanes.lock().unwrap();
        let mut depth = [0usize; 4];
        for (i, queue) in lanes.queues.iter().enumerate() {
            depth[i] = queue.len();
        }
        drop(lanes);

        SchedulerStats {
            depth,
            workers: self.inner.workers.load(Ordering::Relaxed),
            busy: self.inner.busy.load(Ordering::Relaxed),
            executed: self.inner.executed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Drain all four queues (bounded by `timeout`), then stop and join every
    /// worker and the monitor.
    pub fn shutdown(&self, timeout: Duration) {
        self.inner.accepting.store(false, Ordering::Relaxed);

        let deadline = Instant::now() + timeout;
        let mut lanes = self.inner.lanes.lock().unwrap();
        while lanes.total() > 0 || self.inner.busy.load(Ordering::Relaxed) > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    remaining = lanes.total(),
                    busy = self.inner.busy.load(Ordering::Relaxed),
                    "shutdown drain timed out"
                );
                break;
            }
            let wait = (deadline - now).min(Duration::from_millis(50));
            let (next, _) = self.inner.idle.wait_timeout(lanes, wait).unwrap();
            lanes = next;
        }
        drop(lanes);

        self.inner.shutdown.store(true, Ordering::Relaxed);
        self.inner.available.notify_all();

        if let Some(monitor) = self.monitor.lock().unwrap().take() {
            let _ = monitor.join();
        }
        let workers: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
        info!(
            executed = self.inner.executed.load(Ordering::Relaxed),
            failed = self.inner.failed.load(Ordering::Relaxed),
            "scheduler stopped"
        );
    }
}

fn spawn_worker(inner: &Arc<Inner>, index: usize) -> std::io::Result<JoinHandle<()>> {
    let inner = inner.clone();
    let handle = thread::Builder::new()
        .name(format!("sched-worker-{index}"))
        .spawn(move || worker_loop(inner))?;
    Ok(handle)
}

fn worker_loop(inner: Arc<Inner>) {
    inner.workers.fetch_add(1, Ordering::Relaxed);
    loop {
        let task = {
            let mut lanes = inner.lanes.lock().unwrap();
            loop {
                if inner.shutdown.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(task) = claim(&mut lanes, &inner) {
                    break task;
                }
                let (next, _) = inner.available.wait_timeout(lanes, CLAIM_WAIT).unwrap();
                lanes = next;
            }
        };

        if !task.handle.shared.try_start() {
            // Cancelled between claim and start
            inner.cancelled.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        inner.busy.fetch_add(1, Ordering::Relaxed);
        let waited = task.enqueued.elapsed();
        debug!(
            task.id = %task.handle.id(),
            priority = %task.priority,
            waited_us = waited.as_micros() as u64,
            "task claimed"
        );

        match catch_unwind(AssertUnwindSafe(task.job)) {
            Ok(Ok(())) => {
                inner.executed.fetch_add(1, Ordering::Relaxed);
                task.handle.shared.transition(TaskStatus::Complete);
            }
            Ok(Err(e)) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                error!(task.id = %task.handle.id(), error = %e, "task failed");
                task.handle
                    .shared
                    .transition(TaskStatus::Failed(format!("{e:#}")));
            }
            Err(panic) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(panic);
                error!(task.id = %task.handle.id(), panic = %message, "task panicked");
                task.handle
                    .shared
                    .transition(TaskStatus::Failed(message));
            }
        }

        inner.busy.fetch_sub(1, Ordering::Relaxed);
        inner.idle.notify_all();
    }
}

/// Pop the highest-priority runnable task, discarding cancelled ones
fn claim(lanes: &mut Lanes, inner: &Inner) -> Option<Task> {
    for queue in lanes.queues.iter_mut() {
        while let Some(task) = queue.pop_front() {
            if task.handle.status() == TaskStatus::Cancelled {
                inner.cancelled.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            return Some(task);
        }
    }
    None
}

fn monitor_loop(inner: Arc<Inner>, threads: Arc<Mutex<Vec<JoinHandle<()>>>>, interval: Duration) {
    let mut next_index = inner.workers.load(Ordering::Relaxed);
    'sampling: loop {
        // Sleep in short steps so shutdown is not delayed by the interval
        let mut slept = Duration::ZERO;
        while slept < interval {
            if inner.shutdown.load(Ordering::Relaxed) {
                break 'sampling;
            }
            let step = (interval - slept).min(Duration::from_millis(50));
            thread::sleep(step);
            slept += step;
        }

        let depth = inner.lanes.lock().unwrap().total();
        let workers = inner.workers.load(Ordering::Relaxed);
        let busy = inner.busy.load(Ordering::Relaxed);
        debug!(depth, workers, busy, "scheduler monitor sample");

        if depth > workers * 2 && workers < inner.ceiling {
            match spawn_worker(&inner, next_index) {
                Ok(handle) => {
                    next_index += 1;
                    threads.lock().unwrap().push(handle);
                    info!(depth, workers = workers + 1, "pool grown by one worker");
                }
                Err(e) => warn!(error = %e, "failed to grow worker pool"),
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn single_worker() -> Scheduler {
        Scheduler::with_config(&limeconf::SchedulerConfig {
            worker_floor: 1,
            worker_ceiling: 1,
            monitor_interval_ms: 10_000,
        })
        .unwrap()
    }

    /// Submit a task that blocks the lone worker until `release` fires
    fn gate_worker(scheduler: &Scheduler) -> mpsc::Sender<()> {
        let (release, released) = mpsc::channel::<()>();
        scheduler.submit(Priority::Critical, move || {
            released.recv().ok();
            Ok(())
        });
        // Wait until the gate task is actually running
        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.stats().busy == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        release
    }

    #[test]
    fn test_priority_ordering_single_worker() {
        let scheduler = single_worker();
        let release = gate_worker(&scheduler);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for priority in [
            Priority::Low,
            Priority::Critical,
            Priority::Normal,
            Priority::High,
        ] {
            let order = order.clone();
            handles.push(scheduler.submit(priority, move || {
                order.lock().unwrap().push(priority);
                Ok(())
            }));
        }

        release.send(()).unwrap();
        for handle in &handles {
            assert_eq!(handle.wait(Duration::from_secs(2)), TaskStatus::Complete);
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Normal,
                Priority::Low
            ]
        );
        scheduler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_cancel_pending_prevents_execution() {
        let scheduler = single_worker();
        let release = gate_worker(&scheduler);

        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let ran = ran.clone();
            scheduler.submit(Priority::Normal, move || {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
        };
        assert!(handle.cancel());
        assert!(!handle.cancel()); // second cancel is a no-op

        release.send(()).unwrap();
        scheduler.shutdown(Duration::from_secs(1));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(handle.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_failure_recorded_and_worker_survives() {
        let scheduler = single_worker();

        let failing = scheduler.submit(Priority::Normal, || anyhow::bail!("lamp on fire"));
        let status = failing.wait(Duration::from_secs(2));
        assert!(matches!(status, TaskStatus::Failed(ref m) if m.contains("lamp on fire")));

        let next = scheduler.submit(Priority::Normal, || Ok(()));
        assert_eq!(next.wait(Duration::from_secs(2)), TaskStatus::Complete);

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.executed, 1);
        scheduler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_panic_caught() {
        let scheduler = single_worker();

        let handle = scheduler.submit(Priority::Normal, || panic!("bulb exploded"));
        let status = handle.wait(Duration::from_secs(2));
        assert!(matches!(status, TaskStatus::Failed(ref m) if m.contains("bulb exploded")));

        let next = scheduler.submit(Priority::Normal, || Ok(()));
        assert_eq!(next.wait(Duration::from_secs(2)), TaskStatus::Complete);
        scheduler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_drains_queues() {
        let scheduler = single_worker();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            scheduler.submit(Priority::Low, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        scheduler.shutdown(Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_submit_after_shutdown_is_cancelled() {
        let scheduler = single_worker();
        scheduler.shutdown(Duration::from_secs(1));
        let handle = scheduler.submit(Priority::Normal, || Ok(()));
        assert_eq!(handle.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_shutdown_racing_submits_leaves_no_pending_handle() {
        let scheduler = Arc::new(single_worker());
        let handles = Arc::new(Mutex::new(Vec::new()));

        let submitter = {
            let scheduler = scheduler.clone();
            let handles = handles.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let handle = scheduler.submit(Priority::Normal, || Ok(()));
                    handles.lock().unwrap().push(handle);
                }
            })
        };

        thread::sleep(Duration::from_millis(1));
        scheduler.shutdown(Duration::from_secs(5));
        submitter.join().unwrap();

        // Every handle resolved: drained tasks completed, late ones cancelled
        for handle in handles.lock().unwrap().iter() {
            let status = handle.wait(Duration::from_secs(1));
            assert!(status.is_terminal(), "handle stuck at {status:?}");
        }
    }

    #[test]
    fn test_monitor_grows_pool_under_load() {
        let scheduler = Scheduler::with_config(&limeconf::SchedulerConfig {
            worker_floor: 1,
            worker_ceiling: 4,
            monitor_interval_ms: 20,
        })
        .unwrap();

        for _ in 0..32 {
            scheduler.submit(Priority::Normal, || {
                thread::sleep(Duration::from_millis(30));
                Ok(())
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.stats().workers < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(scheduler.stats().workers >= 2, "pool never grew");
        assert!(scheduler.stats().workers <= 4);
        scheduler.shutdown(Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Scheduler::with_config(&limeconf::SchedulerConfig {
            worker_floor: 0,
            worker_ceiling: 4,
            monitor_interval_ms: 1000,
        })
        .is_err());
        assert!(Scheduler::with_config(&limeconf::SchedulerConfig {
            worker_floor: 4,
            worker_ceiling: 2,
            monitor_interval_ms: 1000,
        })
        .is_err());
    }
}
