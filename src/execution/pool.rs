//! Fixed-capacity worker pool with fork-join support.
//!
//! The pool runs two kinds of work on the same set of threads:
//! - jobs, submitted from outside with [`WorkerPool::submit`]
//! - forks, submitted from inside a running task with [`TaskContext::spawn`]
//!
//! Forks live on their own queue and workers always drain it first. A
//! worker that joins a fork handle keeps executing queued forks while it
//! waits ("help while joining"), so a task blocked on its children never
//! starves them, even with a single worker. Forked tasks must not fork
//! again and join; region bands never do.
//!
//! Lifecycle: `Running -> Draining -> Terminated`. Draining rejects new
//! jobs but still accepts forks from tasks already running. Termination
//! drops every queued task (their handles resolve to `Cancelled`), raises
//! the cancellation flag that running tasks poll, and joins all workers.

use crate::core::error::{ExecutionError, ExecutionResult, PoolError};
use crossbeam::channel::{self, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Identity of the pool the current thread works for, 0 if none.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PoolState {
    Running,
    Draining,
    Terminated,
}

/// Pool construction options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads (0 = logical core count).
    pub threads: usize,
    /// Prefix for worker thread names.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            name: "raster".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Worker count after resolving 0 to the host's logical core count.
    pub fn resolved_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Result of [`WorkerPool::await_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AwaitOutcome {
    /// Tasks that ran to completion (including ones that panicked).
    pub completed: usize,
    pub timed_out: bool,
}

/// Counters describing a pool's work so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub submitted: usize,
    pub completed: usize,
    pub panicked: usize,
    pub pending: usize,
    pub live_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    Jobs,
    Forks,
}

struct Shared {
    name: String,
    capacity: usize,
    state: Mutex<PoolState>,
    jobs_tx: Mutex<Option<Sender<Job>>>,
    forks_tx: Mutex<Option<Sender<Job>>>,
    jobs_rx: Receiver<Job>,
    forks_rx: Receiver<Job>,
    /// Tasks queued or running
    pending: Mutex<usize>,
    idle: Condvar,
    cancelled: AtomicBool,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    live_workers: AtomicUsize,
}

impl Shared {
    fn id(&self) -> usize {
        self as *const Shared as usize
    }

    fn is_current_worker(&self) -> bool {
        CURRENT_POOL.with(|current| current.get() == self.id())
    }

    fn enqueue<T, F>(self: &Arc<Self>, queue: Queue, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce(&TaskContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = channel::bounded(1);
        let ctx = TaskContext {
            shared: Arc::clone(self),
        };

        // State check and send happen under the state lock so termination
        // cannot interleave.
        let state = self.state.lock();
        let accepts = match queue {
            Queue::Jobs => *state == PoolState::Running,
            Queue::Forks => *state != PoolState::Terminated,
        };
        if !accepts {
            return Err(PoolError::PoolClosed);
        }
        let sender = match queue {
            Queue::Jobs => self.jobs_tx.lock().clone(),
            Queue::Forks => self.forks_tx.lock().clone(),
        };
        let Some(sender) = sender else {
            return Err(PoolError::PoolClosed);
        };

        let guard = PendingGuard::new(Arc::clone(self));
        let job: Job = Box::new(move || {
            let _guard = guard;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&ctx)));
            ctx.shared.completed.fetch_add(1, Ordering::Relaxed);
            let result = outcome.map_err(|payload| {
                ctx.shared.panicked.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(payload.as_ref());
                warn!("[{}] task panicked: {}", ctx.shared.name, message);
                ExecutionError::TaskFailed(format!("task panicked: {}", message))
            });
            let _ = result_tx.send(result);
        });

        sender.send(job).map_err(|_| PoolError::PoolClosed)?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        drop(state);

        Ok(TaskHandle {
            rx: result_rx,
            shared: Arc::clone(self),
        })
    }

    /// Drop every queued task. Returns how many were dropped.
    fn drain_queues(&self) -> usize {
        let mut dropped = 0;
        while let Ok(job) = self.forks_rx.try_recv() {
            drop(job);
            dropped += 1;
        }
        while let Ok(job) = self.jobs_rx.try_recv() {
            drop(job);
            dropped += 1;
        }
        dropped
    }
}

/// Decrements the pending count when a task finishes or is dropped unrun.
struct PendingGuard(Arc<Shared>);

impl PendingGuard {
    fn new(shared: Arc<Shared>) -> Self {
        *shared.pending.lock() += 1;
        Self(shared)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.0.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.0.idle.notify_all();
        }
    }
}

struct LiveWorker<'a>(&'a AtomicUsize);

impl Drop for LiveWorker<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    shared.live_workers.fetch_add(1, Ordering::SeqCst);
    let _live = LiveWorker(&shared.live_workers);
    CURRENT_POOL.with(|current| current.set(shared.id()));
    debug!("[{}] worker {} started", shared.name, index);

    loop {
        let job = match shared.forks_rx.try_recv() {
            Ok(job) => Ok(job),
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => select! {
                recv(shared.forks_rx) -> job => job,
                recv(shared.jobs_rx) -> job => job,
            },
        };
        // Both senders are dropped together, so one closed queue means shutdown.
        let Ok(job) = job else { break };
        if shared.cancelled.load(Ordering::SeqCst) {
            drop(job);
            continue;
        }
        job();
    }

    CURRENT_POOL.with(|current| current.set(0));
    debug!("[{}] worker {} stopped", shared.name, index);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A bounded pool of worker threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the pool's workers. Capacity is fixed for the pool's lifetime.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let capacity = config.resolved_threads();
        let (jobs_tx, jobs_rx) = channel::unbounded();
        let (forks_tx, forks_rx) = channel::unbounded();

        let shared = Arc::new(Shared {
            name: config.name,
            capacity,
            state: Mutex::new(PoolState::Running),
            jobs_tx: Mutex::new(Some(jobs_tx)),
            forks_tx: Mutex::new(Some(forks_tx)),
            jobs_rx,
            forks_rx,
            pending: Mutex::new(0),
            idle: Condvar::new(),
            cancelled: AtomicBool::new(false),
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(capacity)),
        };
        for index in 0..capacity {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", pool.shared.name, index))
                .spawn(move || worker_loop(shared, index))?;
            pool.workers.lock().push(handle);
        }

        info!("[{}] worker pool started with {} threads", pool.shared.name, capacity);
        Ok(pool)
    }

    /// Pool with default configuration (one worker per logical core).
    pub fn with_default_capacity() -> Result<Self, PoolError> {
        Self::new(PoolConfig::default())
    }

    /// Queue a task. Fails with `PoolClosed` once `shutdown` or `terminate`
    /// has been called.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce(&TaskContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.shared.enqueue(Queue::Jobs, task)
    }

    /// Stop accepting new jobs. Queued and running tasks keep going.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if *state == PoolState::Running {
            *state = PoolState::Draining;
            info!("[{}] draining", self.shared.name);
        }
    }

    /// Block until every submitted task has finished or `timeout` elapses.
    ///
    /// On timeout the pool is terminated. When the pool is draining and all
    /// work finishes in time, it moves to `Terminated` as well. Must not be
    /// called from one of the pool's own tasks.
    pub fn await_all(&self, timeout: Duration) -> AwaitOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            let Some(deadline) = deadline else {
                self.shared.idle.wait(&mut pending);
                continue;
            };
            let result = self.shared.idle.wait_until(&mut pending, deadline);
            if result.timed_out() && *pending > 0 {
                let outstanding = *pending;
                drop(pending);
                warn!(
                    "[{}] {} task(s) still pending after {:?}, terminating",
                    self.shared.name, outstanding, timeout
                );
                self.terminate();
                return AwaitOutcome {
                    completed: self.shared.completed.load(Ordering::SeqCst),
                    timed_out: true,
                };
            }
        }
        drop(pending);

        if self.state() == PoolState::Draining {
            self.close(false);
        }
        AwaitOutcome {
            completed: self.shared.completed.load(Ordering::SeqCst),
            timed_out: false,
        }
    }

    /// Cancel all outstanding work and stop every worker.
    ///
    /// Queued tasks are dropped; running tasks see `is_cancelled()` and are
    /// waited for.
    pub fn terminate(&self) {
        self.close(true);
    }

    fn close(&self, cancel: bool) {
        if cancel {
            self.shared.cancelled.store(true, Ordering::SeqCst);
        }
        {
            let mut state = self.shared.state.lock();
            if *state != PoolState::Terminated {
                info!("[{}] terminating", self.shared.name);
            }
            *state = PoolState::Terminated;
            self.shared.jobs_tx.lock().take();
            self.shared.forks_tx.lock().take();
        }

        let dropped = self.shared.drain_queues();
        if dropped > 0 {
            warn!("[{}] dropped {} queued task(s)", self.shared.name, dropped);
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("[{}] worker thread exited abnormally", self.shared.name);
            }
        }
    }

    pub fn state(&self) -> PoolState {
        *self.shared.state.lock()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Worker threads currently alive.
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.shared.capacity,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
            pending: *self.shared.pending.lock(),
            live_workers: self.live_workers(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.state() != PoolState::Terminated || !self.workers.lock().is_empty() {
            self.terminate();
        }
    }
}

/// Handle given to every running task.
#[derive(Clone)]
pub struct TaskContext {
    shared: Arc<Shared>,
}

impl TaskContext {
    /// Fork a sub-task onto the pool. Join the returned handle to wait for it.
    pub fn spawn<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce(&TaskContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.shared.enqueue(Queue::Forks, task)
    }

    /// Whether the pool has been force-terminated.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the pool has been force-terminated.
    pub fn check_cancelled(&self) -> ExecutionResult<()> {
        if self.is_cancelled() {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("pool", &self.shared.name)
            .finish()
    }
}

/// Completion handle for a submitted task.
///
/// Resolves to the task's value, `TaskFailed` if it panicked, or
/// `Cancelled` if it was dropped before running.
pub struct TaskHandle<T> {
    rx: Receiver<ExecutionResult<T>>,
    shared: Arc<Shared>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes.
    ///
    /// Called from one of the pool's workers, this runs queued forks while
    /// waiting.
    pub fn join(self) -> ExecutionResult<T> {
        if !self.shared.is_current_worker() {
            return self.rx.recv().unwrap_or(Err(ExecutionError::Cancelled));
        }

        loop {
            match self.rx.try_recv() {
                Ok(result) => return result,
                Err(TryRecvError::Disconnected) => return Err(ExecutionError::Cancelled),
                Err(TryRecvError::Empty) => {}
            }
            select! {
                recv(self.rx) -> result => {
                    return result.unwrap_or(Err(ExecutionError::Cancelled));
                }
                recv(self.shared.forks_rx) -> job => match job {
                    Ok(job) if !self.shared.cancelled.load(Ordering::SeqCst) => job(),
                    Ok(job) => drop(job),
                    Err(_) => {
                        return self.rx.recv().unwrap_or(Err(ExecutionError::Cancelled));
                    }
                },
            }
        }
    }

    /// Wait until `deadline` at most. `None` means the task is still
    /// outstanding; once a result has been returned the handle is spent.
    pub fn wait_deadline(&self, deadline: Instant) -> Option<ExecutionResult<T>> {
        match self.rx.recv_deadline(deadline) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ExecutionError::Cancelled)),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("pool", &self.shared.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(threads: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig::new().with_threads(threads).with_name("test")).unwrap()
    }

    #[test]
    fn test_submit_and_join() {
        let pool = pool(2);
        let handles: Vec<_> = (0..10).map(|i| pool.submit(move |_| i * 2).unwrap()).collect();
        let sum: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(sum, 90);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_wait_deadline_on_pending_task() {
        let pool = pool(1);
        let (release, gate) = channel::bounded::<()>(0);
        let handle = pool
            .submit(move |_| {
                let _ = gate.recv();
                7
            })
            .unwrap();

        assert!(handle.wait_deadline(Instant::now() + Duration::from_millis(20)).is_none());

        release.send(()).unwrap();
        let result = handle.wait_deadline(Instant::now() + Duration::from_secs(5));
        assert!(matches!(result, Some(Ok(7))));
    }

    #[test]
    fn test_default_capacity_is_core_count() {
        let config = PoolConfig::default();
        assert!(config.resolved_threads() >= 1);
        assert_eq!(PoolConfig::new().with_threads(3).resolved_threads(), 3);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = pool(2);
        pool.shutdown();
        assert_eq!(pool.state(), PoolState::Draining);
        assert!(matches!(pool.submit(|_| ()), Err(PoolError::PoolClosed)));

        let outcome = pool.await_all(Duration::from_secs(5));
        assert!(!outcome.timed_out);
        assert_eq!(pool.state(), PoolState::Terminated);
        assert!(matches!(pool.submit(|_| ()), Err(PoolError::PoolClosed)));
    }

    #[test]
    fn test_shutdown_lets_queued_work_finish() {
        let pool = pool(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit(move |_| {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        let outcome = pool.await_all(Duration::from_secs(10));
        assert!(!outcome.timed_out);
        assert_eq!(outcome.completed, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_await_all_timeout_terminates_workers() {
        let pool = pool(2);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                pool.submit(|ctx| {
                    while !ctx.is_cancelled() {
                        thread::sleep(Duration::from_millis(2));
                    }
                })
                .unwrap()
            })
            .collect();

        let outcome = pool.await_all(Duration::from_millis(50));
        assert!(outcome.timed_out);
        assert_eq!(pool.state(), PoolState::Terminated);
        assert_eq!(pool.live_workers(), 0);
        assert!(matches!(pool.submit(|_| ()), Err(PoolError::PoolClosed)));

        // Two tasks were running and observed cancellation; two were dropped.
        let results: Vec<_> = handles.into_iter().map(TaskHandle::join).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ExecutionError::Cancelled)))
                .count(),
            2
        );
    }

    #[test]
    fn test_panic_is_isolated() {
        let pool = pool(1);
        let bad = pool.submit(|_| -> u32 { panic!("boom") }).unwrap();
        let good = pool.submit(|_| 7u32).unwrap();

        match bad.join() {
            Err(ExecutionError::TaskFailed(message)) => assert!(message.contains("boom")),
            other => panic!("expected TaskFailed, got {:?}", other),
        }
        assert_eq!(good.join().unwrap(), 7);
        assert_eq!(pool.stats().panicked, 1);
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_fork_join_single_worker() {
        let pool = pool(1);
        let handle = pool
            .submit(|ctx| {
                let forks: Vec<_> = (0..8u64)
                    .map(|i| ctx.spawn(move |_| i * i).unwrap())
                    .collect();
                forks.into_iter().map(|h| h.join().unwrap()).sum::<u64>()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), 140);
    }

    #[test]
    fn test_many_jobs_forking_at_low_capacity() {
        let pool = pool(2);
        let handles: Vec<_> = (0..6u64)
            .map(|job| {
                pool.submit(move |ctx| {
                    let forks: Vec<_> = (0..4u64)
                        .map(|band| ctx.spawn(move |_| job * 10 + band).unwrap())
                        .collect();
                    forks.into_iter().map(|h| h.join().unwrap()).sum::<u64>()
                })
                .unwrap()
            })
            .collect();
        let totals: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(totals, vec![6, 46, 86, 126, 166, 206]);
    }

    #[test]
    fn test_draining_accepts_forks() {
        let pool = pool(1);
        let (go_tx, go_rx) = channel::bounded::<()>(0);
        let handle = pool
            .submit(move |ctx| {
                let _ = go_rx.recv();
                ctx.spawn(|_| 5).map(|h| h.join())
            })
            .unwrap();
        pool.shutdown();
        go_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap().unwrap().unwrap(), 5);
    }

    #[test]
    fn test_worker_thread_names() {
        let pool = pool(1);
        let name = pool
            .submit(|_| thread::current().name().map(str::to_string))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-0"));
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = pool(2);
        let shared = Arc::clone(&pool.shared);
        drop(pool);
        assert_eq!(shared.live_workers.load(Ordering::SeqCst), 0);
    }
}
