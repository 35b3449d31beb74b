// src/runtime/dispatcher.rs
//! Bounded worker pools shared by the task and tool executors
//!
//! Both variants start jobs in submission order and never run more than
//! `capacity` jobs at once. Jobs beyond capacity wait in a FIFO queue.
//!
//! ```text
//! NativeDispatcher                       FallbackDispatcher
//! submit ─▶ mpsc ─▶ dispatch loop        submit ─▶ crossbeam queue
//!                   │ acquire permit               │
//!                   ▼                              ▼
//!           spawn_blocking(job)          N std worker threads
//! ```
//!
//! Callers wait for results on their own channel; a dispatcher never holds
//! a reference to the caller, so an abandoned job simply finishes (or is
//! skipped) without anyone listening.

use crate::backend::Backend;
use crate::utils::errors::{EngineError, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, trace, warn};

/// Unit of work handed to a dispatcher
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded FIFO worker pool
pub trait Dispatcher: Send + Sync {
    /// Queue a job; it starts once a worker is free
    fn submit(&self, job: Job) -> Result<()>;

    /// Maximum number of jobs running at once
    fn capacity(&self) -> usize;

    /// Which implementation this is
    fn backend(&self) -> Backend;

    fn stats(&self) -> DispatcherStats;
}

/// Dispatcher statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub capacity: usize,
    pub submitted: u64,
    pub started: u64,
    pub finished: u64,
}

impl DispatcherStats {
    /// Jobs waiting for a worker
    pub fn queued(&self) -> u64 {
        self.submitted.saturating_sub(self.started)
    }

    /// Jobs currently on a worker
    pub fn running(&self) -> u64 {
        self.started.saturating_sub(self.finished)
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    started: AtomicU64,
    finished: AtomicU64,
}

impl Counters {
    fn snapshot(&self, capacity: usize) -> DispatcherStats {
        DispatcherStats {
            capacity,
            submitted: self.submitted.load(Ordering::SeqCst),
            started: self.started.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
        }
    }

    /// Run a job on the current worker. A panicking job must not take the
    /// worker down with it.
    fn run(&self, job: Job) {
        self.started.fetch_add(1, Ordering::SeqCst);
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Dispatched job panicked");
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build the dispatcher for `backend`, degrading to the fallback pool when
/// the native runtime cannot start.
pub fn build_dispatcher(backend: Backend, capacity: usize) -> Result<Arc<dyn Dispatcher>> {
    if backend.is_native() {
        match NativeDispatcher::new(capacity) {
            Ok(dispatcher) => return Ok(Arc::new(dispatcher)),
            Err(e) => warn!("Native dispatcher unavailable, using fallback: {}", e),
        }
    }
    Ok(Arc::new(FallbackDispatcher::new(capacity)?))
}

/// Worker pool on a dedicated tokio runtime
pub struct NativeDispatcher {
    runtime: Option<Runtime>,
    sender: mpsc::UnboundedSender<Job>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl NativeDispatcher {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(capacity)
            .thread_name("accelerate-native")
            .enable_all()
            .build()
            .map_err(|e| EngineError::BackendUnavailable(format!("tokio runtime: {}", e)))?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let semaphore = Arc::new(Semaphore::new(capacity));
        let counters = Arc::new(Counters::default());

        let loop_counters = Arc::clone(&counters);
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                // Backpressure: the next job waits here until a slot frees,
                // so start order is submission order.
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let counters = Arc::clone(&loop_counters);
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    counters.run(job);
                });
            }
            trace!("Native dispatch loop stopped");
        });

        debug!("Native dispatcher started with capacity {}", capacity);

        Ok(Self {
            runtime: Some(runtime),
            sender,
            capacity,
            counters,
        })
    }
}

impl Dispatcher for NativeDispatcher {
    fn submit(&self, job: Job) -> Result<()> {
        self.sender.send(job).map_err(|_| {
            EngineError::execution("native dispatcher", "worker pool has shut down")
        })?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn backend(&self) -> Backend {
        Backend::Native
    }

    fn stats(&self) -> DispatcherStats {
        self.counters.snapshot(self.capacity)
    }
}

impl Drop for NativeDispatcher {
    fn drop(&mut self) {
        // Abandoned jobs may still be running; never block on them.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Worker pool of plain OS threads sharing one FIFO queue
pub struct FallbackDispatcher {
    sender: crossbeam_channel::Sender<Job>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl FallbackDispatcher {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let counters = Arc::new(Counters::default());

        for worker_id in 0..capacity {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            std::thread::Builder::new()
                .name(format!("accelerate-fallback-{}", worker_id))
                .spawn(move || {
                    // Exits once every sender is gone and the queue is drained
                    while let Ok(job) = receiver.recv() {
                        counters.run(job);
                    }
                    trace!("Fallback worker {} stopped", worker_id);
                })
                .map_err(|e| {
                    EngineError::execution("fallback dispatcher", format!("spawn worker: {}", e))
                })?;
        }

        debug!("Fallback dispatcher started with {} workers", capacity);

        Ok(Self {
            sender,
            capacity,
            counters,
        })
    }
}

impl Dispatcher for FallbackDispatcher {
    fn submit(&self, job: Job) -> Result<()> {
        self.sender.send(job).map_err(|_| {
            EngineError::execution("fallback dispatcher", "worker pool has shut down")
        })?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn backend(&self) -> Backend {
        Backend::Fallback
    }

    fn stats(&self) -> DispatcherStats {
        self.counters.snapshot(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn dispatchers(capacity: usize) -> Vec<Arc<dyn Dispatcher>> {
        vec![
            Arc::new(NativeDispatcher::new(capacity).unwrap()),
            Arc::new(FallbackDispatcher::new(capacity).unwrap()),
        ]
    }

    #[test]
    fn test_runs_all_jobs() {
        for dispatcher in dispatchers(3) {
            let (tx, rx) = crossbeam_channel::unbounded();
            for i in 0..20 {
                let tx = tx.clone();
                dispatcher
                    .submit(Box::new(move || {
                        tx.send(i).unwrap();
                    }))
                    .unwrap();
            }
            drop(tx);

            let mut seen: Vec<i32> = rx.iter().collect();
            seen.sort();
            assert_eq!(seen, (0..20).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_concurrency_bound() {
        for dispatcher in dispatchers(2) {
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let (tx, rx) = crossbeam_channel::unbounded();

            for _ in 0..8 {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let tx = tx.clone();
                dispatcher
                    .submit(Box::new(move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        tx.send(()).unwrap();
                    }))
                    .unwrap();
            }
            drop(tx);

            assert_eq!(rx.iter().count(), 8);
            assert!(peak.load(Ordering::SeqCst) <= 2);
        }
    }

    #[test]
    fn test_fifo_start_order_with_single_worker() {
        for dispatcher in dispatchers(1) {
            let (tx, rx) = crossbeam_channel::unbounded();
            for i in 0..10 {
                let tx = tx.clone();
                dispatcher
                    .submit(Box::new(move || {
                        tx.send(i).unwrap();
                    }))
                    .unwrap();
            }
            drop(tx);

            let order: Vec<i32> = rx.iter().collect();
            assert_eq!(order, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        for dispatcher in dispatchers(1) {
            dispatcher.submit(Box::new(|| panic!("boom"))).unwrap();

            let (tx, rx) = crossbeam_channel::bounded(1);
            dispatcher
                .submit(Box::new(move || {
                    tx.send(42).unwrap();
                }))
                .unwrap();

            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        }
    }

    #[test]
    fn test_stats() {
        for dispatcher in dispatchers(2) {
            let (tx, rx) = crossbeam_channel::unbounded();
            for _ in 0..4 {
                let tx = tx.clone();
                dispatcher
                    .submit(Box::new(move || {
                        tx.send(()).unwrap();
                    }))
                    .unwrap();
            }
            drop(tx);
            assert_eq!(rx.iter().count(), 4);

            let stats = dispatcher.stats();
            assert_eq!(stats.capacity, 2);
            assert_eq!(stats.submitted, 4);
        }
    }

    #[test]
    fn test_build_dispatcher_backend() {
        let native = build_dispatcher(Backend::Native, 2).unwrap();
        assert_eq!(native.backend(), Backend::Native);

        let fallback = build_dispatcher(Backend::Fallback, 2).unwrap();
        assert_eq!(fallback.backend(), Backend::Fallback);
    }
}
