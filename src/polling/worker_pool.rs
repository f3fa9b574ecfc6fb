//! Bounded worker pool shared by fetches and discovery scans
//!
//! Submission never blocks: every job is spawned immediately and waits for a
//! semaphore permit before running. Jobs waiting for a permit show up as
//! `queued` in [`PoolStats`]; nothing is rejected or dropped.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Maximum concurrently running jobs
    pub size: usize,

    /// Total jobs submitted
    pub submitted: u64,

    /// Jobs that ran to completion
    pub completed: u64,

    /// Jobs waiting for a worker
    pub queued: usize,

    /// Jobs currently running
    pub in_flight: usize,

    /// Highest `queued` value observed
    pub peak_queued: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    peak_queued: AtomicUsize,
}

/// Decrements `in_flight` even if the job panics
struct InFlightGuard(Arc<PoolCounters>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-size async worker pool
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    warn_threshold: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once
    pub fn new(size: usize, warn_threshold: usize) -> Self {
        let size = size.max(1);
        info!("Worker pool started with {} workers", size);
        Self {
            size,
            warn_threshold,
            semaphore: Arc::new(Semaphore::new(size)),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Submit a job; the handle yields `None` if the pool shut down first
    pub fn submit<F, T>(&self, job: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let counters = self.counters.clone();
        let semaphore = self.semaphore.clone();

        counters.submitted.fetch_add(1, Ordering::Relaxed);
        let queued = counters.queued.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak_queued.fetch_max(queued, Ordering::AcqRel);
        if queued == self.warn_threshold {
            warn!(
                queued,
                size = self.size,
                "Worker pool saturated, jobs are queueing"
            );
        }

        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            counters.queued.fetch_sub(1, Ordering::AcqRel);
            let _permit = permit.ok()?;

            counters.in_flight.fetch_add(1, Ordering::AcqRel);
            let _guard = InFlightGuard(counters.clone());
            let output = job.await;
            counters.completed.fetch_add(1, Ordering::Relaxed);
            Some(output)
        })
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Acquire),
            in_flight: self.counters.in_flight.load(Ordering::Acquire),
            peak_queued: self.counters.peak_queued.load(Ordering::Acquire),
        }
    }

    /// Stop accepting work; queued jobs resolve to `None`
    pub fn shutdown(&self) {
        self.semaphore.close();
        info!("Worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.semaphore.is_closed()
    }
}
