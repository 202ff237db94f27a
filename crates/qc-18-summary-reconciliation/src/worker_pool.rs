//! # Worker Pool
//!
//! Bounded concurrency for the per-key apply loops of one batch.
//!
//! The pool is owned by one engine instance. Jobs run as tokio tasks, at most
//! `size` at a time; a task waiting in backoff holds its permit but no thread.
//! Shutdown stops new admissions; work admitted before it runs to the end.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::domain::{ReconciliationError, ReconciliationResult};

/// Engine-owned pool of apply workers.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Pool running at most `size` jobs concurrently (minimum 1).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Maximum concurrent jobs.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Refuse further submissions.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Admit one unit of work (a batch). Fails once `shutdown` was called;
    /// an admission taken before that stays valid.
    pub fn admit(&self) -> ReconciliationResult<Admission<'_>> {
        if self.is_shut_down() {
            return Err(ReconciliationError::ShutDown);
        }
        Ok(Admission { pool: self })
    }

    /// Admit and run `jobs`. See [`Admission::run_all`].
    pub async fn run_all<F, T>(&self, jobs: Vec<F>) -> ReconciliationResult<Vec<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.admit()?.run_all(jobs).await
    }
}

/// Permission to run jobs on a pool, granted before shutdown.
#[derive(Debug)]
pub struct Admission<'a> {
    pool: &'a WorkerPool,
}

impl Admission<'_> {
    /// Run every job and return their results in submission order.
    ///
    /// Waits for all jobs even if one of them fails, so that no job is still
    /// writing when the caller acts on the results.
    pub async fn run_all<F, T>(&self, jobs: Vec<F>) -> ReconciliationResult<Vec<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let permits = Arc::clone(&self.pool.permits);
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    job.await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut failure = None;
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    failure
                        .get_or_insert_with(|| ReconciliationError::WorkerFailed(e.to_string()));
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }
}
