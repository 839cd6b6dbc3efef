//! Bounded worker pool with per-job timeout and cancellation.
//!
//! Every dispatched job runs on its own Tokio task that owns one semaphore
//! permit for its whole lifetime. Outcomes and progress are delivered on a
//! single channel, so the consumer (the dispatcher) sees one ordered stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atrium_core::job::{JobDescriptor, ProgressUpdate};
use atrium_db::DbPool;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerPoolConfig;
use crate::launcher::{self, LaunchResult, WorkerLauncher};

/// How a dispatched job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    /// The worker reported success with this data.
    Succeeded(serde_json::Value),
    /// The worker reported failure with this error.
    Failed(String),
    /// The job exceeded the pool's timeout and was stopped.
    TimedOut(Duration),
    /// The job was cancelled through [`WorkerPool::cancel`].
    Cancelled,
    /// The worker ended without a terminal message.
    Crashed(String),
    /// The worker could not be started.
    SpawnFailed(String),
}

/// Final result of one dispatched job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub worker_id: String,
    pub kind: OutcomeKind,
    pub elapsed: Duration,
}

/// Message from the pool to its consumer.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Progress(ProgressUpdate),
    /// Sent exactly once per dispatched job, after all of its progress.
    Finished(JobOutcome),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job {0} is already running")]
    AlreadyRunning(String),
}

pub struct WorkerPool {
    launcher: Arc<dyn WorkerLauncher>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    job_timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
    events: mpsc::UnboundedSender<PoolEvent>,
    next_slot: AtomicU64,
}

impl WorkerPool {
    /// Create a pool and the receiver for its events.
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        concurrency: usize,
        job_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let concurrency = concurrency.max(1);
        let (events, rx) = mpsc::unbounded_channel();
        let pool = Self {
            launcher,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            job_timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_slot: AtomicU64::new(1),
        };
        (pool, rx)
    }

    /// Create a pool whose launcher follows `config.mode`.
    pub fn from_config(
        config: &WorkerPoolConfig,
        db: &DbPool,
    ) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        Self::new(
            launcher::from_config(config, db),
            config.concurrency,
            config.job_timeout,
        )
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    /// Take a free slot, if there is one.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Label for the next worker, e.g. `worker-3`.
    pub fn next_worker_id(&self) -> String {
        format!("worker-{}", self.next_slot.fetch_add(1, Ordering::Relaxed))
    }

    /// Start `descriptor` on a new task that holds `permit` until it ends.
    ///
    /// Returns immediately. The outcome arrives later as
    /// [`PoolEvent::Finished`].
    pub async fn dispatch(
        &self,
        permit: OwnedSemaphorePermit,
        descriptor: JobDescriptor,
        worker_id: String,
    ) -> Result<(), DispatchError> {
        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&descriptor.job_id) {
                return Err(DispatchError::AlreadyRunning(descriptor.job_id));
            }
            in_flight.insert(descriptor.job_id.clone(), token.clone());
        }

        let launcher = Arc::clone(&self.launcher);
        let in_flight = Arc::clone(&self.in_flight);
        let events = self.events.clone();
        let job_timeout = self.job_timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

            let forward_events = events.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(update) = progress_rx.recv().await {
                    let _ = forward_events.send(PoolEvent::Progress(update));
                }
            });

            // The launch is polled first: a result that is ready wins over a
            // cancellation that arrived in the same poll.
            let kind = tokio::select! {
                biased;
                result = tokio::time::timeout(
                    job_timeout,
                    launcher.launch(&descriptor, &worker_id, progress_tx),
                ) => match result {
                    Ok(launched) => outcome_of(launched),
                    Err(_) => OutcomeKind::TimedOut(job_timeout),
                },
                _ = token.cancelled() => OutcomeKind::Cancelled,
            };

            // All progress for this job is delivered before its outcome.
            let _ = forwarder.await;

            let outcome = JobOutcome {
                job_id: descriptor.job_id,
                worker_id,
                kind,
                elapsed: started.elapsed(),
            };
            tracing::debug!(
                job_id = %outcome.job_id,
                worker_id = %outcome.worker_id,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Worker finished",
            );
            // Leaving the in-flight set and sending the outcome happen under
            // one lock, so an empty set means every outcome is queued.
            let mut in_flight = in_flight.lock().await;
            in_flight.remove(&outcome.job_id);
            drop(permit);
            let _ = events.send(PoolEvent::Finished(outcome));
        });

        Ok(())
    }

    /// Stop a running job. Returns `false` if it is not in flight.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.in_flight.lock().await.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every running job.
    pub async fn cancel_all(&self) {
        for token in self.in_flight.lock().await.values() {
            token.cancel();
        }
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.in_flight.lock().await.contains_key(job_id)
    }

    /// Ids of the jobs currently in flight, in no particular order.
    pub async fn in_flight_ids(&self) -> Vec<String> {
        self.in_flight.lock().await.keys().cloned().collect()
    }
}

fn outcome_of(result: LaunchResult) -> OutcomeKind {
    match result {
        LaunchResult::Reported(msg) if msg.success => {
            OutcomeKind::Succeeded(msg.data.unwrap_or_else(|| serde_json::json!({})))
        }
        LaunchResult::Reported(msg) => OutcomeKind::Failed(
            msg.error
                .unwrap_or_else(|| "worker reported failure without an error".into()),
        ),
        LaunchResult::Crashed(reason) => OutcomeKind::Crashed(reason),
        LaunchResult::SpawnFailed(reason) => OutcomeKind::SpawnFailed(reason),
    }
}
