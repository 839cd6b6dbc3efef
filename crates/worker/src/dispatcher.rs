//! Background job dispatcher.
//!
//! Polls for pending jobs every `poll_interval` and hands them to the
//! [`WorkerPool`]. Uses `SELECT FOR UPDATE SKIP LOCKED` via
//! [`JobRepo::claim_next`] to prevent double-dispatch, and claims only while
//! the pool has a free slot.
//!
//! The dispatcher is the only writer of terminal job state: workers report,
//! the dispatcher applies the report with a guarded transition. A report for
//! a job that is no longer `running` (cancelled meanwhile) is discarded.
//!
//! Rows left `running` by a worker that no longer exists are failed by the
//! orphan sweep, once at start-up and then every `orphan_sweep_interval`.

use std::sync::Arc;
use std::time::Duration;

use atrium_core::types::{whole_secs, DbId};
use atrium_db::models::status::JobStatus;
use atrium_db::repositories::JobRepo;
use atrium_events::{EventBus, JobEvent};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::pool::{JobOutcome, OutcomeKind, PoolEvent, WorkerPool};

/// Error written to running jobs that no live worker is executing.
pub const ORPHANED_JOB_ERROR: &str = "worker lost: job was still running with no live worker";

/// Error written to jobs stopped by a dispatcher shutdown.
pub const SHUTDOWN_JOB_ERROR: &str = "job interrupted by dispatcher shutdown";

/// How long shutdown waits for in-flight jobs to report.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct JobDispatcher {
    pool: PgPool,
    workers: Arc<WorkerPool>,
    events: Arc<EventBus>,
    config: DispatcherConfig,
}

impl JobDispatcher {
    pub fn new(
        pool: PgPool,
        workers: Arc<WorkerPool>,
        events: Arc<EventBus>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            pool,
            workers,
            events,
            config,
        }
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    ///
    /// `pool_events` is the receiver returned alongside the worker pool.
    pub async fn run(
        self,
        mut pool_events: mpsc::UnboundedReceiver<PoolEvent>,
        cancel: CancellationToken,
    ) {
        self.sweep_orphans(&mut pool_events).await;

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let sweep_every = self.config.orphan_sweep_interval;
        let mut sweeper =
            tokio::time::interval_at(tokio::time::Instant::now() + sweep_every, sweep_every);
        sweeper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            concurrency = self.workers.concurrency(),
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                Some(event) = pool_events.recv() => {
                    let freed_slot = matches!(event, PoolEvent::Finished(_));
                    self.handle_pool_event(event, false).await;
                    if freed_slot {
                        self.dispatch_available().await;
                    }
                }
                _ = ticker.tick() => {
                    self.dispatch_available().await;
                }
                _ = sweeper.tick() => {
                    self.sweep_orphans(&mut pool_events).await;
                }
            }
        }

        self.drain(&mut pool_events).await;
    }

    /// Fail running jobs older than the grace period that this dispatcher's
    /// pool is not executing.
    ///
    /// A job leaves the in-flight set when its outcome is queued, so queued
    /// events are applied after taking the snapshot and before the update:
    /// a job missing from the snapshot is then either finished in the
    /// database or really orphaned.
    async fn sweep_orphans(&self, pool_events: &mut mpsc::UnboundedReceiver<PoolEvent>) {
        let grace = chrono::Duration::from_std(self.config.orphan_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = chrono::Utc::now() - grace;
        let live: Vec<DbId> = self
            .workers
            .in_flight_ids()
            .await
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        while let Ok(event) = pool_events.try_recv() {
            self.handle_pool_event(event, false).await;
        }

        match JobRepo::fail_orphaned(&self.pool, cutoff, &live, ORPHANED_JOB_ERROR).await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Failed orphaned running jobs"),
            Err(e) => tracing::error!(error = %e, "Orphan recovery failed"),
        }
    }

    /// Claim and dispatch pending jobs while the pool has free slots.
    async fn dispatch_available(&self) {
        while let Some(permit) = self.workers.try_acquire() {
            let worker_id = self.workers.next_worker_id();
            let job = match JobRepo::claim_next(&self.pool, &worker_id).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch cycle failed");
                    break;
                }
            };

            tracing::info!(
                job_id = job.id,
                worker_id = %worker_id,
                job_type = %job.job_type,
                "Job claimed by worker",
            );

            let descriptor = match job.descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    self.fail(job.id, &e.to_string()).await;
                    continue;
                }
            };

            self.events.publish(JobEvent::claimed(job.id, &worker_id));
            match self.workers.dispatch(permit, descriptor, worker_id).await {
                Ok(()) => self.stop_if_no_longer_running(job.id).await,
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Failed to dispatch job");
                    self.fail(job.id, &e.to_string()).await;
                }
            }
        }
    }

    /// Stop the worker of a job that left `running` before it was in flight.
    ///
    /// A cancel that lands between the claim and the dispatch finds no worker
    /// to stop, so the row is read again once the worker is registered.
    async fn stop_if_no_longer_running(&self, job_id: DbId) {
        match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) if job.status() == Some(JobStatus::Running) => {}
            Ok(_) => {
                tracing::info!(job_id, "Job left running state before its worker started");
                self.workers.cancel(&job_id.to_string()).await;
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to re-check dispatched job");
            }
        }
    }

    async fn handle_pool_event(&self, event: PoolEvent, shutting_down: bool) {
        match event {
            PoolEvent::Progress(update) => {
                let Some(job_id) = parse_job_id(&update.job_id) else {
                    return;
                };
                match JobRepo::update_progress(
                    &self.pool,
                    job_id,
                    update.percent,
                    update.message.as_deref(),
                )
                .await
                {
                    Ok(true) => self.events.publish(JobEvent::progress(
                        job_id,
                        update.percent,
                        update.message,
                    )),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(job_id, error = %e, "Failed to record job progress");
                    }
                }
            }
            PoolEvent::Finished(outcome) => self.apply_outcome(outcome, shutting_down).await,
        }
    }

    /// Write the terminal state for one finished job.
    async fn apply_outcome(&self, outcome: JobOutcome, shutting_down: bool) {
        let Some(job_id) = parse_job_id(&outcome.job_id) else {
            return;
        };
        let elapsed_ms = outcome.elapsed.as_millis() as u64;

        match outcome.kind {
            OutcomeKind::Succeeded(data) => {
                match JobRepo::mark_completed(&self.pool, job_id, &data).await {
                    Ok(true) => {
                        tracing::info!(job_id, worker_id = %outcome.worker_id, elapsed_ms, "Job completed");
                        self.events.publish(JobEvent::completed(job_id));
                    }
                    Ok(false) => {
                        tracing::info!(job_id, "Discarding result for job that is no longer running");
                    }
                    Err(e) => tracing::error!(job_id, error = %e, "Failed to complete job"),
                }
            }
            OutcomeKind::Failed(error) => self.fail(job_id, &error).await,
            OutcomeKind::TimedOut(limit) => {
                let error = format!("job timed out after {}s", whole_secs(limit));
                self.fail(job_id, &error).await;
            }
            OutcomeKind::Cancelled if shutting_down => self.fail(job_id, SHUTDOWN_JOB_ERROR).await,
            // Cancelled through the API: the row is already `cancelled`.
            OutcomeKind::Cancelled => self.fail(job_id, "job cancelled").await,
            OutcomeKind::Crashed(reason) => {
                let error = format!("worker crashed: {reason}");
                self.fail(job_id, &error).await;
            }
            OutcomeKind::SpawnFailed(reason) => {
                let error = format!("worker could not be started: {reason}");
                self.fail(job_id, &error).await;
            }
        }
    }

    /// Guarded `running -> failed`; publishes `job_failed` when applied.
    async fn fail(&self, job_id: DbId, error: &str) {
        match JobRepo::mark_failed(&self.pool, job_id, error).await {
            Ok(true) => {
                tracing::warn!(job_id, error, "Job failed");
                self.events.publish(JobEvent::failed(job_id, error));
            }
            Ok(false) => {
                tracing::debug!(job_id, "Job no longer running; failure not recorded");
            }
            Err(e) => tracing::error!(job_id, error = %e, "Failed to mark job failed"),
        }
    }

    /// Cancel every in-flight job and apply their outcomes.
    async fn drain(&self, pool_events: &mut mpsc::UnboundedReceiver<PoolEvent>) {
        self.workers.cancel_all().await;

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.workers.in_flight_count().await > 0 || !pool_events.is_empty() {
            match tokio::time::timeout_at(deadline, pool_events.recv()).await {
                Ok(Some(event)) => self.handle_pool_event(event, true).await,
                Ok(None) => break,
                Err(_) => {
                    let remaining = self.workers.in_flight_count().await;
                    tracing::warn!(remaining, "Timed out draining in-flight jobs");
                    break;
                }
            }
        }
        tracing::info!("Job dispatcher stopped");
    }
}

fn parse_job_id(raw: &str) -> Option<DbId> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(job_id = %raw, "Ignoring report with a non-numeric job id");
            None
        }
    }
}
