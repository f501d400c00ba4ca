//! Job orchestrator implementation.
//!
//! A single scheduler task moves Ready jobs into free slots; every adapter
//! call then runs as its own task and reports back into the job table.
//! The table lock is never held across an adapter call, a sleep or a store
//! write. Effects are flushed in the order their mutations took the lock.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::artifact::{Artifact, ArtifactStore};
use crate::generator::{AdapterRegistry, GenerationError, GenerationTask};
use crate::job::{Batch, BatchSnapshot, ContentType, Job, JobFilter, JobRequest};
use crate::metrics;
use crate::notify::NotificationSink;
use crate::store::JobStore;

use super::config::OrchestratorConfig;
use super::table::{plan_submission, Backoff, Completion, Effects, JobTable};
use super::types::{OrchestratorError, OrchestratorStatus, PoolStatus};

/// The job orchestrator: accepts submissions and drives jobs to a terminal state.
///
/// Cheap to clone; clones share the same job table and scheduler.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AdapterRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    table: Arc<Mutex<JobTable>>,
    /// Taken before the table lock is released and held while effects are applied.
    flush: Arc<Mutex<()>>,
    notifications: Option<Arc<dyn NotificationSink>>,
    store: Option<Arc<dyn JobStore>>,

    // Runtime state
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    changes: Arc<watch::Sender<u64>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create a new orchestrator. Call [`start`](Self::start) before submitting.
    pub fn new(
        config: OrchestratorConfig,
        registry: AdapterRegistry,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (changes, _) = watch::channel(0u64);
        let table = JobTable::new(config.slots.clone(), config.retry.clone());

        Self {
            config,
            registry: Arc::new(registry),
            artifacts,
            table: Arc::new(Mutex::new(table)),
            flush: Arc::new(Mutex::new(())),
            notifications: None,
            store: None,
            running: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            changes: Arc::new(changes),
            shutdown_tx,
        }
    }

    /// Report terminal transitions to a sink.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    /// Write job and batch snapshots through to a store.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the orchestrator (spawns the scheduler task).
    ///
    /// Jobs left backing off by an earlier shutdown get their timers back.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(
            capabilities = ?self.registry.capabilities(),
            "Starting job orchestrator"
        );
        self.spawn_scheduler();
        self.resume_backoffs();
    }

    /// Stop scheduling new attempts.
    ///
    /// Attempts already in flight run to completion and are recorded.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping job orchestrator");
        let _ = self.shutdown_tx.send(());
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Create one job per request and group them into a batch.
    ///
    /// Nothing is created if any request is invalid.
    pub async fn submit(&self, requests: Vec<JobRequest>) -> Result<Batch, OrchestratorError> {
        if !self.is_running() {
            return Err(OrchestratorError::NotRunning);
        }

        let mut planned = plan_submission(requests)?;

        for plan in &planned {
            let capability = plan.request.content_type;
            if !self.registry.has(capability) {
                return Err(OrchestratorError::NoAdapter(capability));
            }
        }

        for plan in &mut planned {
            for (input, hash) in std::mem::take(&mut plan.input_refs) {
                let artifact = self.artifacts.head(&hash).await.map_err(|e| {
                    OrchestratorError::InvalidInput(format!(
                        "failed to look up {} {}: {}",
                        input.artifact_param_key(),
                        hash,
                        e
                    ))
                })?;

                match artifact {
                    Some(artifact) if artifact.content_type == input => {
                        plan.inputs.set_for(input, artifact)
                    }
                    Some(artifact) => {
                        return Err(OrchestratorError::InvalidInput(format!(
                            "{} {} is a {} artifact",
                            input.artifact_param_key(),
                            hash,
                            artifact.content_type
                        )))
                    }
                    None => {
                        return Err(OrchestratorError::InvalidInput(format!(
                            "{} {} does not exist",
                            input.artifact_param_key(),
                            hash
                        )))
                    }
                }
            }
        }

        let submitted: Vec<ContentType> = planned.iter().map(|p| p.request.content_type).collect();
        let batch = self.mutate(|table| table.insert_batch(planned)).await;

        for capability in submitted {
            metrics::JOBS_SUBMITTED
                .with_label_values(&[capability.as_str()])
                .inc();
        }
        metrics::BATCHES_SUBMITTED.inc();

        info!(batch_id = %batch.id, jobs = batch.job_ids.len(), "Batch submitted");
        self.wake.notify_one();
        Ok(batch)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Snapshot of a single job.
    pub async fn status(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        self.table
            .lock()
            .await
            .job(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Snapshot of a batch and all of its jobs.
    pub async fn batch_status(&self, batch_id: &str) -> Result<BatchSnapshot, OrchestratorError> {
        self.table
            .lock()
            .await
            .batch_snapshot(batch_id)
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))
    }

    /// Jobs matching a filter, in creation order.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        self.table.lock().await.list(filter)
    }

    /// Slot usage per capability.
    pub async fn pool_status(&self) -> Vec<PoolStatus> {
        self.table.lock().await.pool_status()
    }

    /// Overall orchestrator status.
    pub async fn status_summary(&self) -> OrchestratorStatus {
        let table = self.table.lock().await;
        OrchestratorStatus {
            running: self.is_running(),
            jobs: table.job_count(),
            batches: table.batch_count(),
            batches_in_progress: table.batches_in_progress(),
            pools: table.pool_status(),
        }
    }

    /// Receiver that ticks on every job or batch mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Cancel a job. Terminal jobs are returned unchanged.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let result = self.mutate(|table| table.cancel_job(job_id, Utc::now())).await;
        self.wake.notify_one();
        result
    }

    /// Cancel every non-terminal member of a batch.
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<BatchSnapshot, OrchestratorError> {
        let result = self
            .mutate(|table| table.cancel_batch(batch_id, Utc::now()))
            .await;
        self.wake.notify_one();
        result
    }

    /// Re-arm a Failed or Cancelled job with a fresh attempt budget.
    pub async fn retry_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let result = self.mutate(|table| table.retry_job(job_id)).await;
        self.wake.notify_one();
        result
    }

    /// Forget a fully terminal batch.
    pub async fn purge_batch(&self, batch_id: &str) -> Result<(), OrchestratorError> {
        self.mutate(|table| table.purge_batch(batch_id)).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Run a table mutation, then flush its effects outside the lock.
    async fn mutate<T>(&self, f: impl FnOnce(&mut JobTable) -> T) -> T {
        let mut table = self.table.lock().await;
        let result = f(&mut table);
        let effects = table.take_effects();
        let flush = self.flush.lock().await;
        drop(table);
        self.apply_effects(effects);
        drop(flush);
        result
    }

    fn apply_effects(&self, effects: Effects) {
        if effects.is_empty() {
            return;
        }

        if let Some(ref store) = self.store {
            for batch in &effects.batches {
                if let Err(e) = store.upsert_batch(batch) {
                    warn!(batch_id = %batch.id, error = %e, "Failed to persist batch");
                }
            }
            for job in &effects.jobs {
                if let Err(e) = store.upsert_job(job) {
                    warn!(job_id = %job.id, error = %e, "Failed to persist job");
                }
            }
            for batch_id in &effects.deleted_batches {
                if let Err(e) = store.delete_batch(batch_id) {
                    warn!(batch_id = %batch_id, error = %e, "Failed to delete batch");
                }
            }
        }

        if let Some(ref sink) = self.notifications {
            for notification in effects.notifications {
                sink.notify(notification);
            }
        }

        self.changes.send_modify(|tick| *tick = tick.wrapping_add(1));
    }

    fn spawn_scheduler(&self) {
        let this = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Scheduler loop started");
            loop {
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                this.schedule().await;

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = this.wake.notified() => {}
                }
            }
            info!("Scheduler loop stopped");
        });
    }

    /// Fill free slots from the ready queues.
    async fn schedule(&self) {
        let mut table = self.table.lock().await;
        let tasks = table.dispatch_ready(Utc::now());
        for pool in table.pool_status() {
            let label = [pool.content_type.as_str()];
            metrics::SLOTS_IN_USE
                .with_label_values(&label)
                .set(pool.active as i64);
            metrics::QUEUE_DEPTH
                .with_label_values(&label)
                .set(pool.queued as i64);
        }
        let effects = table.take_effects();
        let flush = self.flush.lock().await;
        drop(table);
        self.apply_effects(effects);
        drop(flush);

        for task in tasks {
            debug!(
                job_id = %task.job_id,
                capability = %task.content_type,
                attempt = task.attempt,
                "Dispatching attempt"
            );
            let this = self.clone();
            tokio::spawn(async move { this.run_attempt(task).await });
        }
    }

    async fn run_attempt(self, task: GenerationTask) {
        let capability = task.content_type;
        let job_id = task.job_id.clone();
        let attempt = task.attempt;

        let start = Instant::now();
        let result = self.invoke_adapter(task).await;
        let elapsed = start.elapsed();

        let outcome_label = match &result {
            Ok(_) => "success",
            Err(e) => e.kind.as_str(),
        };
        metrics::ATTEMPTS
            .with_label_values(&[capability.as_str(), outcome_label])
            .inc();
        metrics::GENERATION_DURATION
            .with_label_values(&[capability.as_str()])
            .observe(elapsed.as_secs_f64());

        let outcome = result.map(|artifact| (artifact, elapsed.as_millis() as u64));
        let completion = self
            .mutate(|table| table.complete(capability, &job_id, attempt, outcome, Utc::now()))
            .await;

        if let Completion::RetryScheduled(backoff) = completion {
            self.schedule_requeue(job_id, backoff);
        }

        self.wake.notify_one();
    }

    async fn invoke_adapter(
        &self,
        task: GenerationTask,
    ) -> Result<Artifact, GenerationError> {
        let capability = task.content_type;
        let Some(adapter) = self.registry.pick(capability) else {
            error!(capability = %capability, "No adapter registered");
            return Err(GenerationError::unknown(format!(
                "no adapter registered for {}",
                capability
            )));
        };

        let job_id = task.job_id.clone();
        let timeout = self.config.timeouts.for_capability(capability);
        let call = AssertUnwindSafe(adapter.generate(task)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let reason = panic_reason(&*panic);
                error!(job_id = %job_id, adapter = adapter.name(), reason = %reason, "Adapter panicked");
                Err(GenerationError::unknown(format!(
                    "{} panicked: {}",
                    adapter.name(),
                    reason
                )))
            }
            Err(_) => Err(GenerationError::timeout(format!(
                "{} attempt exceeded {}ms",
                adapter.name(),
                timeout.as_millis()
            ))),
        }
    }

    /// Put a job back into its ready queue once the backoff elapses.
    fn schedule_requeue(&self, job_id: String, backoff: Backoff) {
        let this = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = tokio::time::sleep(backoff.delay) => {}
            }
            let requeued = this
                .mutate(|table| table.requeue(&job_id, backoff.token))
                .await;
            if requeued {
                debug!(job_id = %job_id, "Backoff elapsed, job requeued");
                this.wake.notify_one();
            }
        });
    }

    /// Re-spawn backoff timers for every job still waiting on one.
    ///
    /// Timers that survived a shutdown are harmless duplicates: only the
    /// first requeue with a given token takes effect.
    fn resume_backoffs(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let pending = this.table.lock().await.pending_backoffs(Utc::now());
            if !pending.is_empty() {
                info!(jobs = pending.len(), "Resuming backoff timers");
            }
            for (job_id, backoff) in pending {
                this.schedule_requeue(job_id, backoff);
            }
        });
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
