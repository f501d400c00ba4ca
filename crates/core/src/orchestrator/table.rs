//! In-memory job table: the scheduler's view of every job and batch.
//!
//! All methods are synchronous and are called with the orchestrator lock
//! held. Side effects that must happen outside the lock (store writes,
//! notifications) are accumulated and handed out by [`JobTable::take_effects`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::config::{RetryConfig, SlotConfig};
use super::types::{OrchestratorError, PoolStatus};
use crate::artifact::{generation_key, Artifact};
use crate::generator::{GenerationError, GenerationTask, InputArtifacts};
use crate::job::{
    Batch, BatchSnapshot, CancelCause, ContentType, Job, JobFilter, JobRequest, JobState,
};
use crate::metrics;
use crate::notify::Notification;

/// A validated request with its in-submission dependencies resolved to indices.
#[derive(Debug, Clone)]
pub(crate) struct PlannedJob {
    pub request: JobRequest,
    /// Indices (into the submission) of jobs this one waits for.
    pub depends_on: Vec<usize>,
    /// Inputs referenced by content hash, resolved against the artifact store before insertion.
    pub input_refs: Vec<(ContentType, String)>,
    pub inputs: InputArtifacts,
}

/// Validate a submission and wire video jobs to their inputs.
///
/// A video job depends on the first illustration and the first audio job for
/// the same chapter in the submission. An input with no such sibling must be
/// referenced by content hash in the params.
pub(crate) fn plan_submission(
    requests: Vec<JobRequest>,
) -> Result<Vec<PlannedJob>, OrchestratorError> {
    if requests.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "submission contains no requests".to_string(),
        ));
    }

    let mut links = Vec::with_capacity(requests.len());
    for (index, request) in requests.iter().enumerate() {
        if request.chapter_ref.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(format!(
                "request {} has an empty chapter_ref",
                index
            )));
        }

        let mut depends_on = Vec::new();
        let mut input_refs = Vec::new();
        for &input in request.content_type.required_inputs() {
            let sibling = requests
                .iter()
                .position(|r| r.content_type == input && r.chapter_ref == request.chapter_ref);

            match (sibling, request.artifact_reference(input)) {
                (Some(i), _) => depends_on.push(i),
                (None, Some(hash)) => input_refs.push((input, hash.to_string())),
                (None, None) => {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "{} request for chapter {} has no {} request in the submission and no {} param",
                        request.content_type,
                        request.chapter_ref,
                        input,
                        input.artifact_param_key()
                    )))
                }
            }
        }
        links.push((depends_on, input_refs));
    }

    Ok(requests
        .into_iter()
        .zip(links)
        .map(|(request, (depends_on, input_refs))| PlannedJob {
            request,
            depends_on,
            input_refs,
            inputs: InputArtifacts::default(),
        })
        .collect())
}

/// Result of feeding an attempt outcome back into the table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    /// The job reached a terminal state.
    Finished(JobState),
    /// The job is Ready again and must be requeued after the delay.
    RetryScheduled(Backoff),
    /// The job had left Running (cancelled, purged); the result was dropped.
    Discarded,
}

/// A pending retry. Only a timer holding the current token may requeue the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    pub token: u64,
    pub delay: Duration,
}

/// Work to do once the lock is released.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// Job snapshots to persist, in creation order.
    pub jobs: Vec<Job>,
    /// New batches to persist.
    pub batches: Vec<Batch>,
    pub deleted_batches: Vec<String>,
    pub notifications: Vec<Notification>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
            && self.batches.is_empty()
            && self.deleted_batches.is_empty()
            && self.notifications.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    succeeded: u64,
    failed: u64,
}

pub(crate) struct JobTable {
    slots: SlotConfig,
    retry: RetryConfig,
    jobs: HashMap<String, Job>,
    batches: HashMap<String, Batch>,
    /// Ready queue per capability keyed by creation sequence.
    ready: HashMap<ContentType, BTreeMap<u64, String>>,
    /// Occupied slots per capability.
    running: HashMap<ContentType, usize>,
    /// Jobs with an adapter call outstanding, including cancelled ones.
    in_flight: HashSet<String>,
    /// Reverse dependency edges.
    dependents: HashMap<String, Vec<String>>,
    /// Backoff token per job waiting out a retry delay.
    backoffs: HashMap<String, u64>,
    next_backoff_token: u64,
    /// Generation key -> (producing job, artifact), consulted only for jobs that opt into reuse.
    reuse_cache: HashMap<String, (String, Artifact)>,
    finished_batches: HashSet<String>,
    totals: HashMap<ContentType, Totals>,
    next_sequence: u64,

    dirty_jobs: HashSet<String>,
    new_batches: Vec<Batch>,
    deleted_batches: Vec<String>,
    notifications: Vec<Notification>,
}

impl JobTable {
    pub fn new(slots: SlotConfig, retry: RetryConfig) -> Self {
        Self {
            slots,
            retry,
            jobs: HashMap::new(),
            batches: HashMap::new(),
            ready: HashMap::new(),
            running: HashMap::new(),
            in_flight: HashSet::new(),
            dependents: HashMap::new(),
            backoffs: HashMap::new(),
            next_backoff_token: 0,
            reuse_cache: HashMap::new(),
            finished_batches: HashSet::new(),
            totals: HashMap::new(),
            next_sequence: 0,
            dirty_jobs: HashSet::new(),
            new_batches: Vec::new(),
            deleted_batches: Vec::new(),
            notifications: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Create the jobs of a planned submission. Jobs without dependencies are Ready on return.
    pub fn insert_batch(&mut self, planned: Vec<PlannedJob>) -> Batch {
        let mut batch = Batch::new(Vec::with_capacity(planned.len()));

        let mut jobs = Vec::with_capacity(planned.len());
        for plan in planned {
            let mut job = Job::from_request(plan.request, &batch.id, self.next_sequence);
            self.next_sequence += 1;
            job.input_artifacts = plan.inputs;
            batch.job_ids.push(job.id.clone());
            jobs.push((job, plan.depends_on));
        }

        for (mut job, depends_on) in jobs {
            job.dependencies = depends_on
                .iter()
                .map(|&i| batch.job_ids[i].clone())
                .collect();

            for dependency in &job.dependencies {
                self.dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(job.id.clone());
            }

            let id = job.id.clone();
            let ready = job.dependencies.is_empty();
            self.jobs.insert(id.clone(), job);
            self.mark_dirty(&id);
            if ready {
                self.make_ready(&id);
            }
        }

        debug!(batch_id = %batch.id, jobs = batch.job_ids.len(), "Inserted batch");

        self.batches.insert(batch.id.clone(), batch.clone());
        self.new_batches.push(batch.clone());
        batch
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Move as many Ready jobs to Running as free slots allow, oldest first.
    pub fn dispatch_ready(&mut self, now: DateTime<Utc>) -> Vec<GenerationTask> {
        let mut tasks = Vec::new();

        for capability in ContentType::ALL {
            let limit = self.slots.for_capability(capability);

            while self.running_count(capability) < limit {
                let Some(id) = self.pop_ready(capability) else {
                    break;
                };

                let reusable = match self.jobs.get(&id) {
                    Some(job) if job.state == JobState::Ready => self.reusable_artifact(job),
                    _ => continue,
                };

                if let Some(artifact) = reusable {
                    info!(job_id = %id, content_hash = %artifact.content_hash, "Reusing existing artifact");
                    metrics::ARTIFACTS_REUSED
                        .with_label_values(&[capability.as_str()])
                        .inc();
                    self.succeed(&id, artifact, None, now);
                    continue;
                }

                let Some(job) = self.jobs.get_mut(&id) else {
                    continue;
                };
                job.state = JobState::Running;
                job.attempt_count += 1;
                job.started_at.get_or_insert(now);
                job.next_attempt_at = None;

                tasks.push(GenerationTask {
                    job_id: job.id.clone(),
                    chapter_ref: job.chapter_ref.clone(),
                    content_type: job.content_type,
                    params: job.params.clone(),
                    attempt: job.attempt_count,
                    inputs: job.input_artifacts.clone(),
                });

                *self.running.entry(capability).or_default() += 1;
                self.in_flight.insert(id.clone());
                self.mark_dirty(&id);
            }
        }

        tasks
    }

    /// Record the outcome of an attempt and free its slot.
    ///
    /// The slot is released even when the result is discarded.
    pub fn complete(
        &mut self,
        capability: ContentType,
        job_id: &str,
        attempt: u32,
        outcome: Result<(Artifact, u64), GenerationError>,
        now: DateTime<Utc>,
    ) -> Completion {
        if let Some(count) = self.running.get_mut(&capability) {
            *count = count.saturating_sub(1);
        }
        self.in_flight.remove(job_id);

        let current = self
            .jobs
            .get(job_id)
            .is_some_and(|job| job.state == JobState::Running && job.attempt_count == attempt);
        if !current {
            debug!(job_id = %job_id, attempt, "Discarding result of a job no longer running");
            metrics::DISCARDED_RESULTS
                .with_label_values(&[capability.as_str()])
                .inc();
            return Completion::Discarded;
        }

        match outcome {
            Ok((artifact, elapsed_ms)) => {
                self.succeed(job_id, artifact, Some(elapsed_ms), now);
                Completion::Finished(JobState::Succeeded)
            }
            Err(error) => self.fail_attempt(job_id, error, now),
        }
    }

    /// Put a job whose backoff elapsed back into its ready queue.
    ///
    /// No-op unless `token` is the job's current backoff token.
    pub fn requeue(&mut self, job_id: &str, token: u64) -> bool {
        if self.backoffs.get(job_id) != Some(&token) {
            return false;
        }
        let waiting = self
            .jobs
            .get(job_id)
            .is_some_and(|job| job.state == JobState::Ready && job.next_attempt_at.is_some());
        if waiting {
            self.make_ready(job_id);
        } else {
            self.backoffs.remove(job_id);
        }
        waiting
    }

    /// Every job still waiting out a backoff, with the time left until it is due.
    pub fn pending_backoffs(&self, now: DateTime<Utc>) -> Vec<(String, Backoff)> {
        self.backoffs
            .iter()
            .filter_map(|(id, &token)| {
                let due = self.jobs.get(id)?.next_attempt_at?;
                let delay = (due - now).to_std().unwrap_or(Duration::ZERO);
                Some((id.clone(), Backoff { token, delay }))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Caller operations
    // ------------------------------------------------------------------

    pub fn cancel_job(&mut self, job_id: &str, now: DateTime<Utc>) -> Result<Job, OrchestratorError> {
        let batch_id = self
            .jobs
            .get(job_id)
            .map(|job| job.batch_id.clone())
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if self.cancel(job_id, CancelCause::Requested, now) {
            info!(job_id = %job_id, "Job cancelled");
        }
        self.check_batch(&batch_id);

        self.job(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    pub fn cancel_batch(
        &mut self,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BatchSnapshot, OrchestratorError> {
        let members = self
            .batches
            .get(batch_id)
            .map(|batch| batch.job_ids.clone())
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))?;

        let cancelled = members
            .iter()
            .filter(|id| self.cancel(id, CancelCause::Requested, now))
            .count();
        info!(batch_id = %batch_id, cancelled, "Batch cancelled");
        self.check_batch(batch_id);

        self.batch_snapshot(batch_id)
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))
    }

    /// Re-arm a Failed or Cancelled job with a fresh attempt budget.
    ///
    /// Dependents cancelled because of this job are re-armed as well.
    pub fn retry_job(&mut self, job_id: &str) -> Result<Job, OrchestratorError> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if !job.state.can_retry() {
            return Err(OrchestratorError::wrong_state(job_id, "retry", job.state));
        }
        if self.in_flight.contains(job_id) {
            return Err(OrchestratorError::invalid_state(
                job_id,
                "retry",
                "previous attempt has not returned yet",
            ));
        }
        if let Some(blocker) = self.dead_dependency(job_id) {
            return Err(OrchestratorError::invalid_state(
                job_id,
                "retry",
                format!("dependency {} has not succeeded; retry it first", blocker),
            ));
        }
        let batch_id = job.batch_id.clone();

        self.rearm(job_id);

        let mut work = vec![job_id.to_string()];
        while let Some(parent) = work.pop() {
            for child in self.dependents.get(&parent).cloned().unwrap_or_default() {
                let cancelled_by_parent = matches!(
                    self.jobs.get(&child).and_then(|j| j.cancel_cause.as_ref()),
                    Some(CancelCause::DependencyFailed { job_id }) if *job_id == parent
                );
                if !cancelled_by_parent {
                    continue;
                }

                // Another input is still dead: stay cancelled, blame that one.
                if let Some(blocker) = self.dead_dependency(&child) {
                    if let Some(job) = self.jobs.get_mut(&child) {
                        job.cancel_cause = Some(CancelCause::DependencyFailed { job_id: blocker });
                    }
                    self.mark_dirty(&child);
                    continue;
                }

                self.rearm(&child);
                work.push(child);
            }
        }

        self.finished_batches.remove(&batch_id);
        info!(job_id = %job_id, batch_id = %batch_id, "Job re-armed");

        self.job(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Drop a fully terminal batch and its jobs.
    pub fn purge_batch(&mut self, batch_id: &str) -> Result<(), OrchestratorError> {
        let batch = self
            .batches
            .get(batch_id)
            .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.to_string()))?;

        let unfinished = batch
            .job_ids
            .iter()
            .filter(|id| self.jobs.get(*id).is_some_and(|j| !j.is_terminal()))
            .count();
        if unfinished > 0 {
            return Err(OrchestratorError::invalid_state(
                batch_id,
                "purge",
                format!("{} jobs are not finished", unfinished),
            ));
        }

        if let Some(batch) = self.batches.remove(batch_id) {
            for id in &batch.job_ids {
                self.jobs.remove(id);
                self.dependents.remove(id);
                self.dirty_jobs.remove(id);
                self.backoffs.remove(id);
            }
            let purged: HashSet<&str> = batch.job_ids.iter().map(String::as_str).collect();
            self.reuse_cache
                .retain(|_, (owner, _)| !purged.contains(owner.as_str()));
        }
        self.finished_batches.remove(batch_id);
        self.deleted_batches.push(batch_id.to_string());

        info!(batch_id = %batch_id, "Batch purged");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).cloned()
    }

    pub fn batch_snapshot(&self, batch_id: &str) -> Option<BatchSnapshot> {
        let batch = self.batches.get(batch_id)?;
        let jobs = batch
            .job_ids
            .iter()
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect();
        Some(BatchSnapshot::new(batch, jobs))
    }

    /// Jobs matching the filter in creation order.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut matching: Vec<&Job> = self.jobs.values().filter(|j| filter.matches(j)).collect();
        matching.sort_by_key(|j| j.sequence);
        matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub fn pool_status(&self) -> Vec<PoolStatus> {
        ContentType::ALL
            .into_iter()
            .map(|capability| {
                let totals = self.totals.get(&capability).copied().unwrap_or_default();
                let backing_off = self
                    .jobs
                    .values()
                    .filter(|j| {
                        j.content_type == capability
                            && j.state == JobState::Ready
                            && j.next_attempt_at.is_some()
                    })
                    .count();
                PoolStatus {
                    content_type: capability,
                    active: self.running_count(capability),
                    max: self.slots.for_capability(capability),
                    queued: self.ready.get(&capability).map_or(0, BTreeMap::len),
                    backing_off,
                    total_succeeded: totals.succeeded,
                    total_failed: totals.failed,
                }
            })
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn batches_in_progress(&self) -> usize {
        self.batches.len() - self.finished_batches.len()
    }

    /// Drain accumulated side effects.
    pub fn take_effects(&mut self) -> Effects {
        let mut jobs: Vec<Job> = self
            .dirty_jobs
            .drain()
            .filter_map(|id| self.jobs.get(&id).cloned())
            .collect();
        jobs.sort_by_key(|j| j.sequence);

        Effects {
            jobs,
            batches: std::mem::take(&mut self.new_batches),
            deleted_batches: std::mem::take(&mut self.deleted_batches),
            notifications: std::mem::take(&mut self.notifications),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn mark_dirty(&mut self, job_id: &str) {
        self.dirty_jobs.insert(job_id.to_string());
    }

    fn running_count(&self, capability: ContentType) -> usize {
        self.running.get(&capability).copied().unwrap_or(0)
    }

    fn pop_ready(&mut self, capability: ContentType) -> Option<String> {
        self.ready
            .get_mut(&capability)?
            .pop_first()
            .map(|(_, id)| id)
    }

    /// Enqueue a job, filling its inputs from finished dependencies.
    ///
    /// Each input lands in the slot of the dependency's content type; a
    /// deduplicated artifact may carry the type it was first stored under.
    fn make_ready(&mut self, job_id: &str) {
        let inputs: Vec<(ContentType, Artifact)> = match self.jobs.get(job_id) {
            Some(job) => job
                .dependencies
                .iter()
                .filter_map(|dep| {
                    let dep = self.jobs.get(dep)?;
                    Some((dep.content_type, dep.artifact.clone()?))
                })
                .collect(),
            None => return,
        };
        self.backoffs.remove(job_id);
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        for (content_type, artifact) in inputs {
            job.input_artifacts.set_for(content_type, artifact);
        }
        job.state = JobState::Ready;
        job.next_attempt_at = None;
        self.ready
            .entry(job.content_type)
            .or_default()
            .insert(job.sequence, job.id.clone());
        self.mark_dirty(job_id);
    }

    fn reusable_artifact(&self, job: &Job) -> Option<Artifact> {
        if !job.reuse_artifacts {
            return None;
        }
        let key = generation_key(
            job.content_type,
            &job.chapter_ref,
            &job.params,
            &job.input_artifacts.hashes(),
        );
        self.reuse_cache.get(&key).map(|(_, artifact)| artifact.clone())
    }

    /// First dependency that is missing, Failed or Cancelled.
    fn dead_dependency(&self, job_id: &str) -> Option<String> {
        let job = self.jobs.get(job_id)?;
        job.dependencies
            .iter()
            .find(|dep| {
                self.jobs
                    .get(*dep)
                    .map_or(true, |d| matches!(d.state, JobState::Failed | JobState::Cancelled))
            })
            .cloned()
    }

    fn dependencies_satisfied(&self, job_id: &str) -> bool {
        self.jobs.get(job_id).is_some_and(|job| {
            job.state == JobState::Pending
                && job.dependencies.iter().all(|dep| {
                    self.jobs
                        .get(dep)
                        .is_some_and(|d| d.state == JobState::Succeeded)
                })
        })
    }

    /// Bookkeeping shared by every terminal transition.
    fn finish(&mut self, job_id: &str) {
        let Some(job) = self.jobs.get(job_id) else {
            return;
        };

        metrics::JOBS_FINISHED
            .with_label_values(&[job.content_type.as_str(), job.state.state_type()])
            .inc();

        let totals = self.totals.entry(job.content_type).or_default();
        match job.state {
            JobState::Succeeded => totals.succeeded += 1,
            JobState::Failed => totals.failed += 1,
            _ => {}
        }

        info!(
            job_id = %job.id,
            batch_id = %job.batch_id,
            content_type = %job.content_type,
            chapter_ref = %job.chapter_ref,
            state = %job.state,
            attempts = job.attempt_count,
            "Job finished"
        );

        self.notifications.push(Notification::job_finished(job));
        self.mark_dirty(job_id);
    }

    fn succeed(
        &mut self,
        job_id: &str,
        artifact: Artifact,
        processing_ms: Option<u64>,
        now: DateTime<Utc>,
    ) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        job.state = JobState::Succeeded;
        job.artifact = Some(artifact.clone());
        job.finished_at = Some(now);
        job.next_attempt_at = None;
        job.last_error = None;
        job.processing_ms = processing_ms;

        let key = generation_key(
            job.content_type,
            &job.chapter_ref,
            &job.params,
            &job.input_artifacts.hashes(),
        );
        let batch_id = job.batch_id.clone();
        self.reuse_cache
            .entry(key)
            .or_insert_with(|| (job_id.to_string(), artifact));

        self.finish(job_id);

        for dependent in self.dependents.get(job_id).cloned().unwrap_or_default() {
            if self.dependencies_satisfied(&dependent) {
                debug!(job_id = %dependent, "Dependencies satisfied");
                self.make_ready(&dependent);
            }
        }

        self.check_batch(&batch_id);
    }

    fn fail_attempt(
        &mut self,
        job_id: &str,
        error: GenerationError,
        now: DateTime<Utc>,
    ) -> Completion {
        let max_attempts = self.retry.max_attempts;
        let Some(job) = self.jobs.get_mut(job_id) else {
            return Completion::Discarded;
        };
        job.last_error = Some(error.clone());

        if error.is_retryable() && job.attempt_count < max_attempts {
            let delay = self.retry.delay_for_attempt(job.attempt_count);
            let token = self.next_backoff_token;
            self.next_backoff_token += 1;
            self.backoffs.insert(job_id.to_string(), token);
            job.state = JobState::Ready;
            job.next_attempt_at = Some(
                now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            );
            warn!(
                job_id = %job_id,
                attempt = job.attempt_count,
                max_attempts,
                kind = %error.kind,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retry scheduled"
            );
            metrics::RETRIES_SCHEDULED
                .with_label_values(&[job.content_type.as_str()])
                .inc();
            self.mark_dirty(job_id);
            return Completion::RetryScheduled(Backoff { token, delay });
        }

        warn!(
            job_id = %job_id,
            attempt = job.attempt_count,
            kind = %error.kind,
            error = %error.message,
            "Job failed"
        );
        job.state = JobState::Failed;
        job.finished_at = Some(now);
        job.next_attempt_at = None;
        let batch_id = job.batch_id.clone();

        self.finish(job_id);
        self.cancel_dependents(job_id, now);
        self.check_batch(&batch_id);
        Completion::Finished(JobState::Failed)
    }

    /// Cancel a non-terminal job. Returns false if it was already terminal.
    ///
    /// A Running job keeps its slot until the adapter returns.
    fn cancel(&mut self, job_id: &str, cause: CancelCause, now: DateTime<Utc>) -> bool {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if !job.state.can_cancel() {
            return false;
        }

        if job.state == JobState::Ready {
            if let Some(queue) = self.ready.get_mut(&job.content_type) {
                queue.remove(&job.sequence);
            }
        }

        job.state = JobState::Cancelled;
        job.cancel_cause = Some(cause);
        job.finished_at = Some(now);
        job.next_attempt_at = None;
        self.backoffs.remove(job_id);

        self.finish(job_id);
        self.cancel_dependents(job_id, now);
        true
    }

    fn cancel_dependents(&mut self, job_id: &str, now: DateTime<Utc>) {
        for dependent in self.dependents.get(job_id).cloned().unwrap_or_default() {
            self.cancel(
                &dependent,
                CancelCause::DependencyFailed {
                    job_id: job_id.to_string(),
                },
                now,
            );
        }
    }

    fn rearm(&mut self, job_id: &str) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        job.state = JobState::Pending;
        job.attempt_count = 0;
        job.last_error = None;
        job.artifact = None;
        job.cancel_cause = None;
        job.started_at = None;
        job.finished_at = None;
        job.next_attempt_at = None;
        job.processing_ms = None;
        self.backoffs.remove(job_id);
        self.mark_dirty(job_id);

        if self.dependencies_satisfied(job_id) {
            self.make_ready(job_id);
        }
    }

    fn check_batch(&mut self, batch_id: &str) {
        if self.finished_batches.contains(batch_id) {
            return;
        }
        let Some(snapshot) = self.batch_snapshot(batch_id) else {
            return;
        };
        if !snapshot.is_finished() {
            return;
        }

        self.finished_batches.insert(batch_id.to_string());
        info!(
            batch_id = %batch_id,
            status = snapshot.status.as_str(),
            succeeded = snapshot.progress.succeeded,
            failed = snapshot.progress.failed,
            cancelled = snapshot.progress.cancelled,
            "Batch finished"
        );
        self.notifications.push(Notification::BatchFinished {
            batch_id: batch_id.to_string(),
            final_status: snapshot.status,
            progress: snapshot.progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::hash_bytes;
    use crate::job::BatchStatus;

    fn table(slots: usize, max_attempts: u32) -> JobTable {
        JobTable::new(
            SlotConfig::uniform(slots),
            RetryConfig {
                max_attempts,
                initial_delay_ms: 10,
                max_delay_ms: 100,
                backoff_multiplier: 2.0,
            },
        )
    }

    fn artifact(content_type: ContentType, seed: &str) -> Artifact {
        Artifact {
            content_hash: hash_bytes(seed.as_bytes()),
            content_type,
            byte_size: seed.len() as u64,
            location_ref: format!("memory://{}", seed),
            created_at: Utc::now(),
            metadata: Default::default(),
        }
    }

    fn submit(table: &mut JobTable, requests: Vec<JobRequest>) -> Batch {
        let planned = plan_submission(requests).unwrap();
        table.insert_batch(planned)
    }

    fn chapter(ch: &str) -> Vec<JobRequest> {
        vec![
            JobRequest::illustration(ch),
            JobRequest::audio(ch),
            JobRequest::video(ch),
        ]
    }

    fn state(table: &JobTable, id: &str) -> JobState {
        table.job(id).unwrap().state
    }

    fn succeed(table: &mut JobTable, task: &GenerationTask, seed: &str) -> Completion {
        table.complete(
            task.content_type,
            &task.job_id,
            task.attempt,
            Ok((artifact(task.content_type, seed), 5)),
            Utc::now(),
        )
    }

    fn backoff_of(completion: Completion) -> Backoff {
        match completion {
            Completion::RetryScheduled(backoff) => backoff,
            other => panic!("expected a scheduled retry, got {:?}", other),
        }
    }

    fn fail(table: &mut JobTable, task: &GenerationTask, error: GenerationError) -> Completion {
        table.complete(
            task.content_type,
            &task.job_id,
            task.attempt,
            Err(error),
            Utc::now(),
        )
    }

    #[test]
    fn test_plan_rejects_empty_submission() {
        assert!(matches!(
            plan_submission(vec![]),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            plan_submission(vec![JobRequest::audio("  ")]),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_plan_video_without_inputs_is_rejected() {
        let result = plan_submission(vec![
            JobRequest::illustration("ch1"),
            JobRequest::video("ch1"),
        ]);
        match result {
            Err(OrchestratorError::InvalidInput(msg)) => assert!(msg.contains("audio_artifact")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_links_same_chapter_siblings() {
        let planned = plan_submission(vec![
            JobRequest::video("ch1"),
            JobRequest::audio("ch2"),
            JobRequest::audio("ch1"),
            JobRequest::illustration("ch1"),
            JobRequest::illustration("ch1"),
        ])
        .unwrap();

        assert_eq!(planned[0].depends_on, vec![3, 2]);
        assert!(planned[1].depends_on.is_empty());
    }

    #[test]
    fn test_plan_uses_artifact_references() {
        let planned = plan_submission(vec![
            JobRequest::audio("ch1"),
            JobRequest::video("ch1").with_param("illustration_artifact", "abc"),
        ])
        .unwrap();

        assert_eq!(planned[1].depends_on, vec![0]);
        assert_eq!(
            planned[1].input_refs,
            vec![(ContentType::Illustration, "abc".to_string())]
        );
    }

    #[test]
    fn test_jobs_without_dependencies_are_ready_after_insert() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, chapter("ch1"));

        assert_eq!(state(&table, &batch.job_ids[0]), JobState::Ready);
        assert_eq!(state(&table, &batch.job_ids[1]), JobState::Ready);
        assert_eq!(state(&table, &batch.job_ids[2]), JobState::Pending);

        let video = table.job(&batch.job_ids[2]).unwrap();
        assert_eq!(
            video.dependencies,
            vec![batch.job_ids[0].clone(), batch.job_ids[1].clone()]
        );

        let effects = table.take_effects();
        assert_eq!(effects.jobs.len(), 3);
        assert_eq!(effects.batches.len(), 1);
        assert!(table.take_effects().is_empty());
    }

    #[test]
    fn test_dispatch_respects_slots_and_creation_order() {
        let mut table = table(2, 3);
        let first = submit(
            &mut table,
            vec![JobRequest::illustration("a"), JobRequest::illustration("b")],
        );
        let second = submit(&mut table, vec![JobRequest::illustration("c")]);

        let tasks = table.dispatch_ready(Utc::now());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].job_id, first.job_ids[0]);
        assert_eq!(tasks[1].job_id, first.job_ids[1]);
        assert_eq!(tasks[0].attempt, 1);
        assert!(table.dispatch_ready(Utc::now()).is_empty());
        assert_eq!(state(&table, &second.job_ids[0]), JobState::Ready);

        succeed(&mut table, &tasks[0], "a");
        let next = table.dispatch_ready(Utc::now());
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job_id, second.job_ids[0]);
    }

    #[test]
    fn test_video_waits_for_both_inputs() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, chapter("ch1"));
        let video_id = batch.job_ids[2].clone();

        let tasks = table.dispatch_ready(Utc::now());
        assert_eq!(tasks.len(), 2);

        succeed(&mut table, &tasks[1], "audio");
        assert_eq!(state(&table, &video_id), JobState::Pending);
        assert!(table.dispatch_ready(Utc::now()).is_empty());

        succeed(&mut table, &tasks[0], "image");
        assert_eq!(state(&table, &video_id), JobState::Ready);

        let video_tasks = table.dispatch_ready(Utc::now());
        assert_eq!(video_tasks.len(), 1);
        let inputs = &video_tasks[0].inputs;
        assert_eq!(
            inputs.illustration.as_ref().map(|a| a.content_hash.clone()),
            Some(hash_bytes(b"image"))
        );
        assert_eq!(
            inputs.audio.as_ref().map(|a| a.content_hash.clone()),
            Some(hash_bytes(b"audio"))
        );
    }

    #[test]
    fn test_retryable_error_backs_off_then_requeues() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, vec![JobRequest::audio("ch1")]);
        let id = &batch.job_ids[0];

        let tasks = table.dispatch_ready(Utc::now());
        let backoff = backoff_of(fail(&mut table, &tasks[0], GenerationError::rate_limited("429")));
        assert_eq!(backoff.delay, Duration::from_millis(10));

        let job = table.job(id).unwrap();
        assert_eq!(job.state, JobState::Ready);
        assert!(job.next_attempt_at.is_some());
        assert!(table.dispatch_ready(Utc::now()).is_empty());
        assert_eq!(table.pending_backoffs(Utc::now()).len(), 1);

        assert!(!table.requeue(id, backoff.token + 1));
        assert!(table.requeue(id, backoff.token));
        assert!(!table.requeue(id, backoff.token));
        assert!(table.pending_backoffs(Utc::now()).is_empty());
        let retry = table.dispatch_ready(Utc::now());
        assert_eq!(retry[0].attempt, 2);
    }

    #[test]
    fn test_stale_backoff_timer_after_retry_is_ignored() {
        let mut table = JobTable::new(
            SlotConfig::uniform(1),
            RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1_000,
                max_delay_ms: 1_000,
                backoff_multiplier: 2.0,
            },
        );
        let batch = submit(&mut table, vec![JobRequest::audio("ch1")]);
        let id = &batch.job_ids[0];

        let tasks = table.dispatch_ready(Utc::now());
        let stale = backoff_of(fail(&mut table, &tasks[0], GenerationError::rate_limited("429")));

        table.cancel_job(id, Utc::now()).unwrap();
        table.retry_job(id).unwrap();
        let tasks = table.dispatch_ready(Utc::now());
        assert_eq!(tasks[0].attempt, 1);
        let current = backoff_of(fail(&mut table, &tasks[0], GenerationError::rate_limited("429")));
        assert_ne!(stale.token, current.token);

        // The timer from the first run must not cut the new backoff short.
        assert!(!table.requeue(id, stale.token));
        assert!(table.dispatch_ready(Utc::now()).is_empty());
        assert_eq!(state(&table, id), JobState::Ready);

        let pending = table.pending_backoffs(Utc::now());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.token, current.token);
        assert!(pending[0].1.delay > Duration::from_millis(500));

        assert!(table.requeue(id, current.token));
        assert_eq!(table.dispatch_ready(Utc::now()).len(), 1);
    }

    #[test]
    fn test_attempts_exhausted_fails_and_cancels_dependents() {
        let mut table = table(4, 2);
        let batch = submit(&mut table, chapter("ch1"));
        let (image_id, audio_id, video_id) =
            (&batch.job_ids[0], &batch.job_ids[1], &batch.job_ids[2]);

        let tasks = table.dispatch_ready(Utc::now());
        let image_task = tasks.iter().find(|t| &t.job_id == image_id).unwrap().clone();
        let audio_task = tasks.iter().find(|t| &t.job_id == audio_id).unwrap().clone();

        let backoff = backoff_of(fail(&mut table, &image_task, GenerationError::timeout("slow")));
        table.requeue(image_id, backoff.token);
        let second = table.dispatch_ready(Utc::now());
        let completion = fail(&mut table, &second[0], GenerationError::timeout("slow"));
        assert_eq!(completion, Completion::Finished(JobState::Failed));

        let image = table.job(image_id).unwrap();
        assert_eq!(image.attempt_count, 2);
        assert_eq!(state(&table, video_id), JobState::Cancelled);
        assert_eq!(
            table.job(video_id).unwrap().cancel_cause,
            Some(CancelCause::DependencyFailed {
                job_id: image_id.clone()
            })
        );

        // The sibling is untouched and finishes normally.
        assert_eq!(state(&table, audio_id), JobState::Running);
        succeed(&mut table, &audio_task, "audio");
        let snapshot = table.batch_snapshot(&batch.id).unwrap();
        assert_eq!(snapshot.status, BatchStatus::Failed);
    }

    #[test]
    fn test_non_retryable_error_fails_immediately() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, vec![JobRequest::illustration("ch1")]);
        let tasks = table.dispatch_ready(Utc::now());

        let completion = fail(&mut table, &tasks[0], GenerationError::invalid_input("nsfw"));
        assert_eq!(completion, Completion::Finished(JobState::Failed));
        assert_eq!(table.job(&batch.job_ids[0]).unwrap().attempt_count, 1);
    }

    #[test]
    fn test_retry_waits_for_cancelled_attempt_to_return() {
        let mut table = table(1, 3);
        let batch = submit(&mut table, vec![JobRequest::audio("ch1")]);
        let tasks = table.dispatch_ready(Utc::now());
        let id = &batch.job_ids[0];
        table.cancel_job(id, Utc::now()).unwrap();

        let result = table.retry_job(id);
        assert!(matches!(result, Err(OrchestratorError::InvalidState { .. })));

        assert_eq!(succeed(&mut table, &tasks[0], "late"), Completion::Discarded);
        let rearmed = table.retry_job(id).unwrap();
        assert_eq!(rearmed.state, JobState::Ready);
    }

    #[test]
    fn test_cancel_running_discards_result_and_frees_slot() {
        let mut table = table(1, 3);
        let batch = submit(
            &mut table,
            vec![JobRequest::audio("ch1"), JobRequest::audio("ch2")],
        );
        let tasks = table.dispatch_ready(Utc::now());
        assert_eq!(tasks.len(), 1);

        let cancelled = table.cancel_job(&batch.job_ids[0], Utc::now()).unwrap();
        assert_eq!(cancelled.state, JobState::Cancelled);

        // The slot stays occupied until the adapter returns.
        assert!(table.dispatch_ready(Utc::now()).is_empty());
        assert_eq!(succeed(&mut table, &tasks[0], "late"), Completion::Discarded);
        assert_eq!(state(&table, &batch.job_ids[0]), JobState::Cancelled);
        assert!(table.job(&batch.job_ids[0]).unwrap().artifact.is_none());

        let next = table.dispatch_ready(Utc::now());
        assert_eq!(next[0].job_id, batch.job_ids[1]);
    }

    #[test]
    fn test_cancel_batch_keeps_succeeded_members() {
        let mut table = table(1, 3);
        let batch = submit(
            &mut table,
            vec![
                JobRequest::illustration("ch1"),
                JobRequest::illustration("ch2"),
                JobRequest::illustration("ch3"),
            ],
        );
        let tasks = table.dispatch_ready(Utc::now());
        succeed(&mut table, &tasks[0], "one");
        table.dispatch_ready(Utc::now());

        let snapshot = table.cancel_batch(&batch.id, Utc::now()).unwrap();
        let states: Vec<JobState> = snapshot.jobs.iter().map(|j| j.state).collect();
        assert_eq!(
            states,
            vec![JobState::Succeeded, JobState::Cancelled, JobState::Cancelled]
        );
        assert_eq!(snapshot.status, BatchStatus::Cancelled);

        // Cancelling a terminal job is a no-op.
        let again = table.cancel_job(&batch.job_ids[0], Utc::now()).unwrap();
        assert_eq!(again.state, JobState::Succeeded);
    }

    #[test]
    fn test_notifications_fire_once_per_terminal_transition() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, vec![JobRequest::audio("ch1")]);
        table.take_effects();

        let tasks = table.dispatch_ready(Utc::now());
        succeed(&mut table, &tasks[0], "a");
        table.cancel_batch(&batch.id, Utc::now()).unwrap();

        let effects = table.take_effects();
        let kinds: Vec<&str> = effects
            .notifications
            .iter()
            .map(|n| n.notification_type())
            .collect();
        assert_eq!(kinds, vec!["job_finished", "batch_finished"]);
    }

    #[test]
    fn test_retry_job_rearms_cancelled_dependents() {
        let mut table = table(4, 1);
        let batch = submit(&mut table, chapter("ch1"));
        let (image_id, audio_id, video_id) =
            (&batch.job_ids[0], &batch.job_ids[1], &batch.job_ids[2]);

        let tasks = table.dispatch_ready(Utc::now());
        for task in &tasks {
            if &task.job_id == image_id {
                fail(&mut table, task, GenerationError::provider_unavailable("down"));
            } else {
                succeed(&mut table, task, "audio");
            }
        }
        assert_eq!(state(&table, video_id), JobState::Cancelled);
        assert!(table.batch_snapshot(&batch.id).unwrap().is_finished());

        // Succeeded jobs and dependents of dead jobs cannot be retried.
        assert!(matches!(
            table.retry_job(audio_id),
            Err(OrchestratorError::InvalidState { .. })
        ));
        assert!(matches!(
            table.retry_job(video_id),
            Err(OrchestratorError::InvalidState { .. })
        ));

        let job = table.retry_job(image_id).unwrap();
        assert_eq!(job.state, JobState::Ready);
        assert_eq!(job.attempt_count, 0);
        assert!(job.last_error.is_none());
        assert_eq!(state(&table, video_id), JobState::Pending);
        assert!(!table.batch_snapshot(&batch.id).unwrap().is_finished());

        let tasks = table.dispatch_ready(Utc::now());
        succeed(&mut table, &tasks[0], "image");
        assert_eq!(state(&table, video_id), JobState::Ready);
    }

    #[test]
    fn test_purge_requires_finished_batch() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, vec![JobRequest::audio("ch1")]);

        assert!(matches!(
            table.purge_batch(&batch.id),
            Err(OrchestratorError::InvalidState { .. })
        ));

        let tasks = table.dispatch_ready(Utc::now());
        succeed(&mut table, &tasks[0], "a");
        table.purge_batch(&batch.id).unwrap();

        assert!(table.job(&batch.job_ids[0]).is_none());
        assert!(table.batch_snapshot(&batch.id).is_none());
        assert_eq!(table.take_effects().deleted_batches, vec![batch.id.clone()]);
        assert!(matches!(
            table.purge_batch(&batch.id),
            Err(OrchestratorError::BatchNotFound(_))
        ));
    }

    #[test]
    fn test_reuse_is_opt_in() {
        let mut table = table(4, 3);
        let first = submit(&mut table, vec![JobRequest::illustration("ch1")]);
        let tasks = table.dispatch_ready(Utc::now());
        succeed(&mut table, &tasks[0], "image");

        let plain = submit(&mut table, vec![JobRequest::illustration("ch1")]);
        let reusing = submit(
            &mut table,
            vec![JobRequest::illustration("ch1").with_reuse(true)],
        );

        let tasks = table.dispatch_ready(Utc::now());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].job_id, plain.job_ids[0]);

        let reused = table.job(&reusing.job_ids[0]).unwrap();
        assert_eq!(reused.state, JobState::Succeeded);
        assert_eq!(reused.attempt_count, 0);
        assert_eq!(
            reused.artifact,
            table.job(&first.job_ids[0]).unwrap().artifact
        );
    }

    #[test]
    fn test_inputs_are_slotted_by_dependency_type() {
        let mut table = table(4, 3);
        let batch = submit(&mut table, chapter("ch1"));
        let tasks = table.dispatch_ready(Utc::now());

        // Identical bytes stored earlier as audio come back with that type.
        let shared = artifact(ContentType::Audio, "same-bytes");
        for task in &tasks {
            table.complete(
                task.content_type,
                &task.job_id,
                task.attempt,
                Ok((shared.clone(), 1)),
                Utc::now(),
            );
        }

        let video = table.dispatch_ready(Utc::now());
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].job_id, batch.job_ids[2]);
        assert_eq!(video[0].inputs.illustration.as_ref(), Some(&shared));
        assert_eq!(video[0].inputs.audio.as_ref(), Some(&shared));
    }

    #[test]
    fn test_purge_evicts_reuse_entries() {
        let mut table = table(4, 3);
        let first = submit(&mut table, vec![JobRequest::illustration("ch1")]);
        let tasks = table.dispatch_ready(Utc::now());
        succeed(&mut table, &tasks[0], "image");
        table.purge_batch(&first.id).unwrap();

        let reusing = submit(
            &mut table,
            vec![JobRequest::illustration("ch1").with_reuse(true)],
        );
        let tasks = table.dispatch_ready(Utc::now());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].job_id, reusing.job_ids[0]);
        assert_eq!(state(&table, &reusing.job_ids[0]), JobState::Running);
    }

    #[test]
    fn test_list_and_pool_status() {
        let mut table = table(1, 3);
        submit(
            &mut table,
            vec![
                JobRequest::illustration("ch1"),
                JobRequest::illustration("ch2"),
                JobRequest::audio("ch1"),
            ],
        );
        table.dispatch_ready(Utc::now());

        let ch1 = table.list(&JobFilter::new().with_chapter("ch1"));
        assert_eq!(ch1.len(), 2);
        assert!(ch1[0].sequence < ch1[1].sequence);

        let page = table.list(&JobFilter::new().with_offset(1).with_limit(1));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].chapter_ref, "ch2");

        let pools = table.pool_status();
        let illustration = &pools[0];
        assert_eq!(illustration.content_type, ContentType::Illustration);
        assert_eq!(illustration.active, 1);
        assert_eq!(illustration.queued, 1);
        assert_eq!(illustration.max, 1);
    }
}
