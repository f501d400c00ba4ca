//! Batch-level convenience layer over the orchestrator.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::job::{Batch, BatchSnapshot, ContentType, JobRequest, Params};

use super::runner::Orchestrator;
use super::types::OrchestratorError;

/// Submits, waits on and cancels whole batches.
#[derive(Clone)]
pub struct BatchCoordinator {
    orchestrator: Orchestrator,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn submit(&self, requests: Vec<JobRequest>) -> Result<Batch, OrchestratorError> {
        self.orchestrator.submit(requests).await
    }

    /// Submit the same content types for every chapter.
    ///
    /// Inputs come before video within each chapter so a requested video is
    /// always wired to its same-submission siblings.
    pub async fn submit_chapters(
        &self,
        chapters: &[String],
        content_types: &[ContentType],
        params: &Params,
    ) -> Result<Batch, OrchestratorError> {
        // ALL lists video last.
        let ordered: Vec<ContentType> = ContentType::ALL
            .into_iter()
            .filter(|c| content_types.contains(c))
            .collect();

        let requests = chapters
            .iter()
            .flat_map(|chapter| {
                ordered.iter().map(move |content_type| {
                    JobRequest::new(*content_type, chapter.clone()).with_params(params.clone())
                })
            })
            .collect();

        self.orchestrator.submit(requests).await
    }

    pub async fn status(&self, batch_id: &str) -> Result<BatchSnapshot, OrchestratorError> {
        self.orchestrator.batch_status(batch_id).await
    }

    /// Wait until every job of the batch is terminal or the timeout elapses.
    ///
    /// On timeout the current (still in progress) snapshot is returned.
    pub async fn wait(
        &self,
        batch_id: &str,
        timeout: Duration,
    ) -> Result<BatchSnapshot, OrchestratorError> {
        let deadline = Instant::now() + timeout;
        let mut changes = self.orchestrator.subscribe();

        loop {
            changes.borrow_and_update();
            let snapshot = self.orchestrator.batch_status(batch_id).await?;
            if snapshot.is_finished() {
                info!(
                    batch_id = %batch_id,
                    status = snapshot.status.as_str(),
                    "Batch finished"
                );
                return Ok(snapshot);
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Ok(snapshot);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(batch_id = %batch_id, "Wait timed out");
                    return self.orchestrator.batch_status(batch_id).await;
                }
            }
        }
    }

    /// Cancel all non-terminal members of a batch.
    pub async fn cancel(&self, batch_id: &str) -> Result<BatchSnapshot, OrchestratorError> {
        self.orchestrator.cancel_batch(batch_id).await
    }
}
