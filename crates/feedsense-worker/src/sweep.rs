//! Sweep executor: one bounded claim → classify → record → commit cycle.

use std::sync::Arc;

use feedsense_core::{Classifier, WorkerError};
use feedsense_db::ClaimStore;
use uuid::Uuid;

#[derive(Clone)]
pub struct SweepExecutor {
    store: Arc<dyn ClaimStore>,
    classifier: Arc<dyn Classifier>,
}

impl SweepExecutor {
    pub fn new(store: Arc<dyn ClaimStore>, classifier: Arc<dyn Classifier>) -> Self {
        Self { store, classifier }
    }

    /// Process at most `limit` pending items and return how many were resolved.
    ///
    /// The batch commits as a unit. If classification or a write fails, the batch is dropped
    /// uncommitted, nothing from it becomes visible, and the error is returned; every item of
    /// the batch is still pending for the next sweep. `Ok(0)` means the queue was idle.
    #[tracing::instrument(skip(self), fields(model = %self.classifier.model()))]
    pub async fn sweep(&self, limit: i64) -> Result<usize, WorkerError> {
        let mut batch = self.store.claim_batch(limit).await?;
        if batch.items().is_empty() {
            tracing::debug!("No pending feedback");
            return Ok(0);
        }

        let work: Vec<(Uuid, Option<String>)> = batch
            .items()
            .iter()
            .map(|item| (item.id, item.message.clone()))
            .collect();
        tracing::info!(count = work.len(), "Processing feedback batch");

        for (id, message) in &work {
            let sentiment = self
                .classifier
                .classify(message.as_deref())
                .map_err(|source| WorkerError::Classifier { id: *id, source })?;
            tracing::trace!(feedback_id = %id, label = %sentiment.label, score = sentiment.score, "Classified");
            batch.record_result(*id, &sentiment).await?;
        }

        batch.commit().await?;
        tracing::info!(count = work.len(), "Updated sentiments");
        Ok(work.len())
    }
}
