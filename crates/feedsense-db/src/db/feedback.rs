use async_trait::async_trait;
use feedsense_core::{Feedback, Sentiment, WorkerError};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::claim_traits::{ClaimStore, ClaimedBatch};

const FEEDBACK_COLUMNS: &str =
    "id, message, created_at, sentiment, sentiment_version, sentiment_updated_at";

#[derive(Clone)]
pub struct FeedbackRepository {
    pool: PgPool,
    channel: String,
}

impl FeedbackRepository {
    /// `channel` is the LISTEN/NOTIFY channel signalled by [`Self::insert_feedback`].
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Insert a new pending feedback item.
    ///
    /// With `notify` set, `pg_notify(channel, id)` is issued inside the insert transaction so
    /// listeners only hear about committed rows. A failed notify is logged and ignored;
    /// workers will still find the row on their next timed sweep.
    #[tracing::instrument(skip(self, message))]
    pub async fn insert_feedback(
        &self,
        message: Option<&str>,
        notify: bool,
    ) -> Result<Feedback, WorkerError> {
        let mut tx = self.pool.begin().await?;

        let feedback: Feedback = sqlx::query_as::<Postgres, Feedback>(&format!(
            "INSERT INTO feedback (message) VALUES ($1) RETURNING {}",
            FEEDBACK_COLUMNS
        ))
        .bind(message)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to insert feedback");
            e
        })?;

        if notify {
            if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&self.channel)
                .bind(feedback.id.to_string())
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(
                    error = %e,
                    feedback_id = %feedback.id,
                    "Failed to send pg_notify for new feedback, workers will discover it via polling"
                );
            }
        }

        tx.commit().await?;

        tracing::debug!(feedback_id = %feedback.id, notify, "Feedback inserted");
        Ok(feedback)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_feedback(&self, id: Uuid) -> Result<Option<Feedback>, WorkerError> {
        let feedback = sqlx::query_as::<Postgres, Feedback>(&format!(
            "SELECT {} FROM feedback WHERE id = $1",
            FEEDBACK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(feedback)
    }

    #[tracing::instrument(skip(self))]
    pub async fn count_pending(&self) -> Result<i64, WorkerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE sentiment IS NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl ClaimStore for FeedbackRepository {
    /// Claim pending rows with `FOR UPDATE SKIP LOCKED`.
    ///
    /// The row locks live in the returned batch's transaction. Concurrent claimers skip the
    /// locked rows instead of waiting on them, so batches handed to different workers are
    /// always disjoint.
    #[tracing::instrument(skip(self))]
    async fn claim_batch(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, WorkerError> {
        let mut tx = self.pool.begin().await?;

        let items: Vec<Feedback> = sqlx::query_as::<Postgres, Feedback>(&format!(
            r#"
            SELECT {}
            FROM feedback
            WHERE sentiment IS NULL
            ORDER BY created_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            FEEDBACK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if items.is_empty() {
            if let Err(e) = tx.rollback().await {
                tracing::warn!(error = %e, "Failed to roll back empty claim transaction");
            }
            tracing::trace!("No pending feedback");
            return Ok(Box::new(PgClaimedBatch {
                tx: None,
                items,
            }));
        }

        tracing::debug!(count = items.len(), "Feedback batch claimed");
        Ok(Box::new(PgClaimedBatch {
            tx: Some(tx),
            items,
        }))
    }
}

/// A claimed batch backed by an open transaction holding the row locks.
///
/// Dropping it without commit rolls the transaction back.
pub struct PgClaimedBatch {
    tx: Option<Transaction<'static, Postgres>>,
    items: Vec<Feedback>,
}

#[async_trait]
impl ClaimedBatch for PgClaimedBatch {
    fn items(&self) -> &[Feedback] {
        &self.items
    }

    async fn record_result(&mut self, id: Uuid, sentiment: &Sentiment) -> Result<(), WorkerError> {
        let tx = match self.tx.as_mut() {
            Some(tx) if self.items.iter().any(|item| item.id == id) => tx,
            _ => return Err(WorkerError::Database(sqlx::Error::RowNotFound)),
        };

        let result = sqlx::query(
            r#"
            UPDATE feedback
            SET sentiment = $2,
                sentiment_version = $3,
                sentiment_updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(sentiment))
        .bind(&sentiment.model)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(WorkerError::Database(sqlx::Error::RowNotFound));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), WorkerError> {
        let PgClaimedBatch { tx, items } = *self;
        if let Some(tx) = tx {
            tx.commit().await?;
            tracing::debug!(count = items.len(), "Feedback batch committed");
        }
        Ok(())
    }
}
