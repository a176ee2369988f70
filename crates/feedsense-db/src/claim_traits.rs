//! Claim store trait abstractions
//!
//! The sweep executor is written against these traits so it can run against PostgreSQL in
//! production and against an in-memory store in tests.

use async_trait::async_trait;
use feedsense_core::{Feedback, Sentiment, WorkerError};
use uuid::Uuid;

/// Durable queue of feedback items that can hand out exclusive batches of pending work.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claim up to `limit` pending items, oldest first.
    ///
    /// Items in the returned batch are invisible to every other concurrent claimer until the
    /// batch is committed or dropped. An empty batch means there is no pending work.
    async fn claim_batch(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, WorkerError>;
}

/// Exclusively held set of items from one [`ClaimStore::claim_batch`] call.
///
/// Dropping a batch without calling [`ClaimedBatch::commit`] releases the claim and discards
/// every result recorded through it; the items stay pending.
#[async_trait]
pub trait ClaimedBatch: Send {
    /// Claimed items in claim order.
    fn items(&self) -> &[Feedback];

    /// Stage the result for one claimed item. Not visible to readers until commit.
    async fn record_result(&mut self, id: Uuid, sentiment: &Sentiment) -> Result<(), WorkerError>;

    /// Atomically publish every recorded result and release the claim.
    async fn commit(self: Box<Self>) -> Result<(), WorkerError>;
}
