//! feedsense database layer
//!
//! The PostgreSQL claim store for feedback items, the trait abstractions the worker is
//! written against, and pool/migration setup.

pub mod claim_traits;
pub mod db;

pub use claim_traits::{ClaimStore, ClaimedBatch};
pub use db::feedback::{FeedbackRepository, PgClaimedBatch};
pub use db::pool::{connect, run_migrations, MIGRATOR};
