//! Data models for the feedback queue.

mod feedback;
mod sentiment;

pub use feedback::Feedback;
pub use sentiment::{Sentiment, SentimentLabel};
