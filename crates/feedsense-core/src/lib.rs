//! feedsense core library
//!
//! Domain models, the classifier contract with its default VADER implementation,
//! worker configuration and the error taxonomy shared by the store and the worker.

pub mod classifier;
pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use classifier::{Classifier, VaderClassifier};
pub use config::{LogFormat, WorkerConfig};
pub use error::{ClassifierError, ConfigError, ListenError, WorkerError};
pub use models::{Feedback, Sentiment, SentimentLabel};
