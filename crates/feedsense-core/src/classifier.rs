//! Sentiment classifier contract and the default VADER implementation.
//!
//! The worker only depends on [`Classifier`]. Implementations must be deterministic for a
//! fixed `(text, model)` pair, since an item may be classified more than once after a crash,
//! and must treat empty or missing text as neutral input rather than failing.

use vader_sentiment::SentimentIntensityAnalyzer;

use crate::error::ClassifierError;
use crate::models::Sentiment;

/// Maps an item's text to a [`Sentiment`].
pub trait Classifier: Send + Sync {
    /// Model/version tag written alongside every result.
    fn model(&self) -> &str;

    /// Score `text`. `None` and `""` are valid inputs.
    fn classify(&self, text: Option<&str>) -> Result<Sentiment, ClassifierError>;
}

pub const VADER_MODEL: &str = "vader-0.1";

/// VADER lexicon and rule based classifier. The score is VADER's normalised `compound` value.
pub struct VaderClassifier {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl VaderClassifier {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }
}

impl Default for VaderClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for VaderClassifier {
    fn model(&self) -> &str {
        VADER_MODEL
    }

    fn classify(&self, text: Option<&str>) -> Result<Sentiment, ClassifierError> {
        let text = text.unwrap_or("").trim();
        if text.is_empty() {
            return Ok(Sentiment::from_score(0.0, VADER_MODEL));
        }

        let scores = self.analyzer.polarity_scores(text);
        let compound = scores
            .get("compound")
            .copied()
            .ok_or_else(|| ClassifierError::Failed("analyzer returned no compound score".into()))?;
        Ok(Sentiment::from_score(compound, VADER_MODEL))
    }
}
