use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Scores at or above this value are labelled positive.
const POSITIVE_THRESHOLD: f64 = 0.05;

/// Scores at or below this value are labelled negative.
const NEGATIVE_THRESHOLD: f64 = -0.05;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Derive the label from a compound score using the two fixed thresholds.
    pub fn from_score(score: f64) -> Self {
        if score >= POSITIVE_THRESHOLD {
            SentimentLabel::Positive
        } else if score <= NEGATIVE_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

impl Display for SentimentLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SentimentLabel::Positive => write!(f, "positive"),
            SentimentLabel::Neutral => write!(f, "neutral"),
            SentimentLabel::Negative => write!(f, "negative"),
        }
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            _ => Err(format!("Invalid sentiment label: {}", s)),
        }
    }
}

/// Classification result stored in the `sentiment` JSONB column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Compound score in `[-1.0, 1.0]`.
    pub score: f64,
    pub label: SentimentLabel,
    /// Model/version tag of the classifier that produced this result.
    pub model: String,
}

impl Sentiment {
    /// Build a result from a compound score, clamping it into range and deriving the label.
    pub fn from_score(score: f64, model: impl Into<String>) -> Self {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(-1.0, 1.0)
        };
        Self {
            score,
            label: SentimentLabel::from_score(score),
            model: model.into(),
        }
    }
}
