use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Sentiment;

/// A row of the `feedback` table.
///
/// An item is pending while `sentiment` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_version: Option<String>,
    pub sentiment_updated_at: Option<DateTime<Utc>>,
}

impl Feedback {
    pub fn is_pending(&self) -> bool {
        self.sentiment.is_none()
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Feedback {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::types::Json;
        use sqlx::Row;

        let sentiment: Option<Json<Sentiment>> = row.try_get("sentiment")?;
        Ok(Feedback {
            id: row.try_get("id")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
            sentiment: sentiment.map(|Json(s)| s),
            sentiment_version: row.try_get("sentiment_version")?,
            sentiment_updated_at: row.try_get("sentiment_updated_at")?,
        })
    }
}
