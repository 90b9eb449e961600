use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An enrollment term. Fetched once per session and treated as immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub id: i64,
    pub name: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}
