use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub appid: u64,
    pub name: String,
}

/// One row of `apps.csv`. Keyed by `app_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRow {
    pub app_id: u64,
    pub name: String,
    pub app_type: String,
    pub description: String,
    pub total_reviews: u64,
    pub total_positive: u64,
    pub total_negative: u64,
    pub price_currency: String,
    pub price: String,
    #[serde(with = "json_column")]
    pub genres: Vec<String>,
    #[serde(with = "json_column")]
    pub categories: Vec<String>,
    #[serde(with = "json_column")]
    pub platforms: BTreeSet<String>,
    /// Index into `developers.csv`, `-1` when unknown.
    pub developer_id: i64,
    /// Index into `publishers.csv`, `-1` when unknown.
    pub publisher_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRow {
    pub review_id: u64,
    pub app_id: u64,
    /// Minutes played when the review was written.
    pub playtime_at_review: Option<u64>,
    pub review: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Header,
    Capsule,
    Description,
    Screenshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRow {
    pub image_id: u64,
    pub app_id: u64,
    pub image_type: ImageKind,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailerRow {
    pub trailer_id: u64,
    pub app_id: u64,
    pub trailer_url: String,
}

/// Row of `publishers.csv` / `developers.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRow {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    ItemLimit,
    RateLimited,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub new_apps: usize,
    pub new_queried: usize,
    pub outcome: RunOutcome,
}

/// Stores a list-like value as a JSON string inside a single CSV cell.
mod json_column {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize as _, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        let encoded = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: DeserializeOwned + Default,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
