use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::FetchError;
use crate::formats::CatalogEntry;

pub const DEFAULT_STORE_BASE_URL: &str = "https://store.steampowered.com";
pub const DEFAULT_API_BASE_URL: &str = "https://api.steampowered.com";

/// Cursor value that asks the review endpoint for the first page.
pub const FIRST_REVIEW_CURSOR: &str = "*";

const REVIEWS_PER_PAGE: &str = "100";

/// Remote storefront as seen by the crawler.
#[async_trait]
pub trait StoreApi: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, FetchError>;

    /// `Ok(None)` means the storefront has no record for `app_id`.
    async fn fetch_item_details(&self, app_id: u64) -> Result<Option<AppDetails>, FetchError>;

    async fn fetch_review_page(&self, app_id: u64, cursor: &str)
    -> Result<ReviewPage, FetchError>;
}

/// Store page data for one app. Each field decodes on its own: a value of
/// an unexpected shape leaves just that field empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDetails {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub app_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub steam_appid: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_free: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub short_description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub detailed_description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub header_image: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub capsule_image: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub developers: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub publishers: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub price_overview: Option<PriceOverview>,
    #[serde(default, deserialize_with = "lenient")]
    pub platforms: Option<BTreeMap<String, bool>>,
    #[serde(default, deserialize_with = "lenient")]
    pub categories: Option<Vec<Described>>,
    #[serde(default, deserialize_with = "lenient")]
    pub genres: Option<Vec<Described>>,
    #[serde(default, deserialize_with = "lenient")]
    pub screenshots: Option<Vec<Screenshot>>,
    #[serde(default, deserialize_with = "lenient")]
    pub movies: Option<Vec<Movie>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceOverview {
    #[serde(default, deserialize_with = "lenient")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub final_formatted: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Described {
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Screenshot {
    #[serde(default, deserialize_with = "lenient")]
    pub path_full: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Movie {
    #[serde(default, deserialize_with = "lenient")]
    pub mp4: Option<MovieSources>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieSources {
    #[serde(default, deserialize_with = "lenient")]
    pub max: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewPage {
    /// Only meaningful on the first page; later pages carry a partial summary.
    #[serde(default)]
    pub query_summary: Option<QuerySummary>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct QuerySummary {
    #[serde(default)]
    pub num_reviews: u64,
    #[serde(default)]
    pub total_reviews: u64,
    #[serde(default)]
    pub total_positive: u64,
    #[serde(default)]
    pub total_negative: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Review {
    pub recommendationid: Option<String>,
    pub author: Option<ReviewAuthor>,
    #[serde(default)]
    pub review: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewAuthor {
    pub playtime_at_review: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AppListResponse {
    applist: AppList,
}

#[derive(Debug, Deserialize)]
struct AppList {
    apps: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub store_base_url: String,
    pub api_base_url: String,
    pub timeout: Duration,
}

/// [`StoreApi`] backed by the public Steam storefront endpoints.
#[derive(Debug, Clone)]
pub struct SteamClient {
    client: reqwest::Client,
    store_base_url: String,
    api_base_url: String,
}

impl SteamClient {
    pub fn new(config: SteamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build storefront http client")?;

        Ok(Self {
            client,
            store_base_url: config.store_base_url.trim_end_matches('/').to_owned(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn app_list_endpoint(&self) -> String {
        format!("{}/ISteamApps/GetAppList/v2/", self.api_base_url)
    }

    fn app_details_endpoint(&self) -> String {
        format!("{}/api/appdetails", self.store_base_url)
    }

    fn app_reviews_endpoint(&self, app_id: u64) -> String {
        format!("{}/appreviews/{app_id}", self.store_base_url)
    }

    async fn get_json(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(endpoint)
            .query(query)
            .header(USER_AGENT, "storefront-harvest/0.1")
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                endpoint: endpoint.to_owned(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                endpoint: endpoint.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_owned(),
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|source| FetchError::Transport {
                endpoint: endpoint.to_owned(),
                source,
            })?;
        serde_json::from_str(&raw).map_err(|source| FetchError::Decode {
            endpoint: endpoint.to_owned(),
            source,
        })
    }
}

#[async_trait]
impl StoreApi for SteamClient {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, FetchError> {
        let endpoint = self.app_list_endpoint();
        let value = self.get_json(&endpoint, &[]).await?;
        let list: AppListResponse =
            serde_json::from_value(value).map_err(|source| FetchError::Decode {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(list.applist.apps)
    }

    async fn fetch_item_details(&self, app_id: u64) -> Result<Option<AppDetails>, FetchError> {
        let endpoint = self.app_details_endpoint();
        let app_id_str = app_id.to_string();
        let value = self
            .get_json(&endpoint, &[("appids", app_id_str.as_str())])
            .await?;
        Ok(details_from_response(app_id, &value))
    }

    async fn fetch_review_page(
        &self,
        app_id: u64,
        cursor: &str,
    ) -> Result<ReviewPage, FetchError> {
        let endpoint = self.app_reviews_endpoint(app_id);
        let value = self
            .get_json(
                &endpoint,
                &[
                    ("json", "1"),
                    ("num_per_page", REVIEWS_PER_PAGE),
                    ("cursor", cursor),
                    ("filter", "recent"),
                    ("purchase_type", "all"),
                ],
            )
            .await?;
        serde_json::from_value(value).map_err(|source| FetchError::Decode { endpoint, source })
    }
}

/// Pulls `{"<id>": {"success": true, "data": {..}}}` apart.
///
/// An unsuccessful entry, a missing `data` object, or a `data` object that
/// does not decode all count as "no record".
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            tracing::debug!(%err, "ignoring malformed app details field");
            Ok(None)
        }
    }
}

fn details_from_response(app_id: u64, value: &serde_json::Value) -> Option<AppDetails> {
    let entry = value.get(app_id.to_string())?;
    let success = entry
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !success {
        return None;
    }

    let data = entry.get("data")?;
    match serde_json::from_value::<AppDetails>(data.clone()) {
        Ok(details) => Some(details),
        Err(err) => {
            tracing::warn!(app_id, %err, "app details did not decode; treating as absent");
            None
        }
    }
}
