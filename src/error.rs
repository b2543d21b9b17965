use thiserror::Error;

/// Failures talking to the storefront that stop a crawl.
///
/// "No record for this id" is not an error; it is `Ok(None)` from
/// [`crate::steam::StoreApi::fetch_item_details`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by storefront (HTTP 429) at {endpoint}")]
    RateLimited { endpoint: String },

    #[error("storefront returned HTTP {status} at {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
