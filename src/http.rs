//! HTTP client for the map item endpoints.
//!
//! Speaks the two `map-items` endpoints and the search-form POST. The
//! orchestrator consumes results through the [`crate::list_map::ItemSource`]
//! trait; this client is the production transport the embedding app drives,
//! delivering completed payloads back on the main thread.

use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;

use crate::error::{MapError, Result};
use crate::list_map::SearchResponse;
use crate::query::FormField;
use crate::MapItem;

/// Request timeout; a hung fetch must not pin the loading overlay forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// The map-items endpoint path.
const MAP_ITEMS_PATH: &str = "/store-locations/map-items";

#[derive(Serialize)]
struct IdsBody<'a> {
    id: &'a [i64],
}

/// Async client for the item endpoints.
pub struct ItemClient {
    base_url: String,
    client: Client,
}

impl ItemClient {
    /// Create a client against a base URL (scheme + host, no trailing
    /// slash).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(MapError::fetch)?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Fetch every map item.
    pub async fn fetch_map_items(&self) -> Result<Vec<MapItem>> {
        let url = format!("{}{}", self.base_url, MAP_ITEMS_PATH);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(MapError::fetch)?;
        let response = check_status(response)?;
        let items: Vec<MapItem> = response.json().await.map_err(MapError::fetch)?;
        debug!("fetched {} items", items.len());
        Ok(items)
    }

    /// Fetch the items matching an id list.
    pub async fn fetch_map_items_by_ids(&self, ids: &[i64]) -> Result<Vec<MapItem>> {
        let url = format!("{}{}", self.base_url, MAP_ITEMS_PATH);
        debug!("POST {} ({} ids)", url, ids.len());
        let response = self
            .client
            .post(&url)
            .json(&IdsBody { id: ids })
            .send()
            .await
            .map_err(MapError::fetch)?;
        let response = check_status(response)?;
        response.json().await.map_err(MapError::fetch)
    }

    /// Submit the search form to its action path and decode the
    /// total/ids payload.
    pub async fn submit_search(
        &self,
        action_path: &str,
        fields: &[FormField],
    ) -> Result<SearchResponse> {
        let url = format!("{}{}", self.base_url, action_path);
        let form: Vec<(&str, &str)> = fields
            .iter()
            .map(|field| (field.name.as_str(), field.value.as_str()))
            .collect();
        debug!("POST {} ({} fields)", url, form.len());
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(MapError::fetch)?;
        let response = check_status(response)?;
        response.json().await.map_err(MapError::fetch)
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        warn!("request to {} failed: {}", response.url(), status);
        Err(MapError::Fetch {
            message: format!("unexpected status for {}", response.url()),
            status: Some(status.as_u16()),
        })
    }
}
