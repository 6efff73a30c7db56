//! Remote row source reading PostgREST-style tables.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use tracing::{debug, info};

use super::{RawRow, RowSource, SourceQuery};
use crate::model::FilterOperator;

/// Reads `GET {base_url}/rest/v1/{data_source}` with service-key headers.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Create a source from `REPORT_SOURCE_URL` / `REPORT_SOURCE_KEY`.
    /// Returns `None` when the URL is not configured (the source is optional).
    pub fn from_env() -> Result<Option<Self>> {
        let base_url = match std::env::var("REPORT_SOURCE_URL") {
            Ok(url) => url,
            Err(_) => return Ok(None),
        };
        let api_key =
            std::env::var("REPORT_SOURCE_KEY").map_err(|_| anyhow!("REPORT_SOURCE_KEY not set"))?;
        Ok(Some(Self::new(base_url, api_key)))
    }

    /// Push `equals` filters on string values down as `field=eq.value`.
    /// Everything else is left to the engine, which re-filters anyway.
    fn pushdown_params(query: &SourceQuery) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        for filter in &query.filters {
            if filter.operator != FilterOperator::Equals {
                continue;
            }
            if let Some(serde_json::Value::String(v)) = &filter.value {
                params.push((filter.field.clone(), format!("eq.{}", v)));
            }
        }
        params
    }
}

#[async_trait::async_trait]
impl RowSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_rows(&self, query: &SourceQuery) -> Result<Vec<RawRow>> {
        let url = format!("{}/rest/v1/{}", self.base_url, query.data_source);
        let params = Self::pushdown_params(query);

        debug!("HttpSource: GET {} ({} params)", url, params.len());

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to reach row source at {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Row source returned {} for '{}': {}",
                status,
                query.data_source,
                text
            ));
        }

        let rows: Vec<RawRow> = resp
            .json()
            .await
            .context("Failed to parse row source response")?;

        info!("HttpSource: fetched {} rows for '{}'", rows.len(), query.data_source);
        Ok(rows)
    }
}
