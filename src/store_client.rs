use crate::config::Config;
use crate::errors::AppraisalError;
use crate::inventory::InventorySource;
use crate::models::AppraisalResult;
use crate::results::{AppraisalRow, ResultSink};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Rows requested per page when reading tables.
pub const PAGE_SIZE: usize = 1000;

/// Client for the hosted Supabase (PostgREST) store holding inventory and appraisals.
#[derive(Clone)]
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    inventory_table: String,
    results_table: String,
}

impl SupabaseClient {
    /// Creates a new `SupabaseClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Project URL, without the `/rest/v1` suffix.
    /// * `api_key` - Service or anon key, sent as both `apikey` and bearer token.
    /// * `inventory_table` - Table read for vehicles.
    /// * `results_table` - Table appraisals are upserted into.
    pub fn new(
        base_url: String,
        api_key: &str,
        inventory_table: String,
        results_table: String,
    ) -> Result<Self, AppraisalError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| AppraisalError::InventoryUnavailable("Invalid API key".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| AppraisalError::InventoryUnavailable("Invalid API key".to_string()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                AppraisalError::InventoryUnavailable(format!(
                    "Failed to create store client: {}",
                    e
                ))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            inventory_table,
            results_table,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppraisalError> {
        Self::new(
            config.supabase_url.clone(),
            &config.supabase_api_key,
            config.inventory_table.clone(),
            config.results_table.clone(),
        )
    }

    /// Builds a table endpoint URL. `fail` picks the error variant for the caller's operation.
    fn table_url(
        &self,
        table: &str,
        params: &[(&str, String)],
        fail: fn(String) -> AppraisalError,
    ) -> Result<url::Url, AppraisalError> {
        url::Url::parse_with_params(&format!("{}/rest/v1/{}", self.base_url, table), params)
            .map_err(|e| fail(format!("Failed to build URL: {}", e)))
    }

    /// Reads every row of `table`, one page at a time.
    async fn fetch_all_rows(
        &self,
        table: &str,
        select: &str,
    ) -> Result<Vec<Value>, AppraisalError> {
        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let url = self.table_url(
                table,
                &[
                    ("select", select.to_string()),
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", offset.to_string()),
                ],
                AppraisalError::InventoryUnavailable,
            )?;
            tracing::debug!("Fetching {} rows {}..{}", table, offset, offset + PAGE_SIZE);

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| {
                    AppraisalError::InventoryUnavailable(format!("Store request failed: {}", e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppraisalError::InventoryUnavailable(format!(
                    "Store returned {}: {}",
                    status, error_text
                )));
            }

            let page: Vec<Value> = response
                .json()
                .await
                .map_err(|e| {
                    AppraisalError::InventoryUnavailable(format!(
                        "Failed to parse store response: {}",
                        e
                    ))
                })?;

            let page_len = page.len();
            rows.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        Ok(rows)
    }
}

#[async_trait]
impl InventorySource for SupabaseClient {
    async fn fetch_inventory(&self) -> Result<Vec<Value>, AppraisalError> {
        tracing::info!("Fetching inventory from table '{}'", self.inventory_table);
        let rows = self.fetch_all_rows(&self.inventory_table, "*").await?;
        tracing::info!("✓ Fetched {} inventory rows", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl ResultSink for SupabaseClient {
    async fn upsert_result(&self, result: &AppraisalResult) -> Result<(), AppraisalError> {
        let url = self.table_url(
            &self.results_table,
            &[("on_conflict", "vin".to_string())],
            AppraisalError::StoreWriteFailure,
        )?;

        let response = self
            .client
            .post(url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&AppraisalRow::from(result))
            .send()
            .await
            .map_err(|e| AppraisalError::StoreWriteFailure(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppraisalError::StoreWriteFailure(format!(
                "Store returned {}: {}",
                status, error_text
            )));
        }

        tracing::info!("✓ Saved appraisal for {}", result.vin);
        Ok(())
    }

    async fn appraised_vins(&self) -> Result<HashSet<String>, AppraisalError> {
        let rows = self.fetch_all_rows(&self.results_table, "vin").await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("vin").and_then(|v| v.as_str()))
            .map(|vin| vin.trim().to_uppercase())
            .collect())
    }
}
