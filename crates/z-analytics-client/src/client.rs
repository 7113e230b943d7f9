//! Z-Analytics HTTP client implementation.

use reqwest::Client;
use std::time::Duration;

use async_trait::async_trait;
use z_analytics_core::{IngestBatch, QueryResult, QuerySpec};

use crate::error::ClientError;
use crate::reporter::BatchSink;
use crate::types::{ApiErrorResponse, IngestResponse};

/// Z-Analytics API client.
///
/// Sends perturbed batches and reads query results. Most callers send through
/// a [`Reporter`](crate::Reporter) rather than calling [`AnalyticsClient::ingest`]
/// directly, so increments are perturbed and capped before they leave.
#[derive(Debug, Clone)]
pub struct AnalyticsClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl AnalyticsClient {
    /// Create a new z-analytics client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the z-analytics service (e.g., `"http://z-analytics:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new z-analytics client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Send one batch of already-perturbed increments.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects the batch.
    pub async fn ingest(&self, batch: &IngestBatch) -> Result<IngestResponse, ClientError> {
        let url = format!("{}/v1/ingest", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(batch)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Query materialized snapshots.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRange` if the range is reversed or too
    /// long, or another error if the request fails.
    pub async fn query(&self, spec: &QuerySpec) -> Result<QueryResult, ClientError> {
        let url = format!("{}/v1/query", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(spec)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message;

                match code {
                    "invalid_range" => {
                        let max_query_days = api_error
                            .error
                            .details
                            .as_ref()
                            .and_then(|d| d.get("max_query_days"))
                            .and_then(serde_json::Value::as_u64)
                            .and_then(|v| u32::try_from(v).ok());

                        Err(ClientError::InvalidRange {
                            message,
                            max_query_days,
                        })
                    }
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl BatchSink for AnalyticsClient {
    async fn send(&self, batch: IngestBatch) -> Result<(), ClientError> {
        self.ingest(&batch).await.map(|_| ())
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
