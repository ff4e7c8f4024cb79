use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::error::CanopyError;
use crate::query::{Row, ValidQuery};

pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &ValidQuery) -> Result<Vec<Row>, CanopyError>;
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    geostore_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geostore_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

impl DataEnvelope {
    /// Rows must be JSON objects; anything else is a shape mismatch.
    pub(crate) fn into_rows(self) -> Result<Vec<Row>, CanopyError> {
        self.data
            .into_iter()
            .map(|value| match value {
                serde_json::Value::Object(row) => Ok(row),
                other => Err(CanopyError::Normalization(format!(
                    "expected row object, got {other}"
                ))),
            })
            .collect()
    }
}

pub(crate) fn build_client(
    timeout: Duration,
    api_key: Option<&str>,
    error: fn(String) -> CanopyError,
) -> Result<Client, CanopyError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("canopy/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| error(err.to_string()))?,
    );
    if let Some(api_key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(|err| error(err.to_string()))?,
        );
    }
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| error(err.to_string()))
}

#[derive(Clone)]
pub struct QueryHttpClient {
    client: Client,
    base_url: String,
}

impl QueryHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CanopyError> {
        Ok(Self {
            client: build_client(
                config.timeout,
                config.api_key.as_deref(),
                CanopyError::QueryHttp,
            )?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn query_url(base_url: &str, table: &str) -> String {
        format!("{base_url}/dataset/{table}/latest/query")
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, CanopyError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "query request failed".to_string());
        Err(CanopyError::QueryStatus { status, message })
    }
}

impl QueryExecutor for QueryHttpClient {
    fn execute(&self, query: &ValidQuery) -> Result<Vec<Row>, CanopyError> {
        let url = Self::query_url(&self.base_url, query.table());
        let body = QueryBody {
            sql: query.to_sql(),
            geostore_id: query.geometry().map(|binding| binding.id.as_str()),
            geostore_origin: query.geometry().map(|binding| binding.origin.to_string()),
        };
        debug!(url = %url, sql = %body.sql, "executing on-the-fly query");
        // Single attempt: failures surface to the fetch state instead of being retried.
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|err| CanopyError::QueryHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let envelope: DataEnvelope = response
            .json()
            .map_err(|err| CanopyError::Normalization(err.to_string()))?;
        envelope.into_rows()
    }
}
