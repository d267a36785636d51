//! HTTP JSON source backed by reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::SourceSpec;
use crate::core::Source;
use crate::errors::{DaybreakError, FetchError, Result};

/// Status codes worth another attempt.
const RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Fetches a JSON document with a GET request.
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    url: String,
    client: Client,
}

impl HttpJsonSource {
    /// Builds a source from its configuration.
    pub fn from_spec(spec: &SourceSpec) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &spec.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                DaybreakError::Config(format!("source '{}': invalid header name: {e}", spec.key))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DaybreakError::Config(format!("source '{}': invalid header value: {e}", spec.key))
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(spec.timeout()?)
            .build()
            .map_err(|e| DaybreakError::Config(format!("source '{}': {e}", spec.key)))?;

        Ok(Self {
            url: spec.url.clone(),
            client,
        })
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Source for HttpJsonSource {
    async fn fetch(&self) -> std::result::Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        debug!(url = %self.url, status = status.as_u16(), "Source responded");
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(classify_request_error)
    }
}

/// Maps a non-success status to a fetch error; `None` for success.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {status}");
    if RETRY_STATUS_CODES.contains(&status.as_u16()) || status.is_server_error() {
        Some(FetchError::transient(message))
    } else {
        Some(FetchError::fatal(message))
    }
}

fn classify_request_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FetchError::transient(err.to_string())
    } else if err.is_decode() {
        FetchError::fatal(format!("invalid JSON: {err}"))
    } else if let Some(status) = err.status() {
        classify_status(status).unwrap_or_else(|| FetchError::transient(err.to_string()))
    } else {
        FetchError::transient(err.to_string())
    }
}
