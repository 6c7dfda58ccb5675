//! Remote HTTP backend
//!
//! Talks to a plain HTTP cache service:
//!
//! - `GET {endpoint}/cache/{key}`: `200` with the entry bytes, `404` if absent
//! - `PUT {endpoint}/cache/{key}` with `If-None-Match: *`: `2xx` when stored,
//!   `412` or `409` when the key is already populated

use super::{CacheBackend, PutOutcome};
use crate::config::RemoteCacheConfig;
use crate::{CacheKey, Error, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, header};
use std::time::Duration;
use tracing::debug;

const BACKEND_NAME: &str = "http";

/// Cache backend backed by a remote HTTP service
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Create a backend from remote cache settings
    pub fn new(config: &RemoteCacheConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::configuration(format!(
                "remote cache endpoint '{}' must be an http:// or https:// URL",
                config.endpoint
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            token: config.token.clone(),
        })
    }

    /// Base URL of the service
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: Method, key: &CacheKey) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}/cache/{key}", self.endpoint));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::store_unavailable(BACKEND_NAME, format!("request timed out: {err}"))
        } else {
            Error::store_unavailable(BACKEND_NAME, err.to_string())
        }
    }

    fn status_error(operation: &str, status: StatusCode) -> Error {
        Error::store_unavailable(
            BACKEND_NAME,
            format!("{operation} returned unexpected status {status}"),
        )
    }
}

#[async_trait]
impl CacheBackend for HttpBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let response = self
            .request(Method::GET, key)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Self::transport_error(&e))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(Self::status_error("GET", status)),
        }
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<PutOutcome> {
        let response = self
            .request(Method::PUT, key)
            .header(header::IF_NONE_MATCH, "*")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;
        match response.status() {
            status if status.is_success() => Ok(PutOutcome::Created),
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                debug!(%key, "Remote cache already holds key");
                match self.get(key).await? {
                    Some(existing) => Ok(PutOutcome::AlreadyPresent(existing)),
                    None => Err(Error::store_unavailable(
                        BACKEND_NAME,
                        format!("server reported {key} as present but returned nothing"),
                    )),
                }
            }
            status => Err(Self::status_error("PUT", status)),
        }
    }
}
