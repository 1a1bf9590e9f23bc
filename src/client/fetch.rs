//! The `fetch(path)` surface used by all ingest and update logic.

use super::auth::{Credential, CredentialProvider};
use super::core::LimitedClient;
use crate::config::IngestConfig;
use crate::transport::ProxyRotator;
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

const API_VERSION_HEADER: &str = "x-api-version";

/// Resolves relative API paths, attaches authorization and maps statuses to the error taxonomy.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<LimitedClient>,
    credentials: Arc<CredentialProvider>,
    base_url: String,
    api_version: HeaderValue,
}

impl Fetcher {
    pub fn new(
        client: Arc<LimitedClient>,
        credentials: Arc<CredentialProvider>,
        base_url: impl Into<String>,
        api_version: &str,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid api base url: {e}"),
                ErrorContext::new().with_field_path("api_base_url"),
            )
        })?;
        let api_version = HeaderValue::from_str(api_version).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid api version: {e}"),
                ErrorContext::new().with_field_path("api_version"),
            )
        })?;
        Ok(Self {
            client,
            credentials,
            base_url,
            api_version,
        })
    }

    /// Wire the whole client stack from configuration: proxies, gates, retry and credentials.
    pub async fn from_config(cfg: &IngestConfig) -> Result<Self> {
        let mut builder = LimitedClient::builder()
            .rate_limiter(cfg.rate_limit.clone())
            .remote_gate(cfg.remote.clone())
            .retry(cfg.retry.clone())
            .max_inflight(cfg.max_inflight)
            .timeout(cfg.http_timeout);

        if cfg.enable_proxy {
            let rotator = ProxyRotator::from_file(&cfg.proxy_file).await?;
            builder = builder.proxies(Arc::new(rotator));
        }

        let client = Arc::new(builder.build()?);
        let credentials = Arc::new(CredentialProvider::new(
            client.http().clone(),
            cfg.auth.clone(),
        ));
        Self::new(client, credentials, cfg.api_base_url.clone(), &cfg.api_version)
    }

    pub fn client(&self) -> &Arc<LimitedClient> {
        &self.client
    }

    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(&self, url: &str, cred: &Credential) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .http()
            .get(url)
            .bearer_auth(&cred.token)
            .build()
            .map_err(|e| Error::Transport(crate::transport::TransportError::Http(e)))?;
        request
            .headers_mut()
            .insert(API_VERSION_HEADER, self.api_version.clone());
        self.client.execute(request).await
    }

    /// GET `path` and return the body.
    ///
    /// 404 maps to [`Error::NotFound`], 429 to [`Error::RateLimited`], any other non-2xx to
    /// [`Error::Fetch`]. An expired credential is refreshed once and the request retried.
    pub async fn fetch(&self, path: &str) -> Result<Bytes> {
        let url = self.resolve(path);
        let cred = self.credentials.get().await?;

        let mut resp = self.send(&url, &cred).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            info!(path, generation = cred.generation, "credential rejected, refreshing");
            let fresh = self.credentials.refresh(Some(cred.generation)).await?;
            resp = self.send(&url, &fresh).await?;
        }

        let status = resp.status();
        if status.is_success() {
            return resp
                .bytes()
                .await
                .map_err(|e| Error::Transport(crate::transport::TransportError::Http(e)));
        }

        let path = path.to_string();
        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound { path },
            _ => Error::Fetch {
                status: status.as_u16(),
                path,
            },
        })
    }

    /// [`fetch`](Self::fetch) and decode JSON. Decode failures keep the raw payload.
    pub async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.fetch(path).await?;
        serde_json::from_slice(&body).map_err(|e| Error::decode(e, body))
    }
}
