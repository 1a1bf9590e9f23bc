//! Client-credentials exchange with exclusive refresh.

use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use keyring::Entry;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const KEYRING_SERVICE: &str = "quota-ingest";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_url: String,
    pub client_id: String,
    /// Falls back to the OS keyring, then to `CLIENT_SECRET`, when unset.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub scope: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: "https://osu.ppy.sh/oauth/token".to_string(),
            client_id: String::new(),
            client_secret: None,
            scope: "public".to_string(),
        }
    }
}

/// A bearer token together with the refresh generation that produced it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub generation: u64,
    pub expires_in: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Holds the current bearer token and serializes refreshes.
///
/// Readers never lock: the token lives in an [`ArcSwapOption`]. A caller that saw a stale
/// token asks for [`refresh`](Self::refresh) with that token's generation; if another task
/// already replaced it, the newer token is returned without a second login.
pub struct CredentialProvider {
    http: reqwest::Client,
    cfg: AuthConfig,
    current: ArcSwapOption<Credential>,
    refresh_lock: Mutex<()>,
}

impl CredentialProvider {
    pub fn new(http: reqwest::Client, cfg: AuthConfig) -> Self {
        Self {
            http,
            cfg,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// A provider that always hands out `token`. Useful for tests and pre-issued tokens.
    pub fn with_static_token(http: reqwest::Client, token: impl Into<String>) -> Self {
        let provider = Self::new(http, AuthConfig::default());
        provider.current.store(Some(Arc::new(Credential {
            token: token.into(),
            generation: 1,
            expires_in: None,
        })));
        provider
    }

    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    /// Current credential, logging in on first use.
    pub async fn get(&self) -> Result<Arc<Credential>> {
        if let Some(cred) = self.current() {
            return Ok(cred);
        }
        self.refresh(None).await
    }

    /// Replace the credential with generation `stale` (or log in when there is none).
    pub async fn refresh(&self, stale: Option<u64>) -> Result<Arc<Credential>> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(cred) = self.current() {
            if stale.map_or(true, |g| g != cred.generation) {
                return Ok(cred);
            }
        }

        let generation = self.current().map_or(0, |c| c.generation) + 1;
        let resp = self.login().await?;
        let cred = Arc::new(Credential {
            token: resp.access_token,
            generation,
            expires_in: resp.expires_in.map(Duration::from_secs),
        });
        self.current.store(Some(cred.clone()));
        info!(generation, expires_in_secs = resp.expires_in, "credentials refreshed");
        Ok(cred)
    }

    /// Configured secret, then the OS keyring, then `CLIENT_SECRET`.
    async fn client_secret(&self) -> Option<String> {
        if let Some(secret) = self.cfg.client_secret.as_ref().filter(|s| !s.is_empty()) {
            return Some(secret.clone());
        }

        // Keyring backends make blocking IPC calls.
        let client_id = self.cfg.client_id.clone();
        match tokio::task::spawn_blocking(move || keyring_secret(&client_id)).await {
            Ok(Some(secret)) => return Some(secret),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "keyring lookup aborted"),
        }

        std::env::var("CLIENT_SECRET").ok().filter(|s| !s.is_empty())
    }

    async fn login(&self) -> Result<TokenResponse> {
        let secret = self.client_secret().await.ok_or_else(|| Error::Auth {
            message: "no client secret configured".to_string(),
            fatal: true,
        })?;

        let payload = serde_json::json!({
            "client_id": self.cfg.client_id,
            "client_secret": secret,
            "grant_type": "client_credentials",
            "scope": self.cfg.scope,
        });

        let resp = self
            .http
            .post(&self.cfg.token_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Auth {
                message: format!("token endpoint unreachable: {e}"),
                fatal: false,
            })?;

        let status = resp.status();
        if !status.is_success() {
            // Rejected credentials will not start working on their own.
            let fatal = matches!(
                status,
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            );
            warn!(http_status = status.as_u16(), fatal, "credential exchange failed");
            return Err(Error::Auth {
                message: format!("token endpoint returned HTTP {}", status.as_u16()),
                fatal,
            });
        }

        resp.json::<TokenResponse>().await.map_err(|e| Error::Auth {
            message: format!("unreadable token response: {e}"),
            fatal: false,
        })
    }
}

fn keyring_secret(client_id: &str) -> Option<String> {
    Entry::new(KEYRING_SERVICE, client_id)
        .and_then(|entry| entry.get_password())
        .ok()
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(client_id: &str, secret: Option<&str>) -> CredentialProvider {
        CredentialProvider::new(
            reqwest::Client::new(),
            AuthConfig {
                client_id: client_id.to_string(),
                client_secret: secret.map(str::to_string),
                ..AuthConfig::default()
            },
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_configured_secret_wins() {
        let provider = provider("1234", Some("s3cret"));
        assert_eq!(provider.client_secret().await.as_deref(), Some("s3cret"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_keyring_lookup_leaves_runtime_responsive() {
        let provider = provider("quota-ingest-unregistered-client", Some(""));
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
        });

        let secret = provider.client_secret().await;
        let expected = std::env::var("CLIENT_SECRET").ok().filter(|s| !s.is_empty());
        assert_eq!(secret, expected);
        // The single runtime thread was free to drive the other task meanwhile.
        tokio::time::timeout(Duration::from_secs(5), ticker)
            .await
            .unwrap()
            .unwrap();
    }
}
