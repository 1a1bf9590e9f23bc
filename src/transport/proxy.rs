//! Round-robin proxy rotation.

use crate::{Error, ErrorContext, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// Hands out proxies in round-robin order, one per outbound request.
#[derive(Debug)]
pub struct ProxyRotator {
    proxies: Vec<Url>,
    counter: AtomicUsize,
}

impl ProxyRotator {
    pub fn new<I, S>(proxies: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for (line, raw) in proxies.into_iter().enumerate() {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let url = Url::parse(raw).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid proxy url: {e}"),
                    ErrorContext::new()
                        .with_field_path("proxy_file")
                        .with_details(format!("line {}", line + 1)),
                )
            })?;
            parsed.push(url);
        }
        Ok(Self {
            proxies: parsed,
            counter: AtomicUsize::new(0),
        })
    }

    /// Load one proxy URL per line. A missing file yields an empty rotator.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let rotator = Self::new(content.lines())?;
        tracing::info!(count = rotator.len(), path = %path.display(), "registered proxies");
        Ok(rotator)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn next_proxy(&self) -> Option<&Url> {
        if self.proxies.is_empty() {
            return None;
        }
        let i = self.counter.fetch_add(1, Ordering::Relaxed);
        self.proxies.get(i % self.proxies.len())
    }

    /// A `reqwest` proxy hook that rotates through the list on every request.
    pub fn into_reqwest_proxy(self: Arc<Self>) -> reqwest::Proxy {
        reqwest::Proxy::custom(move |_| self.next_proxy().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let rotator = ProxyRotator::new([
            "http://10.0.0.1:8080",
            "",
            "# disabled",
            "http://10.0.0.2:8080",
        ])
        .unwrap();
        assert_eq!(rotator.len(), 2);

        let picks: Vec<String> = (0..4)
            .map(|_| rotator.next_proxy().unwrap().host_str().unwrap().to_string())
            .collect();
        assert_eq!(picks, ["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_invalid_line_is_configuration_error() {
        let err = ProxyRotator::new(["http://ok:1", "not a url"]).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.context().unwrap().details.as_deref(), Some("line 2"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rotator = ProxyRotator::from_file(dir.path().join("proxy.txt")).await.unwrap();
        assert!(rotator.is_empty());
        assert!(rotator.next_proxy().is_none());
    }
}
