use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvalidApiKey {
    #[error(transparent)]
    Name(#[from] InvalidHeaderName),
    #[error(transparent)]
    Value(#[from] InvalidHeaderValue),
}

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header is validated once at construction so sending never fails on a
/// malformed key.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, InvalidApiKey> {
        let mut key = HeaderValue::from_str(key)?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name: HeaderName::from_bytes(header_name.as_bytes())?,
            key,
        })
    }

    /// Uses the provider's `x-api-key` header.
    pub fn x_api_key(inner: C, key: &str) -> Result<Self, InvalidApiKey> {
        Self::new(inner, "x-api-key", key)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopClient;

    #[async_trait]
    impl HttpClient for NoopClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            unreachable!("not sent in these tests")
        }
    }

    #[test]
    fn test_rejects_invalid_header_value() {
        assert!(ApiKey::x_api_key(NoopClient, "bad\nkey").is_err());
    }

    #[test]
    fn test_rejects_invalid_header_name() {
        assert!(ApiKey::new(NoopClient, "bad header", "k").is_err());
    }

    #[test]
    fn test_accepts_plain_key() {
        let client = ApiKey::x_api_key(NoopClient, "abc123").unwrap();
        assert_eq!(client.header_name.as_str(), "x-api-key");
        assert!(client.key.is_sensitive());
    }
}
