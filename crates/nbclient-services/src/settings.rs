//! Runtime server settings
//!
//! [`ServerSettings`] pairs a parsed base URL and token with the shared
//! [`Transport`], and owns URL construction and status checking for every
//! REST call.

use crate::config::ClientConfig;
use crate::error::{ConfigError, ServerError, ServerResult};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Connection settings shared by all services
#[derive(Clone)]
pub struct ServerSettings {
    base_url: Url,
    token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl ServerSettings {
    /// Create settings for a base URL
    ///
    /// # Errors
    /// `ServerError::InvalidUrl` if `base_url` cannot serve as a base.
    pub fn new(base_url: &str, transport: Arc<dyn Transport>) -> ServerResult<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)
                .ok_or_else(|| ServerError::InvalidUrl(base_url.to_string()))?,
            token: None,
            transport,
        })
    }

    /// Build settings from configuration, using a [`ReqwestTransport`]
    ///
    /// # Errors
    /// `ConfigError::InvalidUrl` for an unusable base URL or HTTP client.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(config.timeout())
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        let settings = Self::new(&config.server.base_url, Arc::new(transport))
            .map_err(|_| ConfigError::InvalidUrl(config.server.base_url.clone()))?;
        Ok(match &config.server.token {
            Some(token) => settings.with_token(token.clone()),
            None => settings,
        })
    }

    /// With API token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL (always ends with `/`)
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// API token
    #[inline]
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Shared transport
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Build a URL under the base URL
    ///
    /// `prefix` segments are appended as-is; `path` is split on `/` and each
    /// non-empty part is appended as its own percent-encoded segment.
    ///
    /// # Errors
    /// `ServerError::InvalidUrl` if the base URL cannot take path segments.
    pub fn url(&self, prefix: &[&str], path: &str) -> ServerResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ServerError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.extend(prefix.iter().copied());
            segments.extend(path.split('/').filter(|part| !part.is_empty()));
        }
        Ok(url)
    }

    /// Send a request and check its status
    ///
    /// # Errors
    /// `ServerError::Response` when the status is not in `expected`, or any
    /// transport error.
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        expected: &[u16],
    ) -> ServerResult<HttpResponse> {
        tracing::debug!("{} {}", method, url);
        let mut request = HttpRequest::new(method.clone(), url.clone());
        request.body = body;
        request.authorization = self.token.as_ref().map(|t| format!("token {t}"));

        let response = self.transport.send(request).await?;
        if expected.contains(&response.status) {
            return Ok(response);
        }

        let message = response.server_message().unwrap_or_else(|| {
            StatusCode::from_u16(response.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unexpected response")
                .to_string()
        });
        tracing::warn!("{} {} -> {}: {}", method, url, response.status, message);
        Err(ServerError::Response {
            status: response.status,
            message,
            url: url.to_string(),
        })
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

fn parse_base_url(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Http {}

        #[async_trait]
        impl Transport for Http {
            async fn send(&self, request: HttpRequest) -> ServerResult<HttpResponse>;
        }
    }

    fn settings(transport: MockHttp) -> ServerSettings {
        ServerSettings::new("http://localhost:8888/lab", Arc::new(transport)).unwrap()
    }

    #[test]
    fn url_encodes_each_segment() {
        let settings = settings(MockHttp::new());
        let url = settings
            .url(&["api", "contents"], "/my dir/a#b.txt/")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8888/lab/api/contents/my%20dir/a%23b.txt"
        );
        let root = settings.url(&["api", "contents"], "").unwrap();
        assert_eq!(root.as_str(), "http://localhost:8888/lab/api/contents");
    }

    #[test]
    fn rejects_non_base_urls() {
        let err = ServerSettings::new("mailto:someone", Arc::new(MockHttp::new()));
        assert!(matches!(err, Err(ServerError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn sends_token_header_and_accepts_expected_status() {
        let mut transport = MockHttp::new();
        transport
            .expect_send()
            .withf(|req| {
                req.method == Method::GET && req.authorization.as_deref() == Some("token s3cret")
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::json(200, &json!([]))));

        let settings = settings(transport).with_token("s3cret");
        let url = settings.url(&["api", "sessions"], "").unwrap();
        let resp = settings.request(Method::GET, url, None, &[200]).await.unwrap();
        assert_eq!(resp.body, "[]");
    }

    #[tokio::test]
    async fn unexpected_status_carries_server_message() {
        let mut transport = MockHttp::new();
        transport
            .expect_send()
            .returning(|_| Ok(HttpResponse::json(404, &json!({ "message": "gone" }))));

        let settings = settings(transport);
        let url = settings.url(&["api", "sessions"], "abc").unwrap();
        let err = settings
            .request(Method::GET, url, None, &[200])
            .await
            .unwrap_err();
        match err {
            ServerError::Response { status, message, url } => {
                assert_eq!(status, 404);
                assert_eq!(message, "gone");
                assert!(url.ends_with("/api/sessions/abc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_message_falls_back_to_reason_phrase() {
        let mut transport = MockHttp::new();
        transport
            .expect_send()
            .returning(|_| Ok(HttpResponse::new(500, "")));

        let settings = settings(transport);
        let url = settings.url(&["api"], "").unwrap();
        let err = settings.request(Method::GET, url, None, &[200]).await.unwrap_err();
        assert!(err.to_string().contains("Internal Server Error"));
    }

    #[test]
    fn debug_hides_token() {
        let settings = settings(MockHttp::new()).with_token("hidden");
        assert!(!format!("{settings:?}").contains("hidden"));
    }
}
