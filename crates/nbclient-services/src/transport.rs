//! HTTP transport seam
//!
//! Every service call goes through a [`Transport`], so the REST layer can
//! run against a real server ([`ReqwestTransport`]) or an in-process fake.

use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Fully built URL
    pub url: Url,
    /// JSON body
    pub body: Option<Value>,
    /// `Authorization` header value
    pub authorization: Option<String>,
}

impl HttpRequest {
    /// Create request without body
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            authorization: None,
        }
    }

    /// With JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response as seen by the services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw body
    pub body: String,
}

impl HttpResponse {
    /// Create response
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Create response with a JSON body
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// Decode the body, reporting failures as validation errors
    ///
    /// # Errors
    /// `ServerError::Validation` when the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self, context: &str) -> ServerResult<T> {
        serde_json::from_str(&self.body).map_err(|e| ServerError::validation(context, e))
    }

    /// `message` field of a JSON error body
    #[must_use]
    pub fn server_message(&self) -> Option<String> {
        serde_json::from_str::<Value>(&self.body)
            .ok()?
            .get("message")?
            .as_str()
            .map(str::to_string)
    }
}

/// Sends requests to a notebook server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request
    async fn send(&self, request: HttpRequest) -> ServerResult<HttpResponse>;
}

/// [`Transport`] over a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create transport with a request timeout
    ///
    /// # Errors
    /// `ServerError::Transport` if the client cannot be initialized.
    pub fn new(timeout: Duration) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ServerResult<HttpResponse> {
        let mut builder = self.client.request(request.method, request.url);
        if let Some(auth) = request.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, auth);
        }
        if let Some(body) = request.body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_message_from_json_body() {
        let resp = HttpResponse::json(400, &json!({ "message": "Directory not empty" }));
        assert_eq!(resp.server_message().as_deref(), Some("Directory not empty"));
        assert_eq!(HttpResponse::new(500, "oops").server_message(), None);
    }

    #[test]
    fn decode_failure_is_validation_error() {
        let resp = HttpResponse::new(200, "[1, 2]");
        let err = resp.decode::<Vec<String>>("listing").unwrap_err();
        assert!(matches!(err, ServerError::Validation { ref context, .. } if context == "listing"));
    }
}
