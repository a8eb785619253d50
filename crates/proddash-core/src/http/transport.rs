use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Outbound seam to the backend. Non-2xx responses come back as
/// [`TransportError::Status`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid API base URL: {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("proddash/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed building HTTP client")?;
        Ok(Self { base_url, client })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<reqwest::Url, TransportError> {
        let mut url = self
            .base_url
            .join(&request.path)
            .map_err(|err| TransportError::Network(format!("invalid request path: {err}")))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = request.bearer.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            let encoded = serde_json::to_vec(body)
                .map_err(|err| TransportError::Decode(format!("failed encoding body: {err}")))?;
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(encoded);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_reqwest_error)?;
        trace!(status = status.as_u16(), bytes = text.len(), "received response body");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(_) if !status.is_success() => Value::String(text),
                Err(err) => {
                    return Err(TransportError::Decode(format!(
                        "response is not JSON: {err}"
                    )));
                }
            }
        };

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: Some(body),
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_base_path_and_query() {
        let transport =
            ReqwestTransport::new("http://localhost:8000", Duration::from_secs(1)).expect("client");
        let request = ApiRequest::new(Method::Get, "/api/v1/dashboard/tasks")
            .with_query(vec![("search".to_string(), "milk & eggs".to_string())]);
        let url = transport.url_for(&request).expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/v1/dashboard/tasks?search=milk+%26+eggs"
        );
    }

    #[test]
    fn debug_output_hides_bearer_token() {
        let mut request = ApiRequest::new(Method::Get, "/api/v1/auth/me");
        request.bearer = Some("secret-token".to_string());
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
