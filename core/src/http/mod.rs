pub mod client;

pub use client::HttpClient;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

/// Represents an HTTP request with all its components.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: String) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// Headers as a JSON object, the way findings store them.
    pub fn headers_json(&self) -> String {
        headers_to_json(&headers_to_vec(&self.headers))
    }
}

/// A response that made it back from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Set when redirects led somewhere other than the request URL
    pub final_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Timeout,
    Connection,
    Protocol,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "Timeout"),
            TransportErrorKind::Connection => write!(f, "ConnectionError"),
            TransportErrorKind::Protocol => write!(f, "ProtocolError"),
        }
    }
}

/// A request that never produced a usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What came back for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response(HttpResponse),
    Failure(TransportError),
}

impl Outcome {
    /// Short human-readable description for logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Response(r) => format!("status {}", r.status),
            Outcome::Failure(e) => e.to_string(),
        }
    }
}

/// Sends requests to the target under test.
///
/// Failures are reported as `Outcome::Failure`, never as errors: during
/// injection they are findings in their own right.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Outcome;
}

pub fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

pub fn headers_to_json(headers: &[(String, String)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_headers_json() {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", HeaderValue::from_static("1"));
        let url = Url::parse("https://example.com/").unwrap();
        let request = HttpRequest::new(Method::GET, url, headers, String::new());
        assert_eq!(request.headers_json(), r#"{"x-test":"1"}"#);
    }

    #[test]
    fn test_outcome_describe() {
        let failure = Outcome::Failure(TransportError::new(TransportErrorKind::Connection, "refused"));
        assert_eq!(failure.describe(), "ConnectionError: refused");
    }
}
