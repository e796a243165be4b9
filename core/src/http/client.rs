use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, USER_AGENT};
use reqwest::{Client, ClientBuilder, Proxy};

use super::{headers_to_vec, HttpRequest, HttpResponse, Outcome, Transport, TransportError, TransportErrorKind};
use crate::errors::{FuzzError, Result};

pub const FUZZER_USER_AGENT: &str = "Mozilla/5.0 (compatible; httpinject HTTP Fuzzer-Injector)";

/// Header marking the unmodified request, so target logs can tell it apart.
pub const VALID_CASE_HEADER: &str = "x-valid-case-instrumentation";

/// `reqwest`-backed transport.
pub struct HttpClient {
    inner: Client,
    default_headers: HeaderMap,
}

impl HttpClient {
    pub fn new(timeout: Duration, proxy_url: Option<&str>, custom_headers: &[(String, String)]) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(timeout)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = proxy_url {
            let p = Proxy::all(proxy).map_err(|e| FuzzError::Config(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(p);
        }

        let inner = builder
            .build()
            .map_err(|e| FuzzError::Config(format!("failed to build HTTP client: {}", e)))?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("close"));
        default_headers.insert(USER_AGENT, HeaderValue::from_static(FUZZER_USER_AGENT));
        for (key, val) in custom_headers {
            match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(val)) {
                (Ok(name), Ok(value)) => {
                    default_headers.insert(name, value);
                }
                _ => return Err(FuzzError::Config(format!("invalid header '{}: {}'", key, val))),
            }
        }

        Ok(Self {
            inner,
            default_headers,
        })
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Request headers override the client defaults of the same name.
    fn merged_headers(&self, req: &HttpRequest) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        for (name, value) in req.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, req: &HttpRequest) -> Outcome {
        let mut builder = self
            .inner
            .request(req.method.clone(), req.url.as_str())
            .headers(self.merged_headers(req));

        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Outcome::Failure(transport_error(e)),
        };

        let status = response.status().as_u16();
        let headers = headers_to_vec(response.headers());
        let final_url = (response.url() != &req.url).then(|| response.url().to_string());

        match response.text().await {
            Ok(body) => {
                debug!("{} {} -> {}", req.method, req.url, status);
                Outcome::Response(HttpResponse {
                    status,
                    headers,
                    body,
                    final_url,
                })
            }
            Err(e) => Outcome::Failure(transport_error(e)),
        }
    }
}

/// The URL is stripped: it carries the mutated payload and would make
/// every otherwise identical failure look unique.
fn transport_error(e: reqwest::Error) -> TransportError {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_connect() {
        TransportErrorKind::Connection
    } else {
        TransportErrorKind::Protocol
    };
    TransportError::new(kind, e.without_url().to_string())
}
