//! HTTP Client
//!
//! Uses hyper with tokio for async HTTP/1.1.
//! Features:
//! - Automatic HTTPS with rustls (memory-safe TLS)
//! - Per-request headers (auth, OTP challenges)
//! - Connect and whole-request timeouts

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode, Uri};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// HTTP client errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Body read error: {0}")]
    BodyError(String),
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: "TunnelGate/0.1".to_string(),
        }
    }
}

/// HTTP response wrapper
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
    /// Total round-trip time
    pub total_time: Duration,
}

impl Response {
    /// Check if response was successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get body as string
    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }

    /// Get Content-Type header
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }

    /// Check for a header by name
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }
}

/// Minimal HTTPS client for backend and OAuth calls
#[derive(Clone)]
pub struct HttpClient {
    /// Configuration
    config: HttpClientConfig,
    /// Shared TLS configuration
    tls: Arc<ClientConfig>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Self {
        info!(
            "HTTP client initialized (timeout: {:?}, connect timeout: {:?})",
            config.timeout, config.connect_timeout
        );

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            config,
            tls: Arc::new(tls),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HttpClientConfig::default())
    }

    /// Perform a GET request
    pub async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Response, HttpError> {
        self.request(Method::GET, url, headers, None).await
    }

    /// Perform a POST request
    pub async fn post(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<Response, HttpError> {
        self.request(Method::POST, url, headers, Some(body)).await
    }

    /// Perform an HTTP request, bounded by the configured timeout
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response, HttpError> {
        match tokio::time::timeout(
            self.config.timeout,
            self.send(method, url, headers, body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("HTTP request to {} timed out", redact_query(url));
                Err(HttpError::Timeout)
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response, HttpError> {
        let start = Instant::now();

        // 1. Parse URL
        let uri: Uri = url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| HttpError::InvalidUrl(e.to_string()))?;

        let host = uri
            .host()
            .ok_or_else(|| HttpError::InvalidUrl("No host in URL".to_string()))?
            .to_string();
        let is_https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| host.clone());

        // 2. Build request
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(USER_AGENT, &self.config.user_agent)
            .header(HOST, &authority);

        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpError::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpError::InvalidHeader(e.to_string()))?;
            builder = builder.header(name, value);
        }

        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| HttpError::HttpError(e.to_string()))?;

        // 3. Connect
        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            tokio::net::TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| HttpError::Timeout)?
        .map_err(|e| HttpError::ConnectionFailed(e.to_string()))?;

        // 4. Send, wrapping in TLS for HTTPS
        let sent = if is_https {
            let connector = TlsConnector::from(self.tls.clone());
            let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                .map_err(|_| HttpError::TlsError("Invalid server name".to_string()))?;

            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| HttpError::TlsError(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| HttpError::HttpError(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    warn!("Connection error: {}", e);
                }
            });

            sender.send_request(request).await
        } else {
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| HttpError::HttpError(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    warn!("Connection error: {}", e);
                }
            });

            sender.send_request(request).await
        };

        let response = sent.map_err(|e| HttpError::HttpError(e.to_string()))?;

        // 5. Read response
        let status = response.status();
        let headers = response.headers().clone();

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::BodyError(e.to_string()))?;
        let body = collected.to_bytes().to_vec();

        let total_time = start.elapsed();

        debug!(
            "HTTP {} {} -> {} ({} bytes, {:?})",
            method,
            redact_query(url),
            status,
            body.len(),
            total_time
        );

        Ok(Response {
            status,
            headers,
            body,
            total_time,
        })
    }
}

/// Drop the query string before logging; it may carry tokens
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
