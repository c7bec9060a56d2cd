//! Delegated OAuth Provider
//!
//! Obtains a third-party token with a basic-auth POST. When the account
//! has a second factor, the provider answers `401 Unauthorized` with a
//! marker header; the same request is then resubmitted with the one-time
//! code in that header.

use crate::client::{HttpClient, HttpError};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome of a token request
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    /// Provider issued a token
    Granted(String),
    /// Provider wants a one-time code
    SecondFactorRequired,
    /// Provider refused (status code)
    Denied(u16),
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenGrant::Granted(_) => f.write_str("Granted([redacted])"),
            TokenGrant::SecondFactorRequired => f.write_str("SecondFactorRequired"),
            TokenGrant::Denied(status) => write!(f, "Denied({})", status),
        }
    }
}

/// OAuth provider errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl From<HttpError> for OAuthError {
    fn from(e: HttpError) -> Self {
        OAuthError::Network(e.to_string())
    }
}

/// Third-party token issuer
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Request a token; `one_time_code` is set on resubmission
    async fn request_token(
        &self,
        login: &str,
        password: &str,
        one_time_code: Option<&str>,
    ) -> Result<TokenGrant, OAuthError>;
}

/// Provider settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthProviderConfig {
    /// Token endpoint
    pub token_url: String,
    /// OAuth application id
    pub client_id: String,
    /// OAuth application secret
    pub client_secret: String,
    /// Header carrying the second-factor challenge and code
    pub otp_header: String,
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            token_url: "https://api.github.com/authorizations".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            otp_header: "X-GitHub-OTP".to_string(),
        }
    }
}

impl fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("otp_header", &self.otp_header)
            .finish()
    }
}

#[derive(Serialize)]
struct TokenRequestBody<'a> {
    scopes: [&'a str; 0],
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponseBody {
    #[serde(default)]
    token: String,
}

/// GitHub-style authorizations endpoint
pub struct GitHubOAuth {
    client: HttpClient,
    config: OAuthProviderConfig,
}

impl GitHubOAuth {
    pub fn new(client: HttpClient, config: OAuthProviderConfig) -> Self {
        Self { client, config }
    }

    fn headers(&self, login: &str, password: &str, one_time_code: Option<&str>) -> Vec<(&str, String)> {
        let basic = BASE64.encode(format!("{}:{}", login, password));

        let mut headers = vec![
            ("Accept", "application/json".to_string()),
            ("Content-Type", "application/json".to_string()),
            ("Authorization", format!("Basic {}", basic)),
        ];
        if let Some(code) = one_time_code {
            headers.push((self.config.otp_header.as_str(), code.to_string()));
        }
        headers
    }
}

#[async_trait]
impl OAuthProvider for GitHubOAuth {
    async fn request_token(
        &self,
        login: &str,
        password: &str,
        one_time_code: Option<&str>,
    ) -> Result<TokenGrant, OAuthError> {
        let body = TokenRequestBody {
            scopes: [],
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
        };
        let body = serde_json::to_vec(&body).map_err(|e| OAuthError::Malformed(e.to_string()))?;

        debug!(
            "Requesting OAuth token{}",
            if one_time_code.is_some() { " with one-time code" } else { "" }
        );

        let headers = self.headers(login, password, one_time_code);
        let response = self.client.post(&self.config.token_url, &headers, body).await?;

        if response.is_success() {
            let parsed: TokenResponseBody = serde_json::from_slice(&response.body)
                .map_err(|e| OAuthError::Malformed(e.to_string()))?;
            if parsed.token.is_empty() {
                return Err(OAuthError::Malformed("response without token".into()));
            }
            info!("Got OAuth token from provider");
            return Ok(TokenGrant::Granted(parsed.token));
        }

        if response.status == StatusCode::UNAUTHORIZED && response.has_header(&self.config.otp_header) {
            info!("Provider requires a second factor");
            return Ok(TokenGrant::SecondFactorRequired);
        }

        warn!("Provider refused token request ({})", response.status);
        Ok(TokenGrant::Denied(response.status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn provider(token_url: String) -> GitHubOAuth {
        GitHubOAuth::new(
            HttpClient::with_defaults(),
            OAuthProviderConfig {
                token_url,
                client_id: "id".into(),
                client_secret: "secret".into(),
                ..OAuthProviderConfig::default()
            },
        )
    }

    async fn serve(reply: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}/authorizations", addr), handle)
    }

    #[test]
    fn test_headers() {
        let p = provider("http://localhost/authorizations".into());

        let plain = p.headers("octo", "cat", None);
        assert!(plain.contains(&("Authorization", "Basic b2N0bzpjYXQ=".to_string())));
        assert!(!plain.iter().any(|(k, _)| *k == "X-GitHub-OTP"));

        let with_code = p.headers("octo", "cat", Some("123456"));
        assert!(with_code.contains(&("X-GitHub-OTP", "123456".to_string())));
    }

    #[tokio::test]
    async fn test_granted() {
        let (url, server) = serve(
            "HTTP/1.1 201 Created\r\nContent-Length: 17\r\nConnection: close\r\n\r\n{\"token\":\"gho_1\"}",
        )
        .await;

        let grant = provider(url).request_token("octo", "cat", None).await.unwrap();
        assert_eq!(grant, TokenGrant::Granted("gho_1".into()));
        assert!(server.await.unwrap().starts_with("POST /authorizations HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_second_factor_challenge() {
        let (url, _server) = serve(
            "HTTP/1.1 401 Unauthorized\r\nX-GitHub-OTP: required; sms\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let grant = provider(url).request_token("octo", "cat", None).await.unwrap();
        assert_eq!(grant, TokenGrant::SecondFactorRequired);
    }

    #[tokio::test]
    async fn test_denied() {
        let (url, _server) = serve(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let grant = provider(url).request_token("octo", "wrong", None).await.unwrap();
        assert_eq!(grant, TokenGrant::Denied(401));
    }
}
