//! Backend Service
//!
//! The partner backend issues access tokens, per-destination tunnel
//! credentials, destination lists and traffic quotas. [`BackendService`]
//! is the seam the orchestrator talks to; [`HttpBackend`] speaks the JSON
//! API over HTTPS.
//!
//! Every response carries a `result` field (`"OK"` on success) and an
//! optional `error` message, which is surfaced verbatim.

use crate::client::{HttpClient, HttpError, Response};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use url::Url;

/// `result` value of a successful response
const RESULT_OK: &str = "OK";

/// Shown when the backend gives no reason
pub const GENERIC_FAILURE: &str = "request failed";

/// How the device proves its identity at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Device id only
    Anonymous,
    /// Third-party OAuth token
    #[serde(rename = "delegated")]
    DelegatedOAuth,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::DelegatedOAuth => "github",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device class reported at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Desktop,
    Laptop,
    Server,
}

/// Login parameters
#[derive(Clone)]
pub struct LoginRequest<'a> {
    pub method: AuthMethod,
    pub device_id: &'a str,
    pub device_name: &'a str,
    pub device_type: DeviceType,
    /// OAuth token for delegated logins
    pub proof: Option<&'a str>,
}

impl fmt::Debug for LoginRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("method", &self.method)
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("device_type", &self.device_type)
            .field("proof", &self.proof.map(|_| "[redacted]"))
            .finish()
    }
}

/// Tunnel endpoint and secret for one destination
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct VpnCredentials {
    /// Server address
    #[serde(rename = "ip")]
    pub address: String,
    /// Per-session secret
    #[serde(rename = "password")]
    pub secret: String,
}

impl fmt::Debug for VpnCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpnCredentials")
            .field("address", &self.address)
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Quota state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct RemainingTraffic {
    #[serde(rename = "is_unlimited")]
    pub unlimited: bool,
    #[serde(rename = "traffic_used")]
    pub used: u64,
    #[serde(rename = "traffic_remaining")]
    pub remaining: u64,
}

/// Selectable destination
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Destination {
    /// Country/region code, e.g. `de`
    #[serde(rename = "country")]
    pub code: String,
    /// Number of servers behind it
    pub servers: u32,
}

/// Backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{}", .0.as_deref().unwrap_or(GENERIC_FAILURE))]
    Rejected(Option<String>),

    #[error("Malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Backend-provided text, or the generic marker
    pub fn message(&self) -> String {
        match self {
            BackendError::Rejected(Some(reason)) => reason.clone(),
            BackendError::Rejected(None) => GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, BackendError::Network(_))
    }
}

impl From<HttpError> for BackendError {
    fn from(e: HttpError) -> Self {
        BackendError::Network(e.to_string())
    }
}

/// Backend operations used by the orchestrator
#[async_trait]
pub trait BackendService: Send + Sync {
    /// Exchange a device identity (and optional proof) for an access token
    async fn login(&self, request: LoginRequest<'_>) -> Result<String, BackendError>;

    async fn logout(&self, token: &str) -> Result<(), BackendError>;

    async fn credentials(&self, token: &str, destination: &str)
        -> Result<VpnCredentials, BackendError>;

    async fn remaining_traffic(&self, token: &str) -> Result<RemainingTraffic, BackendError>;

    async fn destinations(&self, token: &str) -> Result<Vec<Destination>, BackendError>;
}

/// JSON-over-HTTPS backend
#[derive(Clone)]
pub struct HttpBackend {
    client: HttpClient,
    base_url: Url,
    carrier_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    result: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginData {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DestinationsData {
    countries: Vec<Destination>,
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

#[derive(Serialize)]
struct LoginBody<'a> {
    auth_method: &'a str,
    device_id: &'a str,
    device_name: &'a str,
    device_type: DeviceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

impl HttpBackend {
    pub fn new(client: HttpClient, base_url: Url, carrier_id: impl Into<String>) -> Self {
        let carrier_id = carrier_id.into();
        info!("Backend: {} (carrier {})", base_url, carrier_id);

        Self {
            client,
            base_url,
            carrier_id,
        }
    }

    /// Build `<base>/api/v1/user/<action>?carrier_id=..&<params>`
    fn endpoint(&self, action: &str, params: &[(&str, &str)]) -> Result<String, BackendError> {
        let mut url = self
            .base_url
            .join(&format!("api/v1/user/{}", action))
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("carrier_id", &self.carrier_id);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }

        Ok(url.into())
    }

    fn decode<T: DeserializeOwned>(response: &Response) -> Result<T, BackendError> {
        let envelope: Envelope<T> = match serde_json::from_slice(&response.body) {
            Ok(envelope) => envelope,
            Err(e) if response.is_success() => return Err(BackendError::Malformed(e.to_string())),
            Err(_) => {
                debug!("Backend answered {} without a readable body", response.status);
                return Err(BackendError::Rejected(None));
            }
        };

        if response.is_success() && envelope.result == RESULT_OK {
            Ok(envelope.data)
        } else {
            let reason = envelope
                .error
                .filter(|e| !e.is_empty())
                .or_else(|| Some(envelope.result).filter(|r| !r.is_empty() && r != RESULT_OK));
            Err(BackendError::Rejected(reason))
        }
    }
}

#[async_trait]
impl BackendService for HttpBackend {
    async fn login(&self, request: LoginRequest<'_>) -> Result<String, BackendError> {
        let url = self.endpoint("login", &[])?;
        let body = LoginBody {
            auth_method: request.method.as_str(),
            device_id: request.device_id,
            device_name: request.device_name,
            device_type: request.device_type,
            access_token: request.proof,
        };
        let body = serde_json::to_vec(&body).map_err(|e| BackendError::Malformed(e.to_string()))?;

        let response = self
            .client
            .post(&url, &[("Content-Type", "application/json".to_string())], body)
            .await?;

        let data: LoginData = Self::decode(&response)?;
        if data.access_token.is_empty() {
            return Err(BackendError::Malformed("empty access token".into()));
        }
        Ok(data.access_token)
    }

    async fn logout(&self, token: &str) -> Result<(), BackendError> {
        let url = self.endpoint("logout", &[("access_token", token)])?;
        let response = self.client.post(&url, &[], Vec::new()).await?;
        let _: Empty = Self::decode(&response)?;
        Ok(())
    }

    async fn credentials(
        &self,
        token: &str,
        destination: &str,
    ) -> Result<VpnCredentials, BackendError> {
        let url = self.endpoint("provide", &[("access_token", token), ("country", destination)])?;
        let response = self.client.get(&url, &[]).await?;

        let credentials: VpnCredentials = Self::decode(&response)?;
        if credentials.address.is_empty() {
            return Err(BackendError::Malformed("credentials without address".into()));
        }
        Ok(credentials)
    }

    async fn remaining_traffic(&self, token: &str) -> Result<RemainingTraffic, BackendError> {
        let url = self.endpoint("remainingTraffic", &[("access_token", token)])?;
        let response = self.client.get(&url, &[]).await?;
        Self::decode(&response)
    }

    async fn destinations(&self, token: &str) -> Result<Vec<Destination>, BackendError> {
        let url = self.endpoint("countries", &[("access_token", token)])?;
        let response = self.client.get(&url, &[]).await?;
        let data: DestinationsData = Self::decode(&response)?;
        Ok(data.countries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderMap;
    use hyper::StatusCode;
    use std::time::Duration;

    fn response(status: StatusCode, body: &str) -> Response {
        Response {
            status,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
            total_time: Duration::ZERO,
        }
    }

    fn backend() -> HttpBackend {
        HttpBackend::new(
            HttpClient::with_defaults(),
            Url::parse("https://backend.example.com/").unwrap(),
            "demo",
        )
    }

    #[test]
    fn test_endpoint() {
        let url = backend()
            .endpoint("provide", &[("access_token", "t0k"), ("country", "de")])
            .unwrap();
        assert_eq!(
            url,
            "https://backend.example.com/api/v1/user/provide?carrier_id=demo&access_token=t0k&country=de"
        );
    }

    #[test]
    fn test_decode_credentials() {
        let r = response(StatusCode::OK, r#"{"result":"OK","ip":"1.2.3.4","password":"xyz"}"#);
        let creds: VpnCredentials = HttpBackend::decode(&r).unwrap();
        assert_eq!(creds.address, "1.2.3.4");
        assert_eq!(creds.secret, "xyz");
    }

    #[test]
    fn test_decode_traffic() {
        let r = response(
            StatusCode::OK,
            r#"{"result":"OK","is_unlimited":false,"traffic_used":10,"traffic_remaining":90}"#,
        );
        let traffic: RemainingTraffic = HttpBackend::decode(&r).unwrap();
        assert_eq!(traffic, RemainingTraffic { unlimited: false, used: 10, remaining: 90 });
    }

    #[test]
    fn test_decode_destinations() {
        let r = response(
            StatusCode::OK,
            r#"{"result":"OK","countries":[{"country":"de","servers":4},{"country":"us"}]}"#,
        );
        let data: DestinationsData = HttpBackend::decode(&r).unwrap();
        assert_eq!(data.countries.len(), 2);
        assert_eq!(data.countries[1].servers, 0);
    }

    #[test]
    fn test_error_text_is_verbatim() {
        let r = response(
            StatusCode::OK,
            r#"{"result":"TRAFFIC_EXCEED","error":"Traffic limit exceeded"}"#,
        );
        let err = HttpBackend::decode::<VpnCredentials>(&r).unwrap_err();
        assert_eq!(err, BackendError::Rejected(Some("Traffic limit exceeded".into())));
        assert_eq!(err.message(), "Traffic limit exceeded");
    }

    #[test]
    fn test_result_code_when_no_error_text() {
        let r = response(StatusCode::OK, r#"{"result":"NOT_AUTHORIZED"}"#);
        let err = HttpBackend::decode::<Empty>(&r).unwrap_err();
        assert_eq!(err.message(), "NOT_AUTHORIZED");
    }

    #[test]
    fn test_generic_failure_marker() {
        let r = response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        let err = HttpBackend::decode::<Empty>(&r).unwrap_err();
        assert_eq!(err, BackendError::Rejected(None));
        assert_eq!(err.to_string(), GENERIC_FAILURE);
    }

    #[test]
    fn test_malformed_success() {
        let r = response(StatusCode::OK, "not json");
        let err = HttpBackend::decode::<Empty>(&r).unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn test_auth_method_serde() {
        let m: AuthMethod = serde_json::from_str("\"delegated\"").unwrap();
        assert_eq!(m, AuthMethod::DelegatedOAuth);
        let m: AuthMethod = serde_json::from_str("\"anonymous\"").unwrap();
        assert_eq!(m, AuthMethod::Anonymous);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = VpnCredentials { address: "1.2.3.4".into(), secret: "xyz".into() };
        assert!(!format!("{:?}", creds).contains("xyz"));
    }
}
