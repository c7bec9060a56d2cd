//! Credential Broker
//!
//! Fetches per-destination tunnel credentials. Nothing is cached here;
//! every call is a fresh backend request.

use std::fmt;
use std::sync::Arc;
use tg_network::{BackendError, BackendService, Destination};
use tracing::{info, warn};

/// Endpoint and secret for one destination
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub destination_address: String,
    pub secret: String,
    /// Destination these were requested for
    pub issued_for: String,
}

impl Credentials {
    /// Destination codes compare case-insensitively
    pub fn is_issued_for(&self, destination: &str) -> bool {
        self.issued_for.eq_ignore_ascii_case(destination.trim())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("destination_address", &self.destination_address)
            .field("secret", &"[redacted]")
            .field("issued_for", &self.issued_for)
            .finish()
    }
}

/// Credential errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("No destination selected")]
    NoDestination,

    #[error("Network error: {0}")]
    Network(String),

    /// Backend text verbatim, or the generic marker
    #[error("{0}")]
    Backend(String),
}

impl From<BackendError> for CredentialsError {
    fn from(e: BackendError) -> Self {
        if e.is_network() {
            CredentialsError::Network(e.to_string())
        } else {
            CredentialsError::Backend(e.message())
        }
    }
}

/// Stateless request/response wrapper over the backend
#[derive(Clone)]
pub struct CredentialBroker {
    backend: Arc<dyn BackendService>,
}

impl CredentialBroker {
    pub fn new(backend: Arc<dyn BackendService>) -> Self {
        Self { backend }
    }

    /// Request credentials for `destination`
    pub async fn get_credentials(
        &self,
        token: &str,
        destination: &str,
    ) -> Result<Credentials, CredentialsError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(CredentialsError::NoDestination);
        }

        let issued = self
            .backend
            .credentials(token, destination)
            .await
            .map_err(|e| {
                warn!("Credentials for '{}' failed: {}", destination, e);
                CredentialsError::from(e)
            })?;

        info!("Got credentials for '{}' ({})", destination, issued.address);

        Ok(Credentials {
            destination_address: issued.address,
            secret: issued.secret,
            issued_for: destination.to_string(),
        })
    }

    /// Destinations available to this session
    pub async fn list_destinations(&self, token: &str) -> Result<Vec<Destination>, CredentialsError> {
        let destinations = self.backend.destinations(token).await.map_err(|e| {
            warn!("Listing destinations failed: {}", e);
            CredentialsError::from(e)
        })?;

        info!("{} destinations available", destinations.len());
        Ok(destinations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tg_network::{GENERIC_FAILURE, LoginRequest, RemainingTraffic, VpnCredentials};

    struct FakeBackend {
        requested: Mutex<Vec<String>>,
        failure: Option<BackendError>,
    }

    impl FakeBackend {
        fn ok() -> Self {
            Self {
                requested: Mutex::new(Vec::new()),
                failure: None,
            }
        }

        fn failing(error: BackendError) -> Self {
            Self {
                requested: Mutex::new(Vec::new()),
                failure: Some(error),
            }
        }
    }

    #[async_trait]
    impl BackendService for FakeBackend {
        async fn login(&self, _: LoginRequest<'_>) -> Result<String, BackendError> {
            unimplemented!()
        }

        async fn logout(&self, _: &str) -> Result<(), BackendError> {
            unimplemented!()
        }

        async fn credentials(
            &self,
            token: &str,
            destination: &str,
        ) -> Result<VpnCredentials, BackendError> {
            self.requested
                .lock()
                .unwrap()
                .push(format!("{}:{}", token, destination));
            if let Some(e) = &self.failure {
                return Err(e.clone());
            }
            Ok(VpnCredentials {
                address: "1.2.3.4".into(),
                secret: "xyz".into(),
            })
        }

        async fn remaining_traffic(&self, _: &str) -> Result<RemainingTraffic, BackendError> {
            unimplemented!()
        }

        async fn destinations(&self, _: &str) -> Result<Vec<Destination>, BackendError> {
            if let Some(e) = &self.failure {
                return Err(e.clone());
            }
            Ok(vec![
                Destination {
                    code: "de".into(),
                    servers: 3,
                },
                Destination {
                    code: "us".into(),
                    servers: 5,
                },
            ])
        }
    }

    #[tokio::test]
    async fn test_get_credentials() {
        let backend = Arc::new(FakeBackend::ok());
        let broker = CredentialBroker::new(backend.clone());

        let creds = broker.get_credentials("tok", "us").await.unwrap();

        assert_eq!(creds.destination_address, "1.2.3.4");
        assert_eq!(creds.secret, "xyz");
        assert!(creds.is_issued_for("US"));
        assert!(!creds.is_issued_for("fr"));
        assert_eq!(*backend.requested.lock().unwrap(), vec!["tok:us"]);
    }

    #[tokio::test]
    async fn test_every_call_hits_backend() {
        let backend = Arc::new(FakeBackend::ok());
        let broker = CredentialBroker::new(backend.clone());

        broker.get_credentials("tok", "de").await.unwrap();
        broker.get_credentials("tok", "fr").await.unwrap();
        broker.get_credentials("tok", "fr").await.unwrap();

        assert_eq!(backend.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_errors() {
        let broker = CredentialBroker::new(Arc::new(FakeBackend::failing(BackendError::Rejected(
            Some("quota exceeded".into()),
        ))));
        assert_eq!(
            broker.get_credentials("tok", "de").await,
            Err(CredentialsError::Backend("quota exceeded".into()))
        );

        let broker = CredentialBroker::new(Arc::new(FakeBackend::failing(BackendError::Rejected(None))));
        assert_eq!(
            broker.list_destinations("tok").await,
            Err(CredentialsError::Backend(GENERIC_FAILURE.into()))
        );

        let broker = CredentialBroker::new(Arc::new(FakeBackend::failing(BackendError::Network(
            "timeout".into(),
        ))));
        assert!(matches!(
            broker.get_credentials("tok", "de").await,
            Err(CredentialsError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_destination() {
        let backend = Arc::new(FakeBackend::ok());
        let broker = CredentialBroker::new(backend.clone());

        assert_eq!(
            broker.get_credentials("tok", "  ").await,
            Err(CredentialsError::NoDestination)
        );
        assert!(backend.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_destinations() {
        let broker = CredentialBroker::new(Arc::new(FakeBackend::ok()));
        let destinations = broker.list_destinations("tok").await.unwrap();

        assert_eq!(destinations.len(), 2);
        assert_eq!(destinations[1].code, "us");
    }
}
