//! Traffic Poller
//!
//! Refreshes the remaining quota on a fixed period. A tick without a
//! session does nothing; a failed poll keeps the last published quota.

use crate::session::SessionHandle;
use crate::traffic::{Quota, TrafficBoard};
use std::sync::Arc;
use std::time::Duration;
use tg_network::BackendService;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct TrafficPoller {
    session: SessionHandle,
    backend: Arc<dyn BackendService>,
    traffic: TrafficBoard,
    period: Duration,
}

impl TrafficPoller {
    pub fn new(
        session: SessionHandle,
        backend: Arc<dyn BackendService>,
        traffic: TrafficBoard,
        period: Duration,
    ) -> Self {
        Self {
            session,
            backend,
            traffic,
            period,
        }
    }

    /// Poll once. Returns whether the backend was asked.
    pub async fn tick(&self) -> bool {
        let Some(token) = self.session.token().await else {
            return false;
        };

        match self.backend.remaining_traffic(&token).await {
            Ok(remaining) => {
                // Logout may have happened while the request was in flight
                if self.session.token().await.as_deref() != Some(token.as_str()) {
                    debug!("Session changed during quota poll, result dropped");
                    return true;
                }
                let quota = Quota::from(remaining);
                debug!("Quota: {:?}", quota);
                self.traffic.publish_quota(quota);
            }
            Err(e) => warn!("Quota poll failed: {}", e),
        }
        true
    }

    /// Run forever on the configured period; the first tick is one period out
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!("Traffic poller started (every {:?})", self.period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::session::{AuthSessionManager, NoPrompt};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tg_network::{
        AuthMethod, BackendError, Destination, DeviceType, LoginRequest, OAuthError, OAuthProvider,
        RemainingTraffic, TokenGrant, VpnCredentials,
    };

    #[derive(Default)]
    struct QuotaBackend {
        polls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BackendService for QuotaBackend {
        async fn login(&self, _: LoginRequest<'_>) -> Result<String, BackendError> {
            Ok("tok".into())
        }

        async fn logout(&self, _: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn credentials(&self, _: &str, _: &str) -> Result<VpnCredentials, BackendError> {
            unimplemented!()
        }

        async fn remaining_traffic(&self, token: &str) -> Result<RemainingTraffic, BackendError> {
            assert_eq!(token, "tok");
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BackendError::Network("timeout".into()));
            }
            Ok(RemainingTraffic {
                unlimited: false,
                used: 1,
                remaining: 99,
            })
        }

        async fn destinations(&self, _: &str) -> Result<Vec<Destination>, BackendError> {
            unimplemented!()
        }
    }

    struct NoOAuth;

    #[async_trait]
    impl OAuthProvider for NoOAuth {
        async fn request_token(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<TokenGrant, OAuthError> {
            unimplemented!()
        }
    }

    fn setup(backend: Arc<QuotaBackend>) -> (AuthSessionManager, TrafficPoller, TrafficBoard) {
        let device = DeviceIdentity {
            id: "abc".into(),
            name: "desk".into(),
            device_type: DeviceType::Desktop,
        };
        let auth = AuthSessionManager::new(backend.clone(), Arc::new(NoOAuth), device);
        let traffic = TrafficBoard::new();
        let poller = TrafficPoller::new(
            auth.handle(),
            backend,
            traffic.clone(),
            Duration::from_millis(10),
        );
        (auth, poller, traffic)
    }

    #[tokio::test]
    async fn test_tick_without_session_is_noop() {
        let backend = Arc::new(QuotaBackend::default());
        let (_auth, poller, traffic) = setup(backend.clone());

        assert!(!poller.tick().await);
        assert_eq!(backend.polls.load(Ordering::SeqCst), 0);
        assert_eq!(traffic.snapshot().quota, Quota::Unknown);
    }

    #[tokio::test]
    async fn test_tick_publishes_quota() {
        let backend = Arc::new(QuotaBackend::default());
        let (auth, poller, traffic) = setup(backend.clone());

        auth.login(AuthMethod::Anonymous, None, &NoPrompt).await.unwrap();
        assert!(poller.tick().await);

        assert_eq!(
            traffic.snapshot().quota,
            Quota::Limited {
                remaining: 99,
                used: 1
            }
        );
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_quota() {
        let backend = Arc::new(QuotaBackend {
            fail: true,
            ..QuotaBackend::default()
        });
        let (auth, poller, traffic) = setup(backend.clone());
        traffic.publish_quota(Quota::Unlimited);

        auth.login(AuthMethod::Anonymous, None, &NoPrompt).await.unwrap();
        assert!(poller.tick().await);

        assert_eq!(backend.polls.load(Ordering::SeqCst), 1);
        assert_eq!(traffic.snapshot().quota, Quota::Unlimited);
    }

    #[tokio::test]
    async fn test_spawned_poller_stops_polling_after_logout() {
        let backend = Arc::new(QuotaBackend::default());
        let (auth, poller, _) = setup(backend.clone());
        let task = Arc::new(poller).spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.polls.load(Ordering::SeqCst), 0);

        auth.login(AuthMethod::Anonymous, None, &NoPrompt).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.polls.load(Ordering::SeqCst) > 0);

        auth.logout().await;
        // Let an in-flight tick finish
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_logout = backend.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.polls.load(Ordering::SeqCst), after_logout);

        task.abort();
    }
}
