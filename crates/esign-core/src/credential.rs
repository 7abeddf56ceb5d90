//! Service-credential cache.
//!
//! Signed-artifact downloads authenticate with the service's own
//! client-credentials token, not the user's. The token is cached and
//! refreshed slightly before the provider's expiry; when the auth surface
//! is down a stale token is better than none, so expiry falls back rather
//! than fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::error::SignError;
use crate::gateway::{AuthApi, ServiceCredential};

/// Refresh this long before the provider-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Never cache for less than this, whatever the provider reports.
const MIN_TTL: Duration = Duration::from_secs(60);

struct Cached {
    credential: ServiceCredential,
    fresh_until: Instant,
}

pub struct ServiceCredentialCache {
    auth: Arc<dyn AuthApi>,
    breaker: Arc<CircuitBreaker>,
    scope: String,
    cached: Mutex<Option<Cached>>,
}

impl ServiceCredentialCache {
    pub fn new(auth: Arc<dyn AuthApi>, breaker: Arc<CircuitBreaker>, scope: String) -> Self {
        Self {
            auth,
            breaker,
            scope,
            cached: Mutex::new(None),
        }
    }

    /// A service credential, freshly fetched or cached.
    ///
    /// On fetch failure a stale cached token is returned if one exists;
    /// only a cold cache with an unreachable auth surface is an error.
    pub async fn get(&self) -> Result<ServiceCredential, SignError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.fresh_until > Instant::now() {
                return Ok(entry.credential.clone());
            }
        }

        let auth = Arc::clone(&self.auth);
        let scope = self.scope.clone();
        match self
            .breaker
            .run(move || async move { auth.client_credentials(&scope).await })
            .await
        {
            Ok(credential) => {
                let ttl = Duration::from_secs(credential.expires_in)
                    .saturating_sub(EXPIRY_MARGIN)
                    .max(MIN_TTL);
                debug!(ttl_secs = ttl.as_secs(), "service credential refreshed");
                *cached = Some(Cached {
                    credential: credential.clone(),
                    fresh_until: Instant::now() + ttl,
                });
                Ok(credential)
            }
            Err(err) => match cached.as_ref() {
                Some(stale) => {
                    warn!(error = %err, "auth unavailable, serving stale service credential");
                    Ok(stale.credential.clone())
                }
                None => Err(err.into_sign_error("auth")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, CircuitState};
    use crate::gateway::{GatewayError, UserCredential};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct ScriptedAuth {
        calls: AtomicU32,
        fail: AtomicBool,
    }

    #[async_trait]
    impl AuthApi for ScriptedAuth {
        async fn exchange_code(
            &self,
            _code: &str,
            _redirect_uri: &str,
        ) -> Result<UserCredential, GatewayError> {
            unimplemented!("not used by the cache")
        }

        async fn client_credentials(
            &self,
            _scope: &str,
        ) -> Result<ServiceCredential, GatewayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::Unavailable("down".into()));
            }
            Ok(ServiceCredential {
                access_token: format!("token-{call}"),
                expires_in: 3600,
            })
        }

        async fn fetch_subject(
            &self,
            _credential: &UserCredential,
        ) -> Result<String, GatewayError> {
            unimplemented!("not used by the cache")
        }
    }

    fn cache_with(auth: Arc<ScriptedAuth>) -> ServiceCredentialCache {
        let breaker = Arc::new(CircuitBreaker::new("auth", BreakerConfig::default()));
        ServiceCredentialCache::new(auth, breaker, "urn:test:scope".into())
    }

    #[tokio::test]
    async fn serves_cached_token_within_ttl() {
        let auth = Arc::new(ScriptedAuth {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        });
        let cache = cache_with(Arc::clone(&auth));

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();
        assert_eq!(first.access_token, second.access_token);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_stale_token_when_auth_is_down() {
        let auth = Arc::new(ScriptedAuth {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        });
        let breaker = Arc::new(CircuitBreaker::new("auth", BreakerConfig::default()));
        let cache = ServiceCredentialCache::new(
            Arc::clone(&auth) as Arc<dyn AuthApi>,
            Arc::clone(&breaker),
            "urn:test:scope".into(),
        );

        let fresh = cache.get().await.unwrap();

        // Invalidate the cache entry and cut the auth surface.
        cache.cached.lock().await.as_mut().unwrap().fresh_until = Instant::now();
        auth.fail.store(true, Ordering::SeqCst);
        breaker.force_state(CircuitState::Open);

        let stale = cache.get().await.unwrap();
        assert_eq!(stale.access_token, fresh.access_token);
    }

    #[tokio::test]
    async fn cold_cache_with_auth_down_is_an_error() {
        let auth = Arc::new(ScriptedAuth {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(true),
        });
        let cache = cache_with(auth);
        let err = cache.get().await.unwrap_err();
        assert!(matches!(
            err,
            SignError::DependencyUnavailable { dependency: "auth" }
        ));
    }
}
