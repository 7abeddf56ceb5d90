//! One-time correlation tokens tying provider redirects back to the request
//! that started them.
//!
//! Tokens live for 300 seconds and resolve exactly once: consumption is a
//! single atomic read-and-delete, so two callback deliveries racing the same
//! token can never both succeed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SignError;

pub const TOKEN_TTL: Duration = Duration::from_secs(300);

/// Which flow issued the token. The callback handler dispatches on this.
///
/// Only the flows that round-trip through the provider's authorize
/// endpoint carry a token; document-variant signing is correlated by the
/// provider-issued process id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowKind {
    HashSign,
    Reconfirm,
}

/// Payload bound to a correlation token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub flow: FlowKind,
    /// Free-form continuation data: a redirect target or a foreign record id.
    pub continuation: Option<String>,
    pub owner: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
}

struct Entry {
    payload: TokenPayload,
    deadline: Instant,
}

/// In-process correlation token store.
///
/// All operations take the single mutex, which makes `consume` the atomic
/// get-and-delete the callback race requires.
pub struct CorrelationTokenStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Default for CorrelationTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTokenStore {
    pub fn new() -> Self {
        Self::with_ttl(TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh token bound to `payload` data.
    pub fn issue(
        &self,
        flow: FlowKind,
        continuation: Option<String>,
        owner: Option<Uuid>,
    ) -> String {
        let mut raw = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let payload = TokenPayload {
            flow,
            continuation,
            owner,
            issued_at: Utc::now(),
        };

        let mut entries = self.entries.lock().expect("token store poisoned");
        entries.insert(
            token.clone(),
            Entry {
                payload,
                deadline: Instant::now() + self.ttl,
            },
        );
        debug!(flow = ?flow, token_prefix = &token[..8], "issued correlation token");
        token
    }

    /// Atomically consume a token. Missing, expired, and already-consumed
    /// tokens all fail identically with `InvalidToken`.
    pub fn consume(&self, token: &str) -> Result<TokenPayload, SignError> {
        if token.is_empty() {
            return Err(SignError::InvalidToken);
        }

        let mut entries = self.entries.lock().expect("token store poisoned");
        match entries.remove(token) {
            Some(entry) if entry.deadline > Instant::now() => {
                debug!(flow = ?entry.payload.flow, "consumed correlation token");
                Ok(entry.payload)
            }
            Some(_) => {
                warn!("correlation token expired before consumption");
                Err(SignError::InvalidToken)
            }
            None => {
                warn!("correlation token not found or already consumed");
                Err(SignError::InvalidToken)
            }
        }
    }

    /// Drop expired entries. Called periodically by the sweeper task; expiry
    /// is also enforced passively in `consume`.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("token store poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.deadline > now);
        before - entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn consume_succeeds_exactly_once() {
        let store = CorrelationTokenStore::new();
        let token = store.issue(FlowKind::HashSign, None, Some(Uuid::new_v4()));

        let payload = store.consume(&token).unwrap();
        assert_eq!(payload.flow, FlowKind::HashSign);

        let err = store.consume(&token).unwrap_err();
        assert!(matches!(err, SignError::InvalidToken));
    }

    #[test]
    fn expired_token_fails_to_consume() {
        let store = CorrelationTokenStore::with_ttl(Duration::from_millis(0));
        let token = store.issue(FlowKind::HashSign, None, None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            store.consume(&token),
            Err(SignError::InvalidToken)
        ));
    }

    #[test]
    fn unknown_and_empty_tokens_fail() {
        let store = CorrelationTokenStore::new();
        assert!(matches!(store.consume(""), Err(SignError::InvalidToken)));
        assert!(matches!(
            store.consume("deadbeef"),
            Err(SignError::InvalidToken)
        ));
    }

    #[test]
    fn racing_consumers_observe_at_most_one_success() {
        let store = Arc::new(CorrelationTokenStore::new());
        let token = store.issue(FlowKind::Reconfirm, Some("rec-1".into()), None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let token = token.clone();
                std::thread::spawn(move || store.consume(&token).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = CorrelationTokenStore::with_ttl(Duration::from_millis(0));
        store.issue(FlowKind::Reconfirm, None, None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 0);
    }
}
