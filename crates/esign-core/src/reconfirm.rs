//! Identity re-confirmation.
//!
//! Before high-value operations the user proves, via a fresh provider
//! challenge at an elevated authentication strength, that they are still
//! the person bound to the session. The provider's answer is compared
//! byte-for-byte against the subject snapshotted at initiation; a mismatch
//! is a security incident, and the caller learns nothing beyond a generic
//! failure.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::breaker::Breakers;
use crate::config::ProviderConfig;
use crate::error::SignError;
use crate::gateway::AuthApi;
use crate::store::{AuditSink, ReconfirmationStore};
use crate::token::{CorrelationTokenStore, FlowKind};
use crate::types::{HintKind, IdentityReconfirmation, ReconfirmationStatus, SignerProfile};

#[derive(Debug, Clone)]
pub struct InitiatedReconfirmation {
    pub record_id: Uuid,
    pub redirect_url: String,
}

pub struct ReconfirmationService {
    config: ProviderConfig,
    auth: Arc<dyn AuthApi>,
    records: Arc<dyn ReconfirmationStore>,
    audit: Arc<dyn AuditSink>,
    tokens: Arc<CorrelationTokenStore>,
    breakers: Arc<Breakers>,
}

impl ReconfirmationService {
    pub fn new(
        config: ProviderConfig,
        auth: Arc<dyn AuthApi>,
        records: Arc<dyn ReconfirmationStore>,
        audit: Arc<dyn AuditSink>,
        tokens: Arc<CorrelationTokenStore>,
        breakers: Arc<Breakers>,
    ) -> Self {
        Self {
            config,
            auth,
            records,
            audit,
            tokens,
            breakers,
        }
    }

    /// Start a challenge. The username hint is resolved from the caller's
    /// profile; the expected subject is snapshotted into the record now so
    /// later profile edits cannot influence the comparison.
    #[instrument(skip_all, fields(owner = %profile.id, purpose))]
    pub async fn initiate(
        &self,
        profile: &SignerProfile,
        purpose: &str,
        transaction_ref: &str,
        hint_kind: HintKind,
    ) -> Result<InitiatedReconfirmation, SignError> {
        let hint = profile.resolve_hint(hint_kind)?;

        let mut record =
            IdentityReconfirmation::new(profile.id, purpose, transaction_ref, hint_kind);
        record.expected_subject = profile.provider_subject.clone();
        self.records.insert(&record).await?;

        let state = self.tokens.issue(
            FlowKind::Reconfirm,
            Some(record.id.to_string()),
            Some(profile.id),
        );
        let callback_url = self.config.callback_url("/v1/reconfirm/callback");
        let redirect_url = self.config.authorize_url(&[
            ("scope", self.config.reconfirm_scope.as_str()),
            ("redirect_uri", callback_url.as_str()),
            ("state", state.as_str()),
            ("acr_values", self.config.reconfirm_acr.as_str()),
            ("username", hint.as_str()),
        ])?;

        self.audit
            .record(
                Some(profile.id),
                "reconfirm.initiated",
                "identity_reconfirmation",
                &record.id.to_string(),
                serde_json::json!({
                    "purpose": purpose,
                    "transaction_ref": transaction_ref,
                }),
            )
            .await;

        info!(record_id = %record.id, "identity re-confirmation initiated");
        Ok(InitiatedReconfirmation {
            record_id: record.id,
            redirect_url,
        })
    }

    /// Finish a challenge from its provider callback. Exchanges the code,
    /// resolves the subject the user actually authenticated as, and settles
    /// the record.
    #[instrument(skip_all, fields(record_id = %record_id))]
    pub async fn complete(
        &self,
        record_id: Uuid,
        code: &str,
        remote_addr: &str,
    ) -> Result<IdentityReconfirmation, SignError> {
        let mut record = self
            .records
            .find(record_id)
            .await?
            .ok_or(SignError::NotFound("re-confirmation record"))?;

        if record.status != ReconfirmationStatus::Pending {
            return Ok(record);
        }

        let callback_url = self.config.callback_url("/v1/reconfirm/callback");
        let credential = self
            .breakers
            .auth
            .run(|| async { self.auth.exchange_code(code, &callback_url).await })
            .await
            .map_err(|err| err.into_sign_error("auth"))?;
        let subject = self
            .breakers
            .auth
            .run(|| async { self.auth.fetch_subject(&credential).await })
            .await
            .map_err(|err| err.into_sign_error("auth"))?;

        // An absent or empty snapshot can never match: a record with no
        // bound subject must not verify by accident.
        let matched = record
            .expected_subject
            .as_deref()
            .map(|expected| !expected.is_empty() && expected == subject)
            .unwrap_or(false);

        record.returned_subject = Some(subject.clone());
        record.subject_match = Some(matched);

        if matched {
            record.status = ReconfirmationStatus::Verified;
            record.verified_at = Some(Utc::now());
            self.records.update(&record).await?;
            self.audit
                .record(
                    Some(record.owner),
                    "reconfirm.verified",
                    "identity_reconfirmation",
                    &record.id.to_string(),
                    serde_json::json!({ "purpose": record.purpose }),
                )
                .await;
            info!(record_id = %record.id, "identity re-confirmed");
            Ok(record)
        } else {
            record.status = ReconfirmationStatus::Failed;
            self.records.update(&record).await?;
            warn!(record_id = %record.id, "identity re-confirmation subject mismatch");
            self.audit
                .record(
                    Some(record.owner),
                    "security.identity_mismatch",
                    "identity_reconfirmation",
                    &record.id.to_string(),
                    serde_json::json!({
                        "expected": record.expected_subject,
                        "received": record.returned_subject,
                        "remote_addr": remote_addr,
                        "purpose": record.purpose,
                        "transaction_ref": record.transaction_ref,
                    }),
                )
                .await;
            Err(SignError::SecurityMismatch)
        }
    }

    /// Whether `owner` holds a verification fresh enough to pass the
    /// guarded routes.
    pub async fn has_recent_verified(&self, owner: Uuid) -> Result<bool, SignError> {
        let cutoff = Utc::now() - Duration::minutes(self.config.reconfirm_window_mins);
        Ok(self
            .records
            .find_recent_verified(owner, cutoff)
            .await?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    struct Fixture {
        service: ReconfirmationService,
        records: Arc<MemReconfirmationStore>,
        audit: Arc<RecordingAudit>,
        auth: Arc<FakeAuth>,
    }

    fn fixture_with_subject(subject: &str) -> Fixture {
        let records = shared(MemReconfirmationStore::default());
        let audit = shared(RecordingAudit::default());
        let auth = shared(FakeAuth {
            subject: subject.into(),
            ..FakeAuth::default()
        });
        let service = ReconfirmationService::new(
            test_provider_config(),
            Arc::clone(&auth) as _,
            Arc::clone(&records) as _,
            Arc::clone(&audit) as _,
            shared(CorrelationTokenStore::new()),
            shared(crate::breaker::Breakers::default()),
        );
        Fixture {
            service,
            records,
            audit,
            auth,
        }
    }

    #[tokio::test]
    async fn matching_subject_verifies_the_record() {
        let fx = fixture_with_subject("subject-1");
        let profile = resident_profile();

        let started = fx
            .service
            .initiate(&profile, "bulk signing", "ref-42", HintKind::NationalId)
            .await
            .unwrap();
        assert!(started.redirect_url.contains("acr_values="));
        assert!(started.redirect_url.contains("username="));

        let record = fx
            .service
            .complete(started.record_id, "code-1", "203.0.113.9")
            .await
            .unwrap();
        assert_eq!(record.status, ReconfirmationStatus::Verified);
        assert_eq!(record.subject_match, Some(true));
        assert!(record.verified_at.is_some());
        assert!(fx.service.has_recent_verified(profile.id).await.unwrap());
        assert_eq!(fx.audit.count_of("security.identity_mismatch").await, 0);
    }

    #[tokio::test]
    async fn mismatched_subject_raises_exactly_one_incident() {
        let fx = fixture_with_subject("someone-else");
        let profile = resident_profile();

        let started = fx
            .service
            .initiate(&profile, "bulk signing", "ref-42", HintKind::Mobile)
            .await
            .unwrap();
        let err = fx
            .service
            .complete(started.record_id, "code-1", "203.0.113.9")
            .await
            .unwrap_err();

        assert!(matches!(err, SignError::SecurityMismatch));
        let record = fx.records.find(started.record_id).await.unwrap().unwrap();
        assert_eq!(record.status, ReconfirmationStatus::Failed);
        assert_eq!(record.subject_match, Some(false));
        assert_eq!(fx.audit.count_of("security.identity_mismatch").await, 1);
        assert!(!fx.service.has_recent_verified(profile.id).await.unwrap());
    }

    #[tokio::test]
    async fn absent_expected_subject_never_matches() {
        let fx = fixture_with_subject("subject-1");
        let mut profile = resident_profile();
        profile.provider_subject = None;

        let started = fx
            .service
            .initiate(&profile, "account change", "ref-7", HintKind::Email)
            .await
            .unwrap();
        let err = fx
            .service
            .complete(started.record_id, "code-1", "203.0.113.9")
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::SecurityMismatch));
        assert_eq!(fx.audit.count_of("security.identity_mismatch").await, 1);
    }

    #[tokio::test]
    async fn visitor_cannot_use_national_id_hint() {
        let fx = fixture_with_subject("subject-1");
        let mut profile = resident_profile();
        profile.class = crate::types::IdentityClass::Visitor;

        let err = fx
            .service
            .initiate(&profile, "signing", "ref-1", HintKind::NationalId)
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::Validation(_)));
    }

    #[tokio::test]
    async fn unreachable_auth_surfaces_unavailable_without_settling() {
        let fx = fixture_with_subject("subject-1");
        let profile = resident_profile();
        let started = fx
            .service
            .initiate(&profile, "signing", "ref-1", HintKind::Mobile)
            .await
            .unwrap();
        fx.auth
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = fx
            .service
            .complete(started.record_id, "code-1", "203.0.113.9")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignError::DependencyUnavailable { dependency: "auth" }
        ));
        let record = fx.records.find(started.record_id).await.unwrap().unwrap();
        assert_eq!(record.status, ReconfirmationStatus::Pending);
    }
}
