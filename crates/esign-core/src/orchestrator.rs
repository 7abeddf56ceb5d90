//! Signing initiation.
//!
//! Four variants share one shape: validate everything locally, talk to the
//! remote preparation surface through its breaker, and only then persist a
//! job and hand the caller a redirect URL. A failed initiation leaves no
//! job row behind.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::breaker::Breakers;
use crate::config::ProviderConfig;
use crate::digest::combined_digest;
use crate::error::SignError;
use crate::gateway::{DocumentSignApi, HashSignSdk, UploadDocument};
use crate::store::{blob_keys, AuditSink, BlobStore, JobStore};
use crate::token::{CorrelationTokenStore, FlowKind};
use crate::types::{
    validate_pdf, DocumentEntry, JobStatus, Placement, SignerProfile, SigningJob, SigningVariant,
};

/// A document submitted for signing.
#[derive(Debug, Clone)]
pub struct NamedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A document plus its signature placement, for the hash variants where
/// each document carries its own field position.
#[derive(Debug, Clone)]
pub struct HashDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub placement: Placement,
}

/// What the caller gets back from a successful initiation.
#[derive(Debug, Clone)]
pub struct InitiatedSigning {
    pub job_id: Uuid,
    /// Where to send the user's browser for approval.
    pub redirect_url: String,
}

pub struct Orchestrator {
    config: ProviderConfig,
    sign_api: Arc<dyn DocumentSignApi>,
    hash_sdk: Arc<dyn HashSignSdk>,
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    tokens: Arc<CorrelationTokenStore>,
    breakers: Arc<Breakers>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProviderConfig,
        sign_api: Arc<dyn DocumentSignApi>,
        hash_sdk: Arc<dyn HashSignSdk>,
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        tokens: Arc<CorrelationTokenStore>,
        breakers: Arc<Breakers>,
    ) -> Self {
        Self {
            config,
            sign_api,
            hash_sdk,
            jobs,
            blobs,
            audit,
            tokens,
            breakers,
        }
    }

    /// One document through the provider's signing API.
    #[instrument(skip_all, fields(owner = %profile.id))]
    pub async fn initiate_single(
        &self,
        profile: &SignerProfile,
        document: NamedDocument,
        placement: Placement,
    ) -> Result<InitiatedSigning, SignError> {
        self.initiate_documents(profile, vec![document], placement, SigningVariant::Single)
            .await
    }

    /// A batch of documents through the provider's signing API, one
    /// approval covering all of them.
    #[instrument(skip_all, fields(owner = %profile.id, count = documents.len()))]
    pub async fn initiate_multiple(
        &self,
        profile: &SignerProfile,
        documents: Vec<NamedDocument>,
        placement: Placement,
    ) -> Result<InitiatedSigning, SignError> {
        self.initiate_documents(profile, documents, placement, SigningVariant::Multiple)
            .await
    }

    async fn initiate_documents(
        &self,
        profile: &SignerProfile,
        documents: Vec<NamedDocument>,
        placement: Placement,
        variant: SigningVariant,
    ) -> Result<InitiatedSigning, SignError> {
        profile.may_sign()?;
        if documents.is_empty() {
            return Err(SignError::validation("at least one document is required"));
        }
        placement.validate()?;
        for document in &documents {
            validate_pdf(&document.bytes)?;
        }

        let callback_url = self.config.callback_url("/v1/signature/callback");
        let uploads: Vec<UploadDocument> = documents
            .iter()
            .map(|d| UploadDocument {
                name: d.name.clone(),
                bytes: d.bytes.clone(),
            })
            .collect();

        let created = self
            .breakers
            .sign_api
            .run(|| async {
                self.sign_api
                    .create_process(&uploads, &placement, &callback_url)
                    .await
            })
            .await
            .map_err(|err| err.into_sign_error("sign_api"))?;

        let entries: Vec<DocumentEntry> = documents
            .iter()
            .enumerate()
            .map(|(index, document)| {
                let mut entry = DocumentEntry::pending(index, &document.name);
                entry.remote_url = created
                    .documents
                    .iter()
                    .find(|remote| remote.name == document.name)
                    .map(|remote| remote.url.clone());
                entry.placement = Some(placement.expression());
                entry
            })
            .collect();

        let mut job = SigningJob::new(profile.id, variant, entries);
        job.process_id = Some(created.process_id.clone());
        job.callback_url = Some(callback_url);

        for (index, document) in documents.iter().enumerate() {
            self.blobs
                .put(
                    &blob_keys::unsigned(job.id, index),
                    &document.bytes,
                    "application/pdf",
                )
                .await?;
        }

        job.transition(JobStatus::AwaitingUser)?;
        self.jobs.insert(&job).await?;

        self.audit
            .record(
                Some(profile.id),
                "signing.initiated",
                "signing_job",
                &job.id.to_string(),
                serde_json::json!({
                    "variant": variant.as_str(),
                    "documents": job.document_count(),
                    "process_id": created.process_id,
                }),
            )
            .await;

        info!(job_id = %job.id, variant = variant.as_str(), "signing job initiated");
        Ok(InitiatedSigning {
            job_id: job.id,
            redirect_url: created.signing_url,
        })
    }

    /// One document through the local signing co-process.
    #[instrument(skip_all, fields(owner = %profile.id))]
    pub async fn initiate_hash(
        &self,
        profile: &SignerProfile,
        document: HashDocument,
    ) -> Result<InitiatedSigning, SignError> {
        self.initiate_hash_documents(profile, vec![document], SigningVariant::Hash)
            .await
    }

    /// A batch of documents through the co-process; the user approves one
    /// combined digest covering all of them.
    #[instrument(skip_all, fields(owner = %profile.id, count = documents.len()))]
    pub async fn initiate_hash_bulk(
        &self,
        profile: &SignerProfile,
        documents: Vec<HashDocument>,
    ) -> Result<InitiatedSigning, SignError> {
        self.initiate_hash_documents(profile, documents, SigningVariant::HashBulk)
            .await
    }

    async fn initiate_hash_documents(
        &self,
        profile: &SignerProfile,
        documents: Vec<HashDocument>,
        variant: SigningVariant,
    ) -> Result<InitiatedSigning, SignError> {
        profile.may_sign()?;
        if documents.is_empty() {
            return Err(SignError::validation("at least one document is required"));
        }
        for document in &documents {
            validate_pdf(&document.bytes)?;
            document.placement.validate()?;
        }

        let mut entries = Vec::with_capacity(documents.len());
        let mut digests = Vec::with_capacity(documents.len());
        let mut expressions = Vec::with_capacity(documents.len());
        let mut sign_identity_id = None;

        for (index, document) in documents.iter().enumerate() {
            let expr = document.placement.expression();
            let prepared = self
                .breakers
                .hash_sdk
                .run(|| async { self.hash_sdk.prepare(&document.bytes, &expr).await })
                .await
                .map_err(|err| err.into_sign_error("hash_sdk"))?;

            let mut entry = DocumentEntry::pending(index, &document.name);
            entry.transaction_id = Some(prepared.transaction_id);
            entry.digest = Some(prepared.digest_hex.clone());
            entry.placement = Some(expr.clone());
            entries.push(entry);
            digests.push(prepared.digest_hex);
            expressions.push(expr);
            sign_identity_id.get_or_insert(prepared.sign_identity_id);
        }

        // The user approves one digest: the document's own for a single
        // signing, the order-sensitive combination for a batch.
        let digest_summary = match variant {
            SigningVariant::HashBulk => combined_digest(&digests)?,
            _ => digests[0].clone(),
        };
        let sign_prop = expressions.join("|");
        let sign_identity_id =
            sign_identity_id.ok_or_else(|| SignError::validation("no prepared documents"))?;

        let mut job = SigningJob::new(profile.id, variant, entries);
        job.sign_identity_id = Some(sign_identity_id.clone());
        let callback_url = self.config.callback_url("/v1/hashsign/callback");
        job.callback_url = Some(callback_url.clone());

        for (index, document) in documents.iter().enumerate() {
            self.blobs
                .put(
                    &blob_keys::unsigned(job.id, index),
                    &document.bytes,
                    "application/pdf",
                )
                .await?;
        }

        let state = self
            .tokens
            .issue(FlowKind::HashSign, None, Some(profile.id));
        let redirect_url = self.config.authorize_url(&[
            ("scope", self.config.sign_scope.as_str()),
            ("redirect_uri", callback_url.as_str()),
            ("state", state.as_str()),
            ("digests_summary", digest_summary.as_str()),
            ("digests_summary_algorithm", "SHA256"),
            ("sign_identity_id", sign_identity_id.as_str()),
            ("signProp", sign_prop.as_str()),
        ])?;

        job.transition(JobStatus::AwaitingUser)?;
        self.jobs.insert(&job).await?;

        self.audit
            .record(
                Some(profile.id),
                "signing.initiated",
                "signing_job",
                &job.id.to_string(),
                serde_json::json!({
                    "variant": variant.as_str(),
                    "documents": job.document_count(),
                }),
            )
            .await;

        info!(job_id = %job.id, variant = variant.as_str(), "hash signing job initiated");
        Ok(InitiatedSigning {
            job_id: job.id,
            redirect_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::digest::sha256_hex;
    use crate::testutil::*;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use url::Url;

    struct Fixture {
        orchestrator: Orchestrator,
        jobs: Arc<MemJobStore>,
        blobs: Arc<MemBlobStore>,
        audit: Arc<RecordingAudit>,
        sign_api: Arc<FakeSignApi>,
        hash_sdk: Arc<FakeHashSdk>,
        breakers: Arc<Breakers>,
    }

    fn fixture() -> Fixture {
        let jobs = shared(MemJobStore::default());
        let blobs = shared(MemBlobStore::default());
        let audit = shared(RecordingAudit::default());
        let sign_api = shared(FakeSignApi::default());
        let hash_sdk = shared(FakeHashSdk::default());
        let breakers = shared(Breakers::default());
        let orchestrator = Orchestrator::new(
            test_provider_config(),
            Arc::clone(&sign_api) as _,
            Arc::clone(&hash_sdk) as _,
            Arc::clone(&jobs) as _,
            Arc::clone(&blobs) as _,
            Arc::clone(&audit) as _,
            shared(CorrelationTokenStore::new()),
            Arc::clone(&breakers),
        );
        Fixture {
            orchestrator,
            jobs,
            blobs,
            audit,
            sign_api,
            hash_sdk,
            breakers,
        }
    }

    fn pdf(name: &str) -> NamedDocument {
        NamedDocument {
            name: name.into(),
            bytes: format!("%PDF-1.7 {name}").into_bytes(),
        }
    }

    fn placement() -> Placement {
        Placement {
            page: 1,
            x: 40.0,
            y: 60.0,
            width: 150.0,
            height: 50.0,
        }
    }

    fn query_map(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn single_document_flow_persists_awaiting_job() {
        let fx = fixture();
        let profile = resident_profile();

        let started = fx
            .orchestrator
            .initiate_single(&profile, pdf("contract.pdf"), placement())
            .await
            .unwrap();

        let job = fx.jobs.find(started.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::AwaitingUser);
        assert!(job.process_id.is_some());
        assert_eq!(job.documents.len(), 1);
        assert!(job.documents[0].remote_url.is_some());
        assert!(started.redirect_url.starts_with("https://provider.test/sign/"));
        assert!(fx.blobs.contains(&blob_keys::unsigned(job.id, 0)).await);
        assert_eq!(fx.audit.count_of("signing.initiated").await, 1);
    }

    #[tokio::test]
    async fn failed_process_creation_leaves_no_job_behind() {
        let fx = fixture();
        fx.sign_api.fail_create.store(true, Ordering::SeqCst);

        let err = fx
            .orchestrator
            .initiate_single(&resident_profile(), pdf("a.pdf"), placement())
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::DependencyUnavailable { .. }));
        assert_eq!(fx.audit.count_of("signing.initiated").await, 0);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_touching_the_gateway() {
        let fx = fixture();
        fx.breakers.sign_api.force_state(CircuitState::Open);

        let err = fx
            .orchestrator
            .initiate_single(&resident_profile(), pdf("a.pdf"), placement())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignError::DependencyUnavailable {
                dependency: "sign_api"
            }
        ));
    }

    #[tokio::test]
    async fn visitor_cannot_initiate() {
        let fx = fixture();
        let mut profile = resident_profile();
        profile.class = crate::types::IdentityClass::Visitor;

        let err = fx
            .orchestrator
            .initiate_single(&profile, pdf("a.pdf"), placement())
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::Validation(_)));
    }

    #[tokio::test]
    async fn invalid_pdf_is_rejected_before_any_remote_call() {
        let fx = fixture();
        let bad = HashDocument {
            name: "image.gif".into(),
            bytes: b"GIF89a".to_vec(),
            placement: placement(),
        };

        let err = fx
            .orchestrator
            .initiate_hash(&resident_profile(), bad)
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::Validation(_)));
        assert_eq!(fx.hash_sdk.prepare_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hash_flow_builds_authorize_redirect() {
        let fx = fixture();
        let profile = resident_profile();
        let doc = HashDocument {
            name: "contract.pdf".into(),
            bytes: b"%PDF-1.7 contract".to_vec(),
            placement: placement(),
        };
        let expected_digest = sha256_hex(&doc.bytes);

        let started = fx.orchestrator.initiate_hash(&profile, doc).await.unwrap();

        let params = query_map(&started.redirect_url);
        assert_eq!(params["digests_summary"], expected_digest);
        assert_eq!(params["digests_summary_algorithm"], "SHA256");
        assert_eq!(params["sign_identity_id"], "identity-1");
        assert_eq!(params["signProp"], "1:[40,60,150,50]");
        assert!(!params["state"].is_empty());

        let job = fx.jobs.find(started.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::AwaitingUser);
        assert_eq!(job.sign_identity_id.as_deref(), Some("identity-1"));
        assert!(job.documents[0].transaction_id.is_some());
    }

    #[tokio::test]
    async fn bulk_flow_combines_digests_in_order() {
        let fx = fixture();
        let docs: Vec<HashDocument> = ["a", "b", "c"]
            .iter()
            .map(|n| HashDocument {
                name: format!("{n}.pdf"),
                bytes: format!("%PDF-1.7 {n}").into_bytes(),
                placement: placement(),
            })
            .collect();
        let digests: Vec<String> = docs.iter().map(|d| sha256_hex(&d.bytes)).collect();
        let expected = combined_digest(&digests).unwrap();

        let started = fx
            .orchestrator
            .initiate_hash_bulk(&resident_profile(), docs)
            .await
            .unwrap();

        let params = query_map(&started.redirect_url);
        assert_eq!(params["digests_summary"], expected);
        assert_eq!(
            params["signProp"],
            "1:[40,60,150,50]|1:[40,60,150,50]|1:[40,60,150,50]"
        );

        let job = fx.jobs.find(started.job_id).await.unwrap().unwrap();
        assert_eq!(job.documents.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_transaction_id_is_a_retryable_conflict() {
        let fx = fixture();
        fx.hash_sdk.conflict_on_prepare.store(true, Ordering::SeqCst);
        let doc = HashDocument {
            name: "a.pdf".into(),
            bytes: b"%PDF-1.7 a".to_vec(),
            placement: placement(),
        };

        let err = fx
            .orchestrator
            .initiate_hash(&resident_profile(), doc)
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::TransactionConflict));
        // Conflicts never count against the breaker.
        assert_eq!(fx.breakers.hash_sdk.state(), CircuitState::Closed);
    }
}
