//! In-memory doubles shared by the workflow tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::digest::sha256_hex;
use crate::error::SignError;
use crate::gateway::{
    AuthApi, CreatedProcess, DocumentSignApi, GatewayError, HashSignSdk, PreparedHash,
    RemoteDocument, ServiceCredential, UploadDocument, UserCredential,
};
use crate::store::{AuditSink, BlobStore, JobStore, ReconfirmationStore};
use crate::types::{IdentityReconfirmation, JobStatus, Placement, ReconfirmationStatus, SigningJob};

#[derive(Default)]
pub struct MemJobStore {
    jobs: Mutex<HashMap<Uuid, SigningJob>>,
}

#[async_trait]
impl JobStore for MemJobStore {
    async fn insert(&self, job: &SigningJob) -> Result<(), SignError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &SigningJob) -> Result<(), SignError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SigningJob>, SignError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_by_process_id(&self, process_id: &str) -> Result<Option<SigningJob>, SignError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|j| j.process_id.as_deref() == Some(process_id))
            .cloned())
    }

    async fn find_awaiting_hash_job(&self, owner: Uuid) -> Result<Option<SigningJob>, SignError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| {
                j.owner == owner && j.variant.is_hash() && j.status == JobStatus::AwaitingUser
            })
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, SignError> {
        let mut jobs = self.jobs.lock().await;
        let mut expired = 0;
        for job in jobs.values_mut() {
            let stale = matches!(job.status, JobStatus::Initiated | JobStatus::AwaitingUser)
                && job.expires_at.map(|t| t <= now).unwrap_or(false);
            if stale {
                job.status = JobStatus::Expired;
                job.completed_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn delete_for_owner(&self, owner: Uuid) -> Result<u64, SignError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| j.owner != owner);
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemReconfirmationStore {
    records: Mutex<HashMap<Uuid, IdentityReconfirmation>>,
}

#[async_trait]
impl ReconfirmationStore for MemReconfirmationStore {
    async fn insert(&self, record: &IdentityReconfirmation) -> Result<(), SignError> {
        self.records.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &IdentityReconfirmation) -> Result<(), SignError> {
        self.records.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<IdentityReconfirmation>, SignError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn find_recent_verified(
        &self,
        owner: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<IdentityReconfirmation>, SignError> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .find(|r| {
                r.owner == owner
                    && r.status == ReconfirmationStatus::Verified
                    && r.verified_at.map(|t| t >= cutoff).unwrap_or(false)
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_puts: AtomicBool,
}

impl MemBlobStore {
    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.lock().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), SignError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SignError::Storage("blob store write failed".into()));
        }
        self.blobs.lock().await.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SignError> {
        Ok(self.blobs.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), SignError> {
        self.blobs.lock().await.remove(key);
        Ok(())
    }
}

/// Audit sink that remembers every record for assertions.
#[derive(Default)]
pub struct RecordingAudit {
    pub records: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl RecordingAudit {
    pub async fn actions(&self) -> Vec<String> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(action, _, _)| action.clone())
            .collect()
    }

    pub async fn count_of(&self, action: &str) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|(a, _, _)| a == action)
            .count()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(
        &self,
        _actor: Option<Uuid>,
        action: &str,
        _subject_type: &str,
        subject_id: &str,
        context: serde_json::Value,
    ) {
        self.records
            .lock()
            .await
            .push((action.to_string(), subject_id.to_string(), context));
    }
}

/// Document signing API double. Succeeds unless told to fail; failing
/// documents are selected by name.
#[derive(Default)]
pub struct FakeSignApi {
    pub fail_create: AtomicBool,
    pub fail_downloads_named: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl DocumentSignApi for FakeSignApi {
    async fn create_process(
        &self,
        documents: &[UploadDocument],
        _placement: &Placement,
        _callback_url: &str,
    ) -> Result<CreatedProcess, GatewayError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Remote {
                code: "500".into(),
                message: "process creation failed".into(),
            });
        }
        let process_id = format!("proc-{}", Uuid::new_v4());
        Ok(CreatedProcess {
            signing_url: format!("https://provider.test/sign/{process_id}"),
            documents: documents
                .iter()
                .map(|d| RemoteDocument {
                    name: d.name.clone(),
                    url: format!("https://provider.test/documents/{}", d.name),
                })
                .collect(),
            process_id,
        })
    }

    async fn download(
        &self,
        document_url: &str,
        _credential: &ServiceCredential,
    ) -> Result<Vec<u8>, GatewayError> {
        let failing = self.fail_downloads_named.lock().await;
        if failing.iter().any(|name| document_url.ends_with(name)) {
            return Err(GatewayError::Remote {
                code: "502".into(),
                message: "document unavailable".into(),
            });
        }
        Ok(format!("%PDF-signed:{document_url}").into_bytes())
    }

    async fn delete(
        &self,
        document_url: &str,
        _credential: &ServiceCredential,
    ) -> Result<(), GatewayError> {
        self.deleted.lock().await.push(document_url.to_string());
        Ok(())
    }
}

/// Signing co-process double.
#[derive(Default)]
pub struct FakeHashSdk {
    pub prepare_calls: AtomicU32,
    pub conflict_on_prepare: AtomicBool,
    pub fail_sign_transactions: Mutex<Vec<String>>,
}

#[async_trait]
impl HashSignSdk for FakeHashSdk {
    async fn prepare(
        &self,
        pdf: &[u8],
        _placement_expr: &str,
    ) -> Result<PreparedHash, GatewayError> {
        if self.conflict_on_prepare.load(Ordering::SeqCst) {
            return Err(GatewayError::Conflict);
        }
        let call = self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PreparedHash {
            transaction_id: format!("tx-{call}"),
            sign_identity_id: "identity-1".into(),
            digest_hex: sha256_hex(pdf),
        })
    }

    async fn sign(
        &self,
        transaction_id: &str,
        _sign_identity_id: &str,
        _credential: &UserCredential,
    ) -> Result<Vec<u8>, GatewayError> {
        let failing = self.fail_sign_transactions.lock().await;
        if failing.iter().any(|tx| tx == transaction_id) {
            return Err(GatewayError::Remote {
                code: "500".into(),
                message: "signing failed".into(),
            });
        }
        Ok(format!("%PDF-hash-signed:{transaction_id}").into_bytes())
    }
}

/// Auth double: exchanges any code, returns a fixed subject.
pub struct FakeAuth {
    pub subject: String,
    pub fail: AtomicBool,
}

impl Default for FakeAuth {
    fn default() -> Self {
        Self {
            subject: "subject-1".into(),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuthApi for FakeAuth {
    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<UserCredential, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("auth down".into()));
        }
        Ok(UserCredential {
            access_token: format!("user-token-{code}"),
            expires_in: 3600,
        })
    }

    async fn client_credentials(&self, _scope: &str) -> Result<ServiceCredential, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("auth down".into()));
        }
        Ok(ServiceCredential {
            access_token: "service-token".into(),
            expires_in: 3600,
        })
    }

    async fn fetch_subject(&self, _credential: &UserCredential) -> Result<String, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("auth down".into()));
        }
        Ok(self.subject.clone())
    }
}

/// LTV double: succeeds unless told to fail.
#[derive(Default)]
pub struct FakeLtv {
    pub fail: AtomicBool,
    pub calls: AtomicU32,
}

#[async_trait]
impl crate::gateway::LtvApi for FakeLtv {
    async fn enhance(&self, signed_pdf: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("ltv down".into()));
        }
        let mut out = signed_pdf.to_vec();
        out.extend_from_slice(b"+ltv");
        Ok(out)
    }
}

pub fn test_provider_config() -> crate::config::ProviderConfig {
    crate::config::ProviderConfig {
        base_url: "https://id.provider.test".into(),
        client_id: "sp_test".into(),
        client_secret: "sp_secret".into(),
        app_base_url: "https://sp.test".into(),
        frontend_url: "https://app.test".into(),
        sign_scope: "urn:test:sign".into(),
        reconfirm_scope: "openid urn:test:profile".into(),
        service_scope: "urn:test:profile".into(),
        reconfirm_acr: "urn:test:auth:biometric".into(),
        reconfirm_window_mins: 15,
    }
}

pub fn resident_profile() -> crate::types::SignerProfile {
    crate::types::SignerProfile {
        id: Uuid::new_v4(),
        class: crate::types::IdentityClass::Resident,
        provider_subject: Some("subject-1".into()),
        national_id: Some("784-1987-1234567-1".into()),
        mobile: Some("+971501234567".into()),
        email: Some("resident@example.com".into()),
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
