//! Persistence seams.
//!
//! The core crate owns the traits; the adapters crate owns the Postgres,
//! filesystem, and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SignError;
use crate::seal::SealJob;
use crate::types::{IdentityReconfirmation, SigningJob};

/// Persistent signing jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &SigningJob) -> Result<(), SignError>;

    async fn update(&self, job: &SigningJob) -> Result<(), SignError>;

    async fn find(&self, id: Uuid) -> Result<Option<SigningJob>, SignError>;

    /// Look up by the provider-issued process id (document-variant callbacks
    /// carry only this).
    async fn find_by_process_id(&self, process_id: &str) -> Result<Option<SigningJob>, SignError>;

    /// The owner's most recent hash-variant job still awaiting the user.
    /// Hash callbacks carry no job reference, only the owner via the
    /// correlation token.
    async fn find_awaiting_hash_job(&self, owner: Uuid) -> Result<Option<SigningJob>, SignError>;

    /// Mark INITIATED/AWAITING_USER jobs past their deadline as EXPIRED.
    /// Returns the number of jobs expired.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, SignError>;

    /// Compliance erasure hook: drop every job belonging to `owner`.
    async fn delete_for_owner(&self, owner: Uuid) -> Result<u64, SignError>;
}

/// Persistent identity re-confirmation attempts.
#[async_trait]
pub trait ReconfirmationStore: Send + Sync {
    async fn insert(&self, record: &IdentityReconfirmation) -> Result<(), SignError>;

    async fn update(&self, record: &IdentityReconfirmation) -> Result<(), SignError>;

    async fn find(&self, id: Uuid) -> Result<Option<IdentityReconfirmation>, SignError>;

    /// A VERIFIED record for `owner` with `verified_at >= cutoff`, if any.
    async fn find_recent_verified(
        &self,
        owner: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<IdentityReconfirmation>, SignError>;
}

/// Persistent electronic-seal jobs.
#[async_trait]
pub trait SealJobStore: Send + Sync {
    async fn insert(&self, job: &SealJob) -> Result<(), SignError>;

    async fn find(&self, id: Uuid) -> Result<Option<SealJob>, SignError>;
}

/// Artifact storage. Keys are opaque relative paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), SignError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SignError>;

    async fn delete(&self, key: &str) -> Result<(), SignError>;
}

/// Blob key conventions shared by the orchestrator and the download route.
pub mod blob_keys {
    use uuid::Uuid;

    pub fn unsigned(job: Uuid, index: usize) -> String {
        format!("unsigned/{job}_{index}.pdf")
    }

    pub fn signed(job: Uuid, index: usize) -> String {
        format!("signed/{job}_{index}.pdf")
    }

    pub fn signed_ltv(job: Uuid, index: usize) -> String {
        format!("signed-ltv/{job}_{index}.pdf")
    }

    pub fn seal_input(id: Uuid) -> String {
        format!("seal/{id}.bin")
    }

    pub fn seal_output(id: Uuid) -> String {
        format!("seal/{id}.p7s")
    }

    pub fn seal_pdf(id: Uuid) -> String {
        format!("seal/{id}.pdf")
    }
}

/// Append-only audit trail. Failures must be swallowed by the
/// implementation, never surfaced to business flows.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        actor: Option<Uuid>,
        action: &str,
        subject_type: &str,
        subject_id: &str,
        context: serde_json::Value,
    );
}
