//! In-memory stores for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use esign_core::seal::SealJob;
use esign_core::store::{AuditSink, BlobStore, JobStore, ReconfirmationStore, SealJobStore};
use esign_core::types::{IdentityReconfirmation, JobStatus, ReconfirmationStatus, SigningJob};
use esign_core::SignError;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, SigningJob>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &SigningJob) -> Result<(), SignError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &SigningJob) -> Result<(), SignError> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains_key(&job.id) {
            return Err(SignError::NotFound("signing job"));
        }
        jobs.insert(job.id, job.clone());
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
            .find(|job| job.process_id.as_deref() == Some(process_id))
            .cloned())
    }

    async fn find_awaiting_hash_job(&self, owner: Uuid) -> Result<Option<SigningJob>, SignError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| {
                job.owner == owner
                    && job.variant.is_hash()
                    && job.status == JobStatus::AwaitingUser
            })
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, SignError> {
        let mut jobs = self.jobs.lock().await;
        let mut expired = 0;
        for job in jobs.values_mut() {
            let overdue = matches!(job.status, JobStatus::Initiated | JobStatus::AwaitingUser)
                && job.expires_at.map(|at| at <= now).unwrap_or(false);
            if overdue {
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
        jobs.retain(|_, job| job.owner != owner);
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryReconfirmationStore {
    records: Mutex<HashMap<Uuid, IdentityReconfirmation>>,
}

#[async_trait]
impl ReconfirmationStore for MemoryReconfirmationStore {
    async fn insert(&self, record: &IdentityReconfirmation) -> Result<(), SignError> {
        self.records.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &IdentityReconfirmation) -> Result<(), SignError> {
        let mut records = self.records.lock().await;
        if !records.contains_key(&record.id) {
            return Err(SignError::NotFound("re-confirmation record"));
        }
        records.insert(record.id, record.clone());
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
            .filter(|record| {
                record.owner == owner
                    && record.status == ReconfirmationStatus::Verified
                    && record.verified_at.map(|at| at >= cutoff).unwrap_or(false)
            })
            .max_by_key(|record| record.verified_at)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemorySealJobStore {
    jobs: Mutex<HashMap<Uuid, SealJob>>,
}

#[async_trait]
impl SealJobStore for MemorySealJobStore {
    async fn insert(&self, job: &SealJob) -> Result<(), SignError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SealJob>, SignError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), SignError> {
        self.blobs
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
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

/// Audit sink that emits structured log lines. Used when no database is
/// configured; the Postgres sink supersedes it in production.
#[derive(Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(
        &self,
        actor: Option<Uuid>,
        action: &str,
        subject_type: &str,
        subject_id: &str,
        context: serde_json::Value,
    ) {
        info!(
            actor = actor.map(|a| a.to_string()),
            action,
            subject_type,
            subject_id,
            context = %context,
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esign_core::types::SigningVariant;

    #[tokio::test]
    async fn update_requires_an_existing_job() {
        let store = MemoryJobStore::default();
        let job = SigningJob::new(Uuid::new_v4(), SigningVariant::Single, vec![]);
        assert!(matches!(
            store.update(&job).await,
            Err(SignError::NotFound(_))
        ));
        store.insert(&job).await.unwrap();
        assert!(store.update(&job).await.is_ok());
    }

    #[tokio::test]
    async fn awaiting_hash_lookup_skips_document_variants() {
        let store = MemoryJobStore::default();
        let owner = Uuid::new_v4();

        let mut doc_job = SigningJob::new(owner, SigningVariant::Single, vec![]);
        doc_job.transition(JobStatus::AwaitingUser).unwrap();
        store.insert(&doc_job).await.unwrap();

        let mut hash_job = SigningJob::new(owner, SigningVariant::Hash, vec![]);
        hash_job.transition(JobStatus::AwaitingUser).unwrap();
        store.insert(&hash_job).await.unwrap();

        let found = store.find_awaiting_hash_job(owner).await.unwrap().unwrap();
        assert_eq!(found.id, hash_job.id);
    }

    #[tokio::test]
    async fn delete_for_owner_erases_only_that_owner() {
        let store = MemoryJobStore::default();
        let owner = Uuid::new_v4();
        store
            .insert(&SigningJob::new(owner, SigningVariant::Hash, vec![]))
            .await
            .unwrap();
        store
            .insert(&SigningJob::new(Uuid::new_v4(), SigningVariant::Hash, vec![]))
            .await
            .unwrap();

        assert_eq!(store.delete_for_owner(owner).await.unwrap(), 1);
    }
}
