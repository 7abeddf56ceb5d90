//! Callback-driven completion.
//!
//! A callback only records the provider's verdict and, on approval, runs
//! the retrieval pipeline: fetch or produce each signed artifact, attempt
//! long-term-validation enhancement, and settle the job on an aggregate
//! status. Repeat deliveries are no-ops thanks to the status guard.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::breaker::Breakers;
use crate::config::ProviderConfig;
use crate::credential::ServiceCredentialCache;
use crate::error::SignError;
use crate::gateway::{AuthApi, DocumentSignApi, HashSignSdk, LtvApi, UserCredential};
use crate::store::{blob_keys, AuditSink, BlobStore, JobStore};
use crate::types::{DocumentEntry, DocumentStatus, JobStatus, SigningJob};

/// Provider verdict delivered on the document-variant callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Finished,
    Canceled,
    Failed,
    FailedDocuments,
}

impl CallbackOutcome {
    pub fn parse(status: &str) -> Result<Self, SignError> {
        match status {
            "finished" => Ok(Self::Finished),
            "canceled" => Ok(Self::Canceled),
            "failed" => Ok(Self::Failed),
            "failed_documents" => Ok(Self::FailedDocuments),
            other => Err(SignError::Validation(format!(
                "unknown callback status '{other}'"
            ))),
        }
    }

    pub fn as_provider_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::FailedDocuments => "failed_documents",
        }
    }
}

/// User verdict delivered on the hash-variant callback.
#[derive(Debug, Clone)]
pub enum HashApproval {
    /// The user approved; `code` is exchanged for their signing credential.
    Approved { code: String },
    /// The user backed out or the provider refused.
    Denied { reason: String },
}

pub struct CompletionPipeline {
    config: ProviderConfig,
    sign_api: Arc<dyn DocumentSignApi>,
    hash_sdk: Arc<dyn HashSignSdk>,
    ltv: Arc<dyn LtvApi>,
    auth: Arc<dyn AuthApi>,
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    credentials: Arc<ServiceCredentialCache>,
    breakers: Arc<Breakers>,
}

impl CompletionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProviderConfig,
        sign_api: Arc<dyn DocumentSignApi>,
        hash_sdk: Arc<dyn HashSignSdk>,
        ltv: Arc<dyn LtvApi>,
        auth: Arc<dyn AuthApi>,
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        credentials: Arc<ServiceCredentialCache>,
        breakers: Arc<Breakers>,
    ) -> Self {
        Self {
            config,
            sign_api,
            hash_sdk,
            ltv,
            auth,
            jobs,
            blobs,
            audit,
            credentials,
            breakers,
        }
    }

    /// Complete a SINGLE/MULTIPLE job identified by the provider's process
    /// id. Returns the job in its settled state; a job past AWAITING_USER
    /// is returned untouched.
    #[instrument(skip(self), fields(process_id))]
    pub async fn complete_document_job(
        &self,
        process_id: &str,
        outcome: CallbackOutcome,
    ) -> Result<SigningJob, SignError> {
        let mut job = self
            .jobs
            .find_by_process_id(process_id)
            .await?
            .ok_or(SignError::NotFound("signing job"))?;

        if job.status != JobStatus::AwaitingUser {
            info!(job_id = %job.id, status = %job.status, "repeat callback ignored");
            return Ok(job);
        }

        job.transition(JobStatus::CallbackReceived)?;
        job.callback_status = Some(outcome.as_provider_str().to_string());
        self.jobs.update(&job).await?;

        match outcome {
            CallbackOutcome::Canceled => {
                return self
                    .settle(job, JobStatus::Canceled, "user canceled the signing request")
                    .await;
            }
            CallbackOutcome::Failed => {
                return self
                    .settle(job, JobStatus::Failed, "provider reported the process failed")
                    .await;
            }
            CallbackOutcome::FailedDocuments => {
                return self
                    .settle(
                        job,
                        JobStatus::FailedDocuments,
                        "provider reported one or more documents failed",
                    )
                    .await;
            }
            CallbackOutcome::Finished => {}
        }

        job.transition(JobStatus::Completing)?;
        self.jobs.update(&job).await?;

        // A job in COMPLETING has no retry path: repeat callbacks are
        // ignored and the sweeper only touches pre-approval states. Any
        // failure from here on must settle the job, never strand it.
        let credential = match self.credentials.get().await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "service credential unavailable");
                return self
                    .settle(
                        job,
                        JobStatus::Failed,
                        "could not obtain the retrieval credential",
                    )
                    .await;
            }
        };
        let job_id = job.id;
        let mut enhanced = 0usize;

        for entry in &mut job.documents {
            let Some(url) = entry.remote_url.clone() else {
                entry.status = DocumentStatus::Failed;
                entry.error = Some("no remote document reference".into());
                continue;
            };
            let download = self
                .breakers
                .sign_api
                .run(|| async { self.sign_api.download(&url, &credential).await })
                .await;
            match download {
                Ok(bytes) => {
                    if self.store_signed(job_id, entry, &bytes).await {
                        if self.enhance_ltv(job_id, entry.index, &bytes).await {
                            enhanced += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(job_id = %job_id, index = entry.index, error = %err,
                        "signed document retrieval failed");
                    entry.status = DocumentStatus::Failed;
                    entry.error = Some("could not retrieve the signed document".into());
                }
            }
        }

        let job = self.finish(job, enhanced).await?;

        // Remote copies are no longer needed once artifacts are local.
        // Cleanup is best effort and never affects the job outcome.
        for entry in &job.documents {
            if entry.status != DocumentStatus::Signed {
                continue;
            }
            if let Some(url) = &entry.remote_url {
                if let Err(err) = self.sign_api.delete(url, &credential).await {
                    warn!(job_id = %job.id, error = %err, "remote document cleanup failed");
                }
            }
        }

        Ok(job)
    }

    /// Complete the owner's pending hash-variant job.
    #[instrument(skip_all, fields(owner = %owner))]
    pub async fn complete_hash_job(
        &self,
        owner: Uuid,
        approval: HashApproval,
    ) -> Result<SigningJob, SignError> {
        let mut job = self
            .jobs
            .find_awaiting_hash_job(owner)
            .await?
            .ok_or(SignError::NotFound("signing job"))?;

        job.transition(JobStatus::CallbackReceived)?;

        let code = match approval {
            HashApproval::Denied { reason } => {
                job.callback_status = Some(reason);
                self.jobs.update(&job).await?;
                return self
                    .settle(job, JobStatus::Canceled, "user declined the signing request")
                    .await;
            }
            HashApproval::Approved { code } => {
                job.callback_status = Some("finished".into());
                self.jobs.update(&job).await?;
                code
            }
        };

        job.transition(JobStatus::Completing)?;
        self.jobs.update(&job).await?;

        let redirect_uri = self.config.callback_url("/v1/hashsign/callback");
        let credential = match self
            .breakers
            .auth
            .run(|| async { self.auth.exchange_code(&code, &redirect_uri).await })
            .await
        {
            Ok(credential) => credential,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "credential exchange failed");
                return self
                    .settle(job, JobStatus::Failed, "could not obtain the signing credential")
                    .await;
            }
        };

        let sign_identity_id = job.sign_identity_id.clone().unwrap_or_default();
        let job_id = job.id;
        let mut enhanced = 0usize;

        for entry in &mut job.documents {
            let Some(transaction_id) = entry.transaction_id.clone() else {
                entry.status = DocumentStatus::Failed;
                entry.error = Some("no co-process transaction reference".into());
                continue;
            };
            let signed = self
                .signed_bytes(&transaction_id, &sign_identity_id, &credential)
                .await;
            match signed {
                Ok(bytes) => {
                    if self.store_signed(job_id, entry, &bytes).await {
                        if self.enhance_ltv(job_id, entry.index, &bytes).await {
                            enhanced += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(job_id = %job_id, index = entry.index, error = %err,
                        "co-process signing failed");
                    entry.status = DocumentStatus::Failed;
                    entry.error = Some("the document could not be signed".into());
                }
            }
        }

        self.finish(job, enhanced).await
    }

    async fn signed_bytes(
        &self,
        transaction_id: &str,
        sign_identity_id: &str,
        credential: &UserCredential,
    ) -> Result<Vec<u8>, crate::gateway::GatewayError> {
        self.breakers
            .hash_sdk
            .run(|| async {
                self.hash_sdk
                    .sign(transaction_id, sign_identity_id, credential)
                    .await
            })
            .await
    }

    /// Persist one signed artifact and mark the entry accordingly. A blob
    /// write failure counts against the single document, not the whole
    /// job, so the aggregate settles instead of stranding in COMPLETING.
    async fn store_signed(&self, job_id: Uuid, entry: &mut DocumentEntry, bytes: &[u8]) -> bool {
        match self
            .blobs
            .put(
                &blob_keys::signed(job_id, entry.index),
                bytes,
                "application/pdf",
            )
            .await
        {
            Ok(()) => {
                entry.status = DocumentStatus::Signed;
                true
            }
            Err(err) => {
                warn!(job_id = %job_id, index = entry.index, error = %err,
                    "storing signed artifact failed");
                entry.status = DocumentStatus::Failed;
                entry.error = Some("could not store the signed document".into());
                false
            }
        }
    }

    /// Best-effort LTV enhancement. Failure is logged and degrades to the
    /// unenhanced artifact; it never fails the job.
    async fn enhance_ltv(&self, job_id: Uuid, index: usize, signed: &[u8]) -> bool {
        let enhanced = self
            .breakers
            .ltv_rpc
            .run(|| async { self.ltv.enhance(signed).await })
            .await;
        match enhanced {
            Ok(bytes) => {
                match self
                    .blobs
                    .put(
                        &blob_keys::signed_ltv(job_id, index),
                        &bytes,
                        "application/pdf",
                    )
                    .await
                {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(job_id = %job_id, index, error = %err,
                            "storing enhanced artifact failed");
                        false
                    }
                }
            }
            Err(err) => {
                warn!(job_id = %job_id, index, error = %err,
                    "long-term-validation enhancement skipped");
                false
            }
        }
    }

    /// Aggregate per-document outcomes into the job's terminal status.
    async fn finish(&self, mut job: SigningJob, enhanced: usize) -> Result<SigningJob, SignError> {
        let total = job.documents.len();
        let signed = job
            .documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Signed)
            .count();

        let status = if signed == total && total > 0 {
            JobStatus::Signed
        } else if signed > 0 {
            JobStatus::FailedDocuments
        } else {
            JobStatus::Failed
        };
        job.ltv_applied = signed > 0 && enhanced == signed;
        if status != JobStatus::Signed {
            job.error_message = Some("one or more documents failed to complete".into());
        }

        job.transition(status)?;
        self.jobs.update(&job).await?;
        self.audit_outcome(&job).await;
        info!(job_id = %job.id, status = %job.status, ltv = job.ltv_applied, "signing job settled");
        Ok(job)
    }

    /// Settle a job on a terminal status without running the pipeline.
    async fn settle(
        &self,
        mut job: SigningJob,
        status: JobStatus,
        reason: &str,
    ) -> Result<SigningJob, SignError> {
        job.error_message = Some(reason.to_string());
        job.transition(status)?;
        self.jobs.update(&job).await?;
        self.audit_outcome(&job).await;
        info!(job_id = %job.id, status = %job.status, "signing job settled");
        Ok(job)
    }

    async fn audit_outcome(&self, job: &SigningJob) {
        self.audit
            .record(
                Some(job.owner),
                "signing.completed",
                "signing_job",
                &job.id.to_string(),
                serde_json::json!({
                    "status": job.status.as_str(),
                    "ltv_applied": job.ltv_applied,
                    "callback_status": job.callback_status,
                }),
            )
            .await;
    }
}
