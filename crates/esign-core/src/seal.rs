//! Electronic seals.
//!
//! Sealing runs under the organization's certificate rather than a user's,
//! so there is no browser flow: one breaker-protected RPC per request.
//! Verification reports unavailability as an invalid-with-reason result
//! instead of an error, so document checks degrade readably.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::breaker::Breakers;
use crate::error::SignError;
use crate::gateway::{GatewayError, SealApi, SealVerification};
use crate::store::{blob_keys, AuditSink, BlobStore, SealJobStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SealType {
    /// Detached PKCS#7 signature over arbitrary bytes.
    Cades,
    /// Seal embedded into the PDF itself.
    Pades,
}

impl SealType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cades => "CADES",
            Self::Pades => "PADES",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SignError> {
        match value {
            "CADES" => Ok(Self::Cades),
            "PADES" => Ok(Self::Pades),
            other => Err(SignError::Storage(format!(
                "unknown seal type '{other}' in storage"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SealJobStatus {
    Sealed,
    Failed,
}

impl SealJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sealed => "SEALED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SignError> {
        match value {
            "SEALED" => Ok(Self::Sealed),
            "FAILED" => Ok(Self::Failed),
            other => Err(SignError::Storage(format!(
                "unknown seal status '{other}' in storage"
            ))),
        }
    }
}

/// Persistent record of one sealing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealJob {
    pub id: Uuid,
    pub requested_by: Option<Uuid>,
    pub seal_type: SealType,
    pub status: SealJobStatus,
    pub error_message: Option<String>,
    pub input_key: String,
    pub output_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A successful seal: the persisted job plus the produced bytes.
#[derive(Debug, Clone)]
pub struct SealedArtifact {
    pub job: SealJob,
    pub bytes: Vec<u8>,
}

pub struct SealService {
    seal: Arc<dyn SealApi>,
    jobs: Arc<dyn SealJobStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    breakers: Arc<Breakers>,
}

impl SealService {
    pub fn new(
        seal: Arc<dyn SealApi>,
        jobs: Arc<dyn SealJobStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        breakers: Arc<Breakers>,
    ) -> Self {
        Self {
            seal,
            jobs,
            blobs,
            audit,
            breakers,
        }
    }

    /// Detached seal over arbitrary document bytes.
    #[instrument(skip_all)]
    pub async fn seal_cades(
        &self,
        document: &[u8],
        requested_by: Option<Uuid>,
    ) -> Result<SealedArtifact, SignError> {
        if document.is_empty() {
            return Err(SignError::validation("document is empty"));
        }
        let id = Uuid::new_v4();
        let input_key = blob_keys::seal_input(id);
        self.blobs
            .put(&input_key, document, "application/octet-stream")
            .await?;

        let result = self
            .breakers
            .seal_rpc
            .run(|| async { self.seal.seal_cades(document).await })
            .await;
        self.settle(
            id,
            requested_by,
            SealType::Cades,
            input_key,
            blob_keys::seal_output(id),
            "application/pkcs7-signature",
            result,
        )
        .await
    }

    /// Seal embedded into the PDF.
    #[instrument(skip_all)]
    pub async fn seal_pades(
        &self,
        pdf: &[u8],
        requested_by: Option<Uuid>,
    ) -> Result<SealedArtifact, SignError> {
        crate::types::validate_pdf(pdf)?;
        let id = Uuid::new_v4();
        let input_key = blob_keys::seal_input(id);
        self.blobs.put(&input_key, pdf, "application/pdf").await?;

        let result = self
            .breakers
            .seal_rpc
            .run(|| async { self.seal.seal_pades(pdf).await })
            .await;
        self.settle(
            id,
            requested_by,
            SealType::Pades,
            input_key,
            blob_keys::seal_pdf(id),
            "application/pdf",
            result,
        )
        .await
    }

    /// Verify an embedded PDF seal. Unreachable verification reports an
    /// invalid result with a reason rather than failing the call.
    pub async fn verify_pades(&self, pdf: &[u8]) -> Result<SealVerification, SignError> {
        crate::types::validate_pdf(pdf)?;
        let result = self
            .breakers
            .seal_rpc
            .run(|| async { self.seal.verify_pades(pdf).await })
            .await;
        Ok(Self::verification_or_reason(result))
    }

    /// Verify a detached signature against its document.
    pub async fn verify_cades(
        &self,
        document: &[u8],
        signature: &[u8],
    ) -> Result<SealVerification, SignError> {
        if document.is_empty() || signature.is_empty() {
            return Err(SignError::validation(
                "both document and signature are required",
            ));
        }
        let result = self
            .breakers
            .seal_rpc
            .run(|| async { self.seal.verify_cades(document, signature).await })
            .await;
        Ok(Self::verification_or_reason(result))
    }

    fn verification_or_reason(
        result: Result<SealVerification, GatewayError>,
    ) -> SealVerification {
        match result {
            Ok(verification) => verification,
            Err(err) => {
                warn!(error = %err, "seal verification unavailable");
                SealVerification {
                    valid: false,
                    result_major: "urn:verification:unavailable".into(),
                    result_minor: None,
                    message: "verification service is temporarily unavailable".into(),
                    signer: None,
                    signing_time: None,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        id: Uuid,
        requested_by: Option<Uuid>,
        seal_type: SealType,
        input_key: String,
        output_key: String,
        content_type: &str,
        result: Result<Vec<u8>, GatewayError>,
    ) -> Result<SealedArtifact, SignError> {
        let mut job = SealJob {
            id,
            requested_by,
            seal_type,
            status: SealJobStatus::Failed,
            error_message: None,
            input_key,
            output_key: None,
            created_at: Utc::now(),
        };

        match result {
            Ok(bytes) => {
                self.blobs.put(&output_key, &bytes, content_type).await?;
                job.status = SealJobStatus::Sealed;
                job.output_key = Some(output_key);
                self.jobs.insert(&job).await?;
                self.record(&job).await;
                info!(seal_id = %job.id, seal_type = seal_type.as_str(), "document sealed");
                Ok(SealedArtifact { job, bytes })
            }
            Err(err) => {
                job.error_message = Some("sealing service did not produce a signature".into());
                self.jobs.insert(&job).await?;
                self.record(&job).await;
                warn!(seal_id = %job.id, error = %err, "sealing failed");
                Err(err.into_sign_error("seal_rpc"))
            }
        }
    }

    async fn record(&self, job: &SealJob) {
        self.audit
            .record(
                job.requested_by,
                "seal.requested",
                "seal_job",
                &job.id.to_string(),
                serde_json::json!({
                    "seal_type": job.seal_type.as_str(),
                    "status": job.status.as_str(),
                }),
            )
            .await;
    }
}
