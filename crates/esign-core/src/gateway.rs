//! Outbound gateway seams.
//!
//! Every remote surface the orchestrator talks to is a trait here; the
//! adapters crate provides the HTTP/XML implementations and tests provide
//! scripted mocks. All calls return `Result<_, GatewayError>` so the circuit
//! breaker can classify outcomes uniformly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SignError;
use crate::types::Placement;

/// Failure of an outbound dependency call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The dependency answered with a terminal error.
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },

    /// Duplicate transaction id at the signing co-process (HTTP 412).
    /// Retryable by the caller with a fresh id; never trips the breaker.
    #[error("transaction id conflict")]
    Conflict,

    /// The dependency could not be reached, or its circuit is open.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Map to the caller-facing error for a named dependency.
    pub fn into_sign_error(self, dependency: &'static str) -> SignError {
        match self {
            GatewayError::Conflict => SignError::TransactionConflict,
            GatewayError::Remote { .. } | GatewayError::Unavailable(_) => {
                SignError::unavailable(dependency)
            }
        }
    }
}

/// A signing process created at the provider's document signing API.
#[derive(Debug, Clone)]
pub struct CreatedProcess {
    pub process_id: String,
    /// Where the user's browser is sent to approve the signature.
    pub signing_url: String,
    pub documents: Vec<RemoteDocument>,
}

/// One uploaded document as the provider tracks it.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub name: String,
    pub url: String,
}

/// Result of preparing a document at the signing co-process.
#[derive(Debug, Clone)]
pub struct PreparedHash {
    pub transaction_id: String,
    pub sign_identity_id: String,
    /// Hex-encoded SHA-256 digest of the prepared signature field.
    pub digest_hex: String,
}

/// Access token obtained on behalf of the signing user.
#[derive(Debug, Clone)]
pub struct UserCredential {
    pub access_token: String,
    pub expires_in: u64,
}

/// Access token obtained with the service's own client credentials.
#[derive(Debug, Clone)]
pub struct ServiceCredential {
    pub access_token: String,
    pub expires_in: u64,
}

/// Outcome of a seal verification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealVerification {
    pub valid: bool,
    pub result_major: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_minor: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_time: Option<DateTime<Utc>>,
}

/// One document handed to `DocumentSignApi::create_process`.
#[derive(Debug, Clone)]
pub struct UploadDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The provider's document signing API (SINGLE/MULTIPLE variants).
#[async_trait]
pub trait DocumentSignApi: Send + Sync {
    async fn create_process(
        &self,
        documents: &[UploadDocument],
        placement: &Placement,
        callback_url: &str,
    ) -> Result<CreatedProcess, GatewayError>;

    /// Download the signed bytes of one remote document.
    async fn download(
        &self,
        document_url: &str,
        credential: &ServiceCredential,
    ) -> Result<Vec<u8>, GatewayError>;

    /// Remove a document from the provider after completion. Best effort.
    async fn delete(
        &self,
        document_url: &str,
        credential: &ServiceCredential,
    ) -> Result<(), GatewayError>;
}

/// The local signing co-process (HASH variants).
#[async_trait]
pub trait HashSignSdk: Send + Sync {
    async fn prepare(
        &self,
        pdf: &[u8],
        placement_expr: &str,
    ) -> Result<PreparedHash, GatewayError>;

    async fn sign(
        &self,
        transaction_id: &str,
        sign_identity_id: &str,
        credential: &UserCredential,
    ) -> Result<Vec<u8>, GatewayError>;
}

/// The provider's electronic seal RPC.
#[async_trait]
pub trait SealApi: Send + Sync {
    /// Detached PKCS#7 signature over an arbitrary document.
    async fn seal_cades(&self, document: &[u8]) -> Result<Vec<u8>, GatewayError>;

    /// PDF-embedded seal; returns the sealed PDF.
    async fn seal_pades(&self, pdf: &[u8]) -> Result<Vec<u8>, GatewayError>;

    async fn verify_pades(&self, pdf: &[u8]) -> Result<SealVerification, GatewayError>;

    async fn verify_cades(
        &self,
        document: &[u8],
        signature: &[u8],
    ) -> Result<SealVerification, GatewayError>;
}

/// Long-term-validation enhancement RPC. Strictly best effort.
#[async_trait]
pub trait LtvApi: Send + Sync {
    async fn enhance(&self, signed_pdf: &[u8]) -> Result<Vec<u8>, GatewayError>;
}

/// The provider's OAuth surface.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange the callback authorization code for a user token.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<UserCredential, GatewayError>;

    /// Obtain a token with the service's own client credentials.
    async fn client_credentials(&self, scope: &str) -> Result<ServiceCredential, GatewayError>;

    /// Resolve the provider subject behind a user credential (userinfo).
    async fn fetch_subject(&self, credential: &UserCredential) -> Result<String, GatewayError>;
}
