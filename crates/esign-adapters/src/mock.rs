//! Deterministic mock gateways for local runs and service tests.
//!
//! They simulate the provider surfaces without any network: process ids
//! and transactions are generated locally and the "signed" artifacts are
//! derived from the input bytes.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use esign_core::digest::sha256_hex;
use esign_core::gateway::{
    AuthApi, CreatedProcess, DocumentSignApi, GatewayError, HashSignSdk, LtvApi, PreparedHash,
    RemoteDocument, SealApi, SealVerification, ServiceCredential, UploadDocument, UserCredential,
};
use esign_core::types::Placement;

pub const MOCK_SUBJECT: &str = "mock-subject";

#[derive(Debug, Clone, Default)]
pub struct MockDocumentSignApi;

#[async_trait]
impl DocumentSignApi for MockDocumentSignApi {
    async fn create_process(
        &self,
        documents: &[UploadDocument],
        _placement: &Placement,
        _callback_url: &str,
    ) -> Result<CreatedProcess, GatewayError> {
        let process_id = format!("mock-{}", Uuid::new_v4());
        Ok(CreatedProcess {
            signing_url: format!("https://provider.invalid/sign/{process_id}"),
            documents: documents
                .iter()
                .map(|d| RemoteDocument {
                    name: d.name.clone(),
                    url: format!("https://provider.invalid/documents/{process_id}/{}", d.name),
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
        Ok(format!("%PDF-1.7 mock-signed {document_url}").into_bytes())
    }

    async fn delete(
        &self,
        _document_url: &str,
        _credential: &ServiceCredential,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockHashSignSdk;

#[async_trait]
impl HashSignSdk for MockHashSignSdk {
    async fn prepare(
        &self,
        pdf: &[u8],
        _placement_expr: &str,
    ) -> Result<PreparedHash, GatewayError> {
        Ok(PreparedHash {
            transaction_id: format!("mock-tx-{}", Uuid::new_v4()),
            sign_identity_id: "mock-identity".into(),
            digest_hex: sha256_hex(pdf),
        })
    }

    async fn sign(
        &self,
        transaction_id: &str,
        _sign_identity_id: &str,
        _credential: &UserCredential,
    ) -> Result<Vec<u8>, GatewayError> {
        Ok(format!("%PDF-1.7 mock-hash-signed {transaction_id}").into_bytes())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockAuthApi;

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<UserCredential, GatewayError> {
        Ok(UserCredential {
            access_token: format!("mock-user-token-{code}"),
            expires_in: 3600,
        })
    }

    async fn client_credentials(&self, _scope: &str) -> Result<ServiceCredential, GatewayError> {
        Ok(ServiceCredential {
            access_token: "mock-service-token".into(),
            expires_in: 3600,
        })
    }

    async fn fetch_subject(&self, _credential: &UserCredential) -> Result<String, GatewayError> {
        Ok(MOCK_SUBJECT.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockSealApi;

#[async_trait]
impl SealApi for MockSealApi {
    async fn seal_cades(&self, document: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Ok([b"mock-p7s:" as &[u8], sha256_hex(document).as_bytes()].concat())
    }

    async fn seal_pades(&self, pdf: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Ok([pdf, b"+mock-seal"].concat())
    }

    async fn verify_pades(&self, _pdf: &[u8]) -> Result<SealVerification, GatewayError> {
        Ok(valid_verification())
    }

    async fn verify_cades(
        &self,
        _document: &[u8],
        _signature: &[u8],
    ) -> Result<SealVerification, GatewayError> {
        Ok(valid_verification())
    }
}

fn valid_verification() -> SealVerification {
    SealVerification {
        valid: true,
        result_major: "urn:oasis:names:tc:dss:1.0:resultmajor:Success".into(),
        result_minor: Some("urn:provider:verify:valid:signature:OnAllDocuments".into()),
        message: "signature valid on all documents".into(),
        signer: Some("CN=Mock Org".into()),
        signing_time: Some(Utc::now()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockLtvApi;

#[async_trait]
impl LtvApi for MockLtvApi {
    async fn enhance(&self, signed_pdf: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Ok([signed_pdf, b"+ltv"].concat())
    }
}
