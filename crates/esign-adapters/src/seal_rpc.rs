//! XML RPC clients for the electronic seal and LTV enhancement services.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use esign_core::gateway::{GatewayError, LtvApi, SealApi, SealVerification};

use crate::envelope::{build_envelope, describe_minor, parse_envelope, RpcRequest, RpcResponse};
use crate::http::{default_client, ensure_success, transport_err};

const PROFILE_CADES: &str = "urn:provider:seal:cades";
const PROFILE_PADES: &str = "urn:provider:seal:pades";
const PROFILE_LTV: &str = "urn:provider:signature:ltv";

/// Connection details shared by the seal and LTV clients.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub username: String,
    pub password: String,
}

pub struct HttpSealApi {
    endpoint: RpcEndpoint,
    client: Client,
}

impl HttpSealApi {
    pub fn new(endpoint: RpcEndpoint) -> Self {
        Self {
            endpoint,
            client: default_client(),
        }
    }

    async fn call(&self, request: &RpcRequest<'_>) -> Result<RpcResponse, GatewayError> {
        call_rpc(&self.client, &self.endpoint, request).await
    }

    fn seal_bytes(response: RpcResponse) -> Result<Vec<u8>, GatewayError> {
        if !response.is_success() {
            return Err(remote_failure(&response));
        }
        response
            .signature_bytes()?
            .or(response.document_bytes()?)
            .ok_or_else(|| GatewayError::Remote {
                code: "seal".into(),
                message: "seal response carried no signature".into(),
            })
    }
}

async fn call_rpc(
    client: &Client,
    endpoint: &RpcEndpoint,
    request: &RpcRequest<'_>,
) -> Result<RpcResponse, GatewayError> {
    let envelope = build_envelope(&endpoint.username, &endpoint.password, request)?;
    let response = client
        .post(&endpoint.url)
        .header("content-type", "text/xml; charset=utf-8")
        .body(envelope)
        .send()
        .await
        .map_err(transport_err)?;
    let response = ensure_success(response).await?;
    let body = response.text().await.map_err(transport_err)?;
    parse_envelope(&body)
}

fn remote_failure(response: &RpcResponse) -> GatewayError {
    GatewayError::Remote {
        code: response
            .result_minor
            .clone()
            .or_else(|| response.result_major.clone())
            .unwrap_or_else(|| "unknown".into()),
        message: response
            .result_message
            .clone()
            .unwrap_or_else(|| "sealing service reported a failure".into()),
    }
}

fn verification_from(response: RpcResponse) -> SealVerification {
    let valid = response.is_success()
        && response
            .result_minor
            .as_deref()
            .map(|minor| minor.contains(":valid:"))
            .unwrap_or(false);
    SealVerification {
        valid,
        result_major: response.result_major.clone().unwrap_or_default(),
        message: response
            .result_message
            .clone()
            .unwrap_or_else(|| describe_minor(response.result_minor.as_deref())),
        result_minor: response.result_minor,
        signer: response.signer_identity,
        signing_time: response.signing_time,
    }
}

#[async_trait]
impl SealApi for HttpSealApi {
    async fn seal_cades(&self, document: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .call(&RpcRequest {
                operation: "SignRequest",
                profile: PROFILE_CADES,
                documents: &[("Document", document)],
            })
            .await?;
        debug!("detached seal produced");
        Self::seal_bytes(response)
    }

    async fn seal_pades(&self, pdf: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .call(&RpcRequest {
                operation: "SignRequest",
                profile: PROFILE_PADES,
                documents: &[("Document", pdf)],
            })
            .await?;
        debug!("embedded seal produced");
        Self::seal_bytes(response)
    }

    async fn verify_pades(&self, pdf: &[u8]) -> Result<SealVerification, GatewayError> {
        let response = self
            .call(&RpcRequest {
                operation: "VerifyRequest",
                profile: PROFILE_PADES,
                documents: &[("Document", pdf)],
            })
            .await?;
        Ok(verification_from(response))
    }

    async fn verify_cades(
        &self,
        document: &[u8],
        signature: &[u8],
    ) -> Result<SealVerification, GatewayError> {
        let response = self
            .call(&RpcRequest {
                operation: "VerifyRequest",
                profile: PROFILE_CADES,
                documents: &[("Document", document), ("Signature", signature)],
            })
            .await?;
        Ok(verification_from(response))
    }
}

pub struct HttpLtvApi {
    endpoint: RpcEndpoint,
    client: Client,
}

impl HttpLtvApi {
    pub fn new(endpoint: RpcEndpoint) -> Self {
        Self {
            endpoint,
            client: default_client(),
        }
    }
}

#[async_trait]
impl LtvApi for HttpLtvApi {
    async fn enhance(&self, signed_pdf: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let response = call_rpc(
            &self.client,
            &self.endpoint,
            &RpcRequest {
                operation: "UpdateSignatureRequest",
                profile: PROFILE_LTV,
                documents: &[("Document", signed_pdf)],
            },
        )
        .await?;
        if !response.is_success() {
            return Err(remote_failure(&response));
        }
        response
            .document_bytes()?
            .ok_or_else(|| GatewayError::Remote {
                code: "ltv".into(),
                message: "enhancement response carried no document".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(major: &str, minor: Option<&str>) -> RpcResponse {
        RpcResponse {
            result_major: Some(major.into()),
            result_minor: minor.map(Into::into),
            ..RpcResponse::default()
        }
    }

    #[test]
    fn verification_requires_success_and_valid_minor() {
        let ok = verification_from(response(
            "urn:oasis:names:tc:dss:1.0:resultmajor:Success",
            Some("urn:provider:verify:valid:signature:OnAllDocuments"),
        ));
        assert!(ok.valid);

        let wrong_minor = verification_from(response(
            "urn:oasis:names:tc:dss:1.0:resultmajor:Success",
            Some("urn:provider:verify:invalid:IncorrectSignature"),
        ));
        assert!(!wrong_minor.valid);

        let failed_major = verification_from(response(
            "urn:oasis:names:tc:dss:1.0:resultmajor:RequesterError",
            Some("urn:provider:verify:valid:signature:OnAllDocuments"),
        ));
        assert!(!failed_major.valid);
    }

    #[test]
    fn remote_failure_prefers_minor_code() {
        let err = remote_failure(&response(
            "urn:oasis:names:tc:dss:1.0:resultmajor:ResponderError",
            Some("urn:provider:seal:internal"),
        ));
        match err {
            GatewayError::Remote { code, .. } => assert_eq!(code, "urn:provider:seal:internal"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
