//! HTTP client for the local signing co-process.
//!
//! The co-process prepares a signature field inside the PDF and returns
//! the digest the user will approve at the provider; after approval it
//! embeds the signature. A duplicate transaction id answers HTTP 412,
//! which surfaces as a retryable conflict.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use esign_core::gateway::{GatewayError, HashSignSdk, PreparedHash, UserCredential};

use crate::http::{default_client, ensure_success, transport_err};

pub struct HttpHashSignSdk {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    transaction_id: String,
    sign_identity_id: String,
    digest: String,
}

impl HttpHashSignSdk {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: default_client(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl HashSignSdk for HttpHashSignSdk {
    async fn prepare(
        &self,
        pdf: &[u8],
        placement_expr: &str,
    ) -> Result<PreparedHash, GatewayError> {
        let form = Form::new()
            .part(
                "file",
                Part::bytes(pdf.to_vec())
                    .file_name("document.pdf")
                    .mime_str("application/pdf")
                    .map_err(transport_err)?,
            )
            .text("signProp", placement_expr.to_string());

        let response = self
            .client
            .post(self.endpoint("start"))
            .multipart(form)
            .send()
            .await
            .map_err(transport_err)?;
        let response = ensure_success(response).await?;
        let started: StartResponse = response.json().await.map_err(transport_err)?;

        debug!(transaction_id = %started.transaction_id, "signature field prepared");
        Ok(PreparedHash {
            transaction_id: started.transaction_id,
            sign_identity_id: started.sign_identity_id,
            digest_hex: started.digest,
        })
    }

    async fn sign(
        &self,
        transaction_id: &str,
        sign_identity_id: &str,
        credential: &UserCredential,
    ) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .client
            .post(self.endpoint("sign"))
            .form(&[
                ("transactionId", transaction_id),
                ("signIdentityId", sign_identity_id),
                ("accessToken", credential.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(transport_err)?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(transport_err)?;
        Ok(bytes.to_vec())
    }
}
