//! HTTP client for the provider's document signing API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use esign_core::credential::ServiceCredentialCache;
use esign_core::gateway::{
    CreatedProcess, DocumentSignApi, GatewayError, RemoteDocument, ServiceCredential,
    UploadDocument,
};
use esign_core::types::Placement;

use crate::http::{default_client, ensure_success, transport_err};

pub struct HttpDocumentSignApi {
    base_url: String,
    client: Client,
    credentials: Arc<ServiceCredentialCache>,
}

#[derive(Deserialize)]
struct ProcessResponse {
    id: String,
    #[serde(rename = "signingUrl")]
    signing_url: String,
    #[serde(default)]
    documents: Vec<DocumentRef>,
}

#[derive(Deserialize)]
struct DocumentRef {
    name: String,
    url: String,
}

impl HttpDocumentSignApi {
    pub fn new(base_url: impl Into<String>, credentials: Arc<ServiceCredentialCache>) -> Self {
        Self {
            base_url: base_url.into(),
            client: default_client(),
            credentials,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn service_token(&self) -> Result<String, GatewayError> {
        let credential = self
            .credentials
            .get()
            .await
            .map_err(|err| GatewayError::Unavailable(err.to_string()))?;
        Ok(credential.access_token)
    }
}

#[async_trait]
impl DocumentSignApi for HttpDocumentSignApi {
    async fn create_process(
        &self,
        documents: &[UploadDocument],
        placement: &Placement,
        callback_url: &str,
    ) -> Result<CreatedProcess, GatewayError> {
        let token = self.service_token().await?;

        let process = serde_json::json!({
            "callbackUrl": callback_url,
            "signatureField": {
                "page": placement.page,
                "x": placement.x,
                "y": placement.y,
                "width": placement.width,
                "height": placement.height,
            },
        });
        let mut form = Form::new().part(
            "process",
            Part::text(process.to_string()).mime_str("application/json").map_err(transport_err)?,
        );
        for document in documents {
            form = form.part(
                "documents",
                Part::bytes(document.bytes.clone())
                    .file_name(document.name.clone())
                    .mime_str("application/pdf")
                    .map_err(transport_err)?,
            );
        }

        let response = self
            .client
            .post(self.endpoint("api/v2/signer_processes"))
            .bearer_auth(&token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_err)?;
        let response = ensure_success(response).await?;
        let process: ProcessResponse = response.json().await.map_err(transport_err)?;

        debug!(process_id = %process.id, "signing process created");
        Ok(CreatedProcess {
            process_id: process.id,
            signing_url: process.signing_url,
            documents: process
                .documents
                .into_iter()
                .map(|d| RemoteDocument {
                    name: d.name,
                    url: d.url,
                })
                .collect(),
        })
    }

    async fn download(
        &self,
        document_url: &str,
        credential: &ServiceCredential,
    ) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/content", document_url.trim_end_matches('/')))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(transport_err)?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(transport_err)?;
        Ok(bytes.to_vec())
    }

    async fn delete(
        &self,
        document_url: &str,
        credential: &ServiceCredential,
    ) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(document_url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(transport_err)?;
        ensure_success(response).await?;
        Ok(())
    }
}
