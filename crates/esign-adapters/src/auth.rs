//! HTTP client for the provider's OAuth surface.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use esign_core::config::ProviderConfig;
use esign_core::gateway::{AuthApi, GatewayError, ServiceCredential, UserCredential};

use crate::http::{default_client, ensure_success, transport_err};

pub struct HttpAuthApi {
    config: ProviderConfig,
    client: Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    300
}

#[derive(Deserialize)]
struct UserInfo {
    /// Subject identifier; some deployments expose it as `uuid` instead.
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
}

impl HttpAuthApi {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: default_client(),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, GatewayError> {
        let response = self
            .client
            .post(self.config.token_endpoint())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await
            .map_err(transport_err)?;
        let response = ensure_success(response).await?;
        response.json().await.map_err(transport_err)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<UserCredential, GatewayError> {
        let token = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;
        debug!("authorization code exchanged");
        Ok(UserCredential {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    async fn client_credentials(&self, scope: &str) -> Result<ServiceCredential, GatewayError> {
        let token = self
            .token_request(&[("grant_type", "client_credentials"), ("scope", scope)])
            .await?;
        debug!("service credential obtained");
        Ok(ServiceCredential {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    async fn fetch_subject(&self, credential: &UserCredential) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(self.config.userinfo_endpoint())
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(transport_err)?;
        let response = ensure_success(response).await?;
        let info: UserInfo = response.json().await.map_err(transport_err)?;
        info.uuid
            .or(info.sub)
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| GatewayError::Remote {
                code: "userinfo".into(),
                message: "userinfo response carried no subject".into(),
            })
    }
}
