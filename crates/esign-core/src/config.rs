//! Provider and flow configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SignError;

/// Everything needed to address the identity provider and build the
/// redirect URLs the browser flows run through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider base, e.g. `https://id.example.gov`.
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Public base of this service, used to build callback URLs.
    pub app_base_url: String,
    /// Frontend base the user lands on after a flow finishes.
    pub frontend_url: String,
    /// Scope requested for signing flows.
    pub sign_scope: String,
    /// Scope requested for identity re-confirmation.
    pub reconfirm_scope: String,
    /// Scope for the service's client-credentials token.
    pub service_scope: String,
    /// Authentication strength (`acr_values`) demanded for re-confirmation.
    pub reconfirm_acr: String,
    /// Minutes a successful re-confirmation stays valid for route guards.
    pub reconfirm_window_mins: i64,
}

impl ProviderConfig {
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/idshub/authorize", self.base_url.trim_end_matches('/'))
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/idshub/token", self.base_url.trim_end_matches('/'))
    }

    pub fn userinfo_endpoint(&self) -> String {
        format!("{}/idshub/userinfo", self.base_url.trim_end_matches('/'))
    }

    /// Absolute callback URL under this service.
    pub fn callback_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.app_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Frontend result page with query parameters.
    pub fn frontend_result_url(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<String, SignError> {
        let base = format!(
            "{}/{}",
            self.frontend_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&base)
            .map_err(|err| SignError::Validation(format!("bad frontend url: {err}")))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.into())
    }

    /// Provider authorization URL with flow-specific query parameters.
    pub fn authorize_url(&self, params: &[(&str, &str)]) -> Result<String, SignError> {
        let mut url = Url::parse(&self.authorize_endpoint())
            .map_err(|err| SignError::Validation(format!("bad provider base url: {err}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.client_id);
            pairs.extend_pairs(params);
        }
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            base_url: "https://id.example.gov/".into(),
            client_id: "sp_client".into(),
            client_secret: "secret".into(),
            app_base_url: "https://sp.example.com".into(),
            frontend_url: "https://app.example.com/".into(),
            sign_scope: "urn:example:digitalid:profile:general urn:example:sign".into(),
            reconfirm_scope: "openid urn:example:digitalid:profile:general".into(),
            service_scope: "urn:example:digitalid:profile".into(),
            reconfirm_acr: "urn:example:authentication:biometric".into(),
            reconfirm_window_mins: 15,
        }
    }

    #[test]
    fn endpoints_tolerate_trailing_slash() {
        let cfg = config();
        assert_eq!(
            cfg.authorize_endpoint(),
            "https://id.example.gov/idshub/authorize"
        );
        assert_eq!(cfg.token_endpoint(), "https://id.example.gov/idshub/token");
        assert_eq!(
            cfg.callback_url("/v1/signature/callback"),
            "https://sp.example.com/v1/signature/callback"
        );
    }

    #[test]
    fn authorize_url_encodes_parameters() {
        let cfg = config();
        let url = cfg
            .authorize_url(&[("state", "abc123"), ("signProp", "1:[40,60,150,50]")])
            .unwrap();
        assert!(url.starts_with("https://id.example.gov/idshub/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=sp_client"));
        assert!(url.contains("state=abc123"));
        // Brackets must be percent-encoded.
        assert!(url.contains("signProp=1%3A%5B40%2C60%2C150%2C50%5D"));
    }

    #[test]
    fn frontend_url_carries_query() {
        let cfg = config();
        let url = cfg
            .frontend_result_url("/signing/result", &[("job", "j1"), ("status", "SIGNED")])
            .unwrap();
        assert_eq!(
            url,
            "https://app.example.com/signing/result?job=j1&status=SIGNED"
        );
    }
}
