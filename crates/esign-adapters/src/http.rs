//! Shared plumbing for the reqwest-based gateways.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use esign_core::gateway::GatewayError;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn default_client() -> Client {
    // Construction only fails on a broken TLS backend; a client without
    // the timeout budget must never be handed out silently.
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("http client construction failed")
}

/// Transport-level failures (refused, DNS, timeout) are unavailability,
/// not remote verdicts.
pub(crate) fn transport_err(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

/// Turn a non-2xx response into the matching gateway error. Bodies are
/// truncated; they are for operators, not for parsing.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::PRECONDITION_FAILED {
        return Err(GatewayError::Conflict);
    }
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(512);
    Err(GatewayError::Remote {
        code: status.as_u16().to_string(),
        message: body,
    })
}
