//! REST surface for the signing-workflow orchestrator.
//!
//! Browser-facing callbacks answer immediately and push the heavy
//! completion work onto the bounded worker pool; JSON endpoints carry the
//! initiate/status/download/verify API. The caller's identity arrives as a
//! trusted `x-signer-profile` header injected by the session layer.

#![deny(unsafe_code)]

pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use esign_adapters::{
    FsBlobStore, HttpAuthApi, HttpDocumentSignApi, HttpHashSignSdk, HttpLtvApi, HttpSealApi,
    MemoryBlobStore, MockAuthApi, MockDocumentSignApi, MockHashSignSdk, MockLtvApi, MockSealApi,
    RpcEndpoint, StorageConfig, Stores,
};
use esign_core::completion::{CallbackOutcome, CompletionPipeline, HashApproval};
use esign_core::gateway::{AuthApi, DocumentSignApi, HashSignSdk, LtvApi, SealApi};
use esign_core::orchestrator::{HashDocument, NamedDocument, Orchestrator};
use esign_core::reconfirm::ReconfirmationService;
use esign_core::seal::SealService;
use esign_core::store::{BlobStore, JobStore, ReconfirmationStore};
use esign_core::{
    blob_keys, BreakerConfig, Breakers, CorrelationTokenStore, DocumentStatus, FlowKind, HintKind,
    JobStatus, Placement, ProviderConfig, ServiceCredentialCache, SignError, SignerProfile,
    SigningJob,
};
use worker::{CompletionQueue, CompletionTask, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

pub const SIGNER_PROFILE_HEADER: &str = "x-signer-profile";

/// Which gateway implementations a service instance talks through.
#[derive(Debug, Clone)]
pub enum GatewayConfig {
    /// Local deterministic mocks, no network.
    Mock,
    Http {
        sign_api_url: String,
        hash_sdk_url: String,
        seal: RpcEndpoint,
        ltv: RpcEndpoint,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub gateways: GatewayConfig,
    /// Artifact directory; in-memory blobs when absent.
    pub blob_root: Option<PathBuf>,
    pub queue_capacity: usize,
    pub workers: usize,
    pub breaker: BreakerConfig,
}

impl ServiceConfig {
    /// All-local configuration: memory stores, mock gateways.
    pub fn local(provider: ProviderConfig) -> Self {
        Self {
            provider,
            storage: StorageConfig::Memory,
            gateways: GatewayConfig::Mock,
            blob_root: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub provider: ProviderConfig,
    pub jobs: Arc<dyn JobStore>,
    pub reconfirmations: Arc<dyn ReconfirmationStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub tokens: Arc<CorrelationTokenStore>,
    pub breakers: Arc<Breakers>,
    pub orchestrator: Arc<Orchestrator>,
    pub reconfirm: Arc<ReconfirmationService>,
    pub seal: Arc<SealService>,
    pub queue: CompletionQueue,
    storage_label: &'static str,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, SignError> {
        let storage_label = config.storage.label();
        let stores = Stores::bootstrap(config.storage).await?;
        let blobs: Arc<dyn BlobStore> = match &config.blob_root {
            Some(root) => Arc::new(FsBlobStore::new(root.clone())),
            None => Arc::new(MemoryBlobStore::default()),
        };
        let tokens = Arc::new(CorrelationTokenStore::new());
        let breakers = Arc::new(Breakers::new(config.breaker.clone()));

        let auth: Arc<dyn AuthApi> = match &config.gateways {
            GatewayConfig::Mock => Arc::new(MockAuthApi),
            GatewayConfig::Http { .. } => Arc::new(HttpAuthApi::new(config.provider.clone())),
        };
        let credentials = Arc::new(ServiceCredentialCache::new(
            Arc::clone(&auth),
            Arc::clone(&breakers.auth),
            config.provider.service_scope.clone(),
        ));

        let (sign_api, hash_sdk, seal_api, ltv_api): (
            Arc<dyn DocumentSignApi>,
            Arc<dyn HashSignSdk>,
            Arc<dyn SealApi>,
            Arc<dyn LtvApi>,
        ) = match config.gateways {
            GatewayConfig::Mock => (
                Arc::new(MockDocumentSignApi),
                Arc::new(MockHashSignSdk),
                Arc::new(MockSealApi),
                Arc::new(MockLtvApi),
            ),
            GatewayConfig::Http {
                sign_api_url,
                hash_sdk_url,
                seal,
                ltv,
            } => (
                Arc::new(HttpDocumentSignApi::new(
                    sign_api_url,
                    Arc::clone(&credentials),
                )),
                Arc::new(HttpHashSignSdk::new(hash_sdk_url)),
                Arc::new(HttpSealApi::new(seal)),
                Arc::new(HttpLtvApi::new(ltv)),
            ),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            config.provider.clone(),
            Arc::clone(&sign_api),
            Arc::clone(&hash_sdk),
            Arc::clone(&stores.jobs),
            Arc::clone(&blobs),
            Arc::clone(&stores.audit),
            Arc::clone(&tokens),
            Arc::clone(&breakers),
        ));
        let pipeline = Arc::new(CompletionPipeline::new(
            config.provider.clone(),
            Arc::clone(&sign_api),
            Arc::clone(&hash_sdk),
            Arc::clone(&ltv_api),
            Arc::clone(&auth),
            Arc::clone(&stores.jobs),
            Arc::clone(&blobs),
            Arc::clone(&stores.audit),
            credentials,
            Arc::clone(&breakers),
        ));
        let reconfirm = Arc::new(ReconfirmationService::new(
            config.provider.clone(),
            Arc::clone(&auth),
            Arc::clone(&stores.reconfirmations),
            Arc::clone(&stores.audit),
            Arc::clone(&tokens),
            Arc::clone(&breakers),
        ));
        let seal = Arc::new(SealService::new(
            seal_api,
            Arc::clone(&stores.seal_jobs),
            Arc::clone(&blobs),
            Arc::clone(&stores.audit),
            Arc::clone(&breakers),
        ));
        let queue = CompletionQueue::spawn(pipeline, config.queue_capacity, config.workers);

        Ok(Self {
            provider: config.provider,
            jobs: stores.jobs,
            reconfirmations: stores.reconfirmations,
            blobs,
            tokens,
            breakers,
            orchestrator,
            reconfirm,
            seal,
            queue,
            storage_label,
        })
    }
}

/// Background expiry sweep, one pass every five minutes.
pub fn spawn_sweeper(state: &ServiceState) {
    let jobs = Arc::clone(&state.jobs);
    let tokens = Arc::clone(&state.tokens);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(esign_core::sweeper::SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = esign_core::sweeper::sweep_once(jobs.as_ref(), tokens.as_ref()).await
            {
                warn!(error = %err, "expiry sweep failed");
            }
        }
    });
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/signature/initiate", post(initiate_single))
        .route("/v1/signature/multi/initiate", post(initiate_multiple))
        .route("/v1/signature/callback", get(signature_callback))
        .route("/v1/signature/status/:job_id", get(job_status))
        .route("/v1/signature/download/:job_id", get(download_artifact))
        .route("/v1/signature/verify", post(seal_verify))
        .route("/v1/hashsign/initiate", post(initiate_hash))
        .route("/v1/hashsign/bulk/initiate", post(initiate_hash_bulk))
        .route("/v1/hashsign/callback", get(hash_callback))
        .route("/v1/hashsign/status/:job_id", get(job_status))
        .route("/v1/reconfirm/initiate", post(reconfirm_initiate))
        .route("/v1/reconfirm/callback", get(reconfirm_callback))
        .route("/v1/reconfirm/status/:id", get(reconfirm_status))
        .route("/v1/seal/cades", post(seal_cades))
        .route("/v1/seal/pades", post(seal_pades))
        .route("/v1/seal/verify", post(seal_verify))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }
}

impl From<SignError> for ApiError {
    fn from(err: SignError) -> Self {
        let status = match &err {
            SignError::Validation(_) => StatusCode::BAD_REQUEST,
            SignError::InvalidToken => StatusCode::UNAUTHORIZED,
            SignError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SignError::TransactionConflict => StatusCode::CONFLICT,
            SignError::SecurityMismatch => StatusCode::FORBIDDEN,
            SignError::NotFound(_) => StatusCode::NOT_FOUND,
            SignError::Terminal { .. } | SignError::IllegalTransition { .. } => {
                StatusCode::CONFLICT
            }
            SignError::Storage(_) | SignError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // Internal detail stays in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %err, "internal error");
            "internal error".to_string()
        } else {
            err.to_string()
        };
        Self::Http { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
        }
    }
}

fn signer_profile(headers: &HeaderMap) -> Result<SignerProfile, ApiError> {
    let raw = headers
        .get(SIGNER_PROFILE_HEADER)
        .ok_or_else(|| ApiError::unauthorized("missing signer profile"))?;
    let raw = raw
        .to_str()
        .map_err(|_| ApiError::unauthorized("malformed signer profile"))?;
    serde_json::from_str(raw).map_err(|_| ApiError::unauthorized("malformed signer profile"))
}

fn optional_profile(headers: &HeaderMap) -> Option<SignerProfile> {
    signer_profile(headers).ok()
}

fn decode_document(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    BASE64
        .decode(value)
        .map_err(|_| ApiError::bad_request(format!("{field} is not valid base64")))
}

fn remote_addr(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
    breakers: serde_json::Value,
}

async fn health(State(svc): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "esign-service",
        storage_backend: svc.storage_label,
        breakers: serde_json::json!({
            "sign_api": svc.breakers.sign_api.state().to_string(),
            "hash_sdk": svc.breakers.hash_sdk.state().to_string(),
            "seal_rpc": svc.breakers.seal_rpc.state().to_string(),
            "ltv_rpc": svc.breakers.ltv_rpc.state().to_string(),
            "auth": svc.breakers.auth.state().to_string(),
        }),
    })
}

#[derive(Debug, Deserialize)]
struct SingleInitRequest {
    document_name: String,
    document_base64: String,
    placement: Placement,
}

#[derive(Debug, Serialize)]
struct InitiatedResponse {
    job_id: Uuid,
    redirect_url: String,
}

async fn initiate_single(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<SingleInitRequest>,
) -> Result<Json<InitiatedResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    let bytes = decode_document("document_base64", &request.document_base64)?;
    let started = svc
        .orchestrator
        .initiate_single(
            &profile,
            NamedDocument {
                name: request.document_name,
                bytes,
            },
            request.placement,
        )
        .await?;
    Ok(Json(InitiatedResponse {
        job_id: started.job_id,
        redirect_url: started.redirect_url,
    }))
}

#[derive(Debug, Deserialize)]
struct DocPayload {
    name: String,
    content_base64: String,
}

#[derive(Debug, Deserialize)]
struct MultiInitRequest {
    documents: Vec<DocPayload>,
    placement: Placement,
}

async fn initiate_multiple(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<MultiInitRequest>,
) -> Result<Json<InitiatedResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    // Batch signing is high-value: a fresh identity re-confirmation is
    // required before it may start.
    if !svc.reconfirm.has_recent_verified(profile.id).await? {
        return Err(ApiError::forbidden(
            "recent identity re-confirmation required",
        ));
    }

    let mut documents = Vec::with_capacity(request.documents.len());
    for doc in request.documents {
        documents.push(NamedDocument {
            bytes: decode_document("content_base64", &doc.content_base64)?,
            name: doc.name,
        });
    }
    let started = svc
        .orchestrator
        .initiate_multiple(&profile, documents, request.placement)
        .await?;
    Ok(Json(InitiatedResponse {
        job_id: started.job_id,
        redirect_url: started.redirect_url,
    }))
}

#[derive(Debug, Deserialize)]
struct HashInitRequest {
    document_name: String,
    document_base64: String,
    placement: Placement,
}

async fn initiate_hash(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<HashInitRequest>,
) -> Result<Json<InitiatedResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    let bytes = decode_document("document_base64", &request.document_base64)?;
    let started = svc
        .orchestrator
        .initiate_hash(
            &profile,
            HashDocument {
                name: request.document_name,
                bytes,
                placement: request.placement,
            },
        )
        .await?;
    Ok(Json(InitiatedResponse {
        job_id: started.job_id,
        redirect_url: started.redirect_url,
    }))
}

#[derive(Debug, Deserialize)]
struct HashDocPayload {
    name: String,
    content_base64: String,
    placement: Placement,
}

#[derive(Debug, Deserialize)]
struct BulkHashInitRequest {
    documents: Vec<HashDocPayload>,
}

async fn initiate_hash_bulk(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<BulkHashInitRequest>,
) -> Result<Json<InitiatedResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    let mut documents = Vec::with_capacity(request.documents.len());
    for doc in request.documents {
        documents.push(HashDocument {
            bytes: decode_document("content_base64", &doc.content_base64)?,
            name: doc.name,
            placement: doc.placement,
        });
    }
    let started = svc
        .orchestrator
        .initiate_hash_bulk(&profile, documents)
        .await?;
    Ok(Json(InitiatedResponse {
        job_id: started.job_id,
        redirect_url: started.redirect_url,
    }))
}

#[derive(Debug, Deserialize)]
struct SignatureCallbackQuery {
    status: String,
    signer_process_id: String,
}

async fn signature_callback(
    State(svc): State<ServiceState>,
    Query(query): Query<SignatureCallbackQuery>,
) -> Result<Redirect, ApiError> {
    let outcome = CallbackOutcome::parse(&query.status)?;
    svc.queue.enqueue(CompletionTask::Document {
        process_id: query.signer_process_id.clone(),
        outcome,
    })?;
    info!(process_id = %query.signer_process_id, status = %query.status,
        "signature callback accepted");
    let target = svc.provider.frontend_result_url(
        "/signing/result",
        &[
            ("process", query.signer_process_id.as_str()),
            ("status", query.status.as_str()),
        ],
    )?;
    Ok(Redirect::to(&target))
}

#[derive(Debug, Deserialize)]
struct AuthorizeCallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn hash_callback(
    State(svc): State<ServiceState>,
    Query(query): Query<AuthorizeCallbackQuery>,
) -> Result<Redirect, ApiError> {
    let invalid = || {
        svc.provider
            .frontend_result_url("/signing/result", &[("status", "invalid_state")])
    };

    let payload = match svc.tokens.consume(query.state.as_deref().unwrap_or_default()) {
        Ok(payload) if payload.flow == FlowKind::HashSign => payload,
        _ => return Ok(Redirect::to(&invalid()?)),
    };
    let Some(owner) = payload.owner else {
        return Ok(Redirect::to(&invalid()?));
    };

    let (approval, status) = match (query.code, query.error) {
        (_, Some(error)) => (HashApproval::Denied { reason: error }, "canceled"),
        (Some(code), None) => (HashApproval::Approved { code }, "processing"),
        (None, None) => return Ok(Redirect::to(&invalid()?)),
    };

    svc.queue.enqueue(CompletionTask::Hash { owner, approval })?;
    let target = svc
        .provider
        .frontend_result_url("/signing/result", &[("status", status)])?;
    Ok(Redirect::to(&target))
}

#[derive(Debug, Serialize)]
struct DocumentView {
    index: usize,
    name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    job_id: Uuid,
    status: &'static str,
    variant: &'static str,
    ltv_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    documents: Vec<DocumentView>,
}

impl From<SigningJob> for JobStatusResponse {
    fn from(job: SigningJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status.as_str(),
            variant: job.variant.as_str(),
            ltv_applied: job.ltv_applied,
            callback_status: job.callback_status,
            error_message: job.error_message,
            documents: job
                .documents
                .into_iter()
                .map(|doc| DocumentView {
                    index: doc.index,
                    name: doc.name,
                    status: match doc.status {
                        DocumentStatus::Pending => "PENDING",
                        DocumentStatus::Signed => "SIGNED",
                        DocumentStatus::Failed => "FAILED",
                    },
                    error: doc.error,
                })
                .collect(),
        }
    }
}

async fn job_status(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    let job = svc
        .jobs
        .find(job_id)
        .await?
        .filter(|job| job.owner == profile.id)
        .ok_or(SignError::NotFound("signing job"))?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    index: usize,
}

async fn download_artifact(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let profile = signer_profile(&headers)?;
    let job = svc
        .jobs
        .find(job_id)
        .await?
        .filter(|job| job.owner == profile.id)
        .ok_or(SignError::NotFound("signing job"))?;
    if !matches!(job.status, JobStatus::Signed | JobStatus::FailedDocuments) {
        return Err(ApiError::Http {
            status: StatusCode::CONFLICT,
            message: format!("job is not completed (status '{}')", job.status),
        });
    }

    // The enhanced artifact supersedes the plain one when present.
    let bytes = match svc.blobs.get(&blob_keys::signed_ltv(job.id, query.index)).await? {
        Some(bytes) => bytes,
        None => svc
            .blobs
            .get(&blob_keys::signed(job.id, query.index))
            .await?
            .ok_or(SignError::NotFound("signed artifact"))?,
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf")],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ReconfirmInitRequest {
    purpose: String,
    transaction_ref: String,
    hint_kind: HintKind,
}

#[derive(Debug, Serialize)]
struct ReconfirmInitResponse {
    record_id: Uuid,
    redirect_url: String,
}

async fn reconfirm_initiate(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<ReconfirmInitRequest>,
) -> Result<Json<ReconfirmInitResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    let started = svc
        .reconfirm
        .initiate(
            &profile,
            &request.purpose,
            &request.transaction_ref,
            request.hint_kind,
        )
        .await?;
    Ok(Json(ReconfirmInitResponse {
        record_id: started.record_id,
        redirect_url: started.redirect_url,
    }))
}

async fn reconfirm_callback(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeCallbackQuery>,
) -> Result<Redirect, ApiError> {
    let result_url = |status: &str| {
        svc.provider
            .frontend_result_url("/reconfirm/result", &[("status", status)])
    };

    let payload = match svc.tokens.consume(query.state.as_deref().unwrap_or_default()) {
        Ok(payload) if payload.flow == FlowKind::Reconfirm => payload,
        _ => return Ok(Redirect::to(&result_url("invalid_state")?)),
    };
    let record_id = payload
        .continuation
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok());
    let Some(record_id) = record_id else {
        return Ok(Redirect::to(&result_url("invalid_state")?));
    };

    if query.error.is_some() {
        return Ok(Redirect::to(&result_url("canceled")?));
    }
    let Some(code) = query.code else {
        return Ok(Redirect::to(&result_url("invalid_state")?));
    };

    // Unlike signing, re-confirmation settles synchronously; the result
    // page can read the final verdict immediately.
    match svc
        .reconfirm
        .complete(record_id, &code, &remote_addr(&headers))
        .await
    {
        Ok(_) => Ok(Redirect::to(&result_url("verified")?)),
        Err(SignError::SecurityMismatch) => Ok(Redirect::to(&result_url("failed")?)),
        Err(err) => {
            warn!(error = %err, "re-confirmation completion failed");
            Ok(Redirect::to(&result_url("error")?))
        }
    }
}

#[derive(Debug, Serialize)]
struct ReconfirmStatusResponse {
    id: Uuid,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn reconfirm_status(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconfirmStatusResponse>, ApiError> {
    let profile = signer_profile(&headers)?;
    let record = svc
        .reconfirmations
        .find(id)
        .await?
        .filter(|record| record.owner == profile.id)
        .ok_or(SignError::NotFound("re-confirmation record"))?;
    Ok(Json(ReconfirmStatusResponse {
        id: record.id,
        status: record.status.as_str(),
        verified_at: record.verified_at,
    }))
}

#[derive(Debug, Deserialize)]
struct SealRequestBody {
    document_base64: String,
}

#[derive(Debug, Serialize)]
struct SealResponseBody {
    seal_id: Uuid,
    artifact_base64: String,
}

async fn seal_cades(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<SealRequestBody>,
) -> Result<Json<SealResponseBody>, ApiError> {
    let document = decode_document("document_base64", &request.document_base64)?;
    let actor = optional_profile(&headers).map(|profile| profile.id);
    let sealed = svc.seal.seal_cades(&document, actor).await?;
    Ok(Json(SealResponseBody {
        seal_id: sealed.job.id,
        artifact_base64: BASE64.encode(sealed.bytes),
    }))
}

async fn seal_pades(
    State(svc): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<SealRequestBody>,
) -> Result<Json<SealResponseBody>, ApiError> {
    let pdf = decode_document("document_base64", &request.document_base64)?;
    let actor = optional_profile(&headers).map(|profile| profile.id);
    let sealed = svc.seal.seal_pades(&pdf, actor).await?;
    Ok(Json(SealResponseBody {
        seal_id: sealed.job.id,
        artifact_base64: BASE64.encode(sealed.bytes),
    }))
}

#[derive(Debug, Deserialize)]
struct VerifyRequestBody {
    document_base64: String,
    #[serde(default)]
    signature_base64: Option<String>,
}

async fn seal_verify(
    State(svc): State<ServiceState>,
    Json(request): Json<VerifyRequestBody>,
) -> Result<Json<esign_core::SealVerification>, ApiError> {
    let document = decode_document("document_base64", &request.document_base64)?;
    let verification = match request.signature_base64 {
        Some(signature) => {
            let signature = decode_document("signature_base64", &signature)?;
            svc.seal.verify_cades(&document, &signature).await?
        }
        None => svc.seal.verify_pades(&document).await?,
    };
    Ok(Json(verification))
}
