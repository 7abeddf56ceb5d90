//! Signing-workflow orchestration core.
//!
//! This crate owns the domain: correlation tokens, the signing-job state
//! machine, per-dependency circuit breakers, the initiation orchestrator,
//! the callback completion pipeline, identity re-confirmation, and
//! electronic seals. Transport and persistence live behind the gateway and
//! store traits and are supplied by the adapters crate.

#![deny(unsafe_code)]

pub mod breaker;
pub mod completion;
pub mod config;
pub mod credential;
pub mod digest;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod reconfirm;
pub mod seal;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod types;

#[cfg(test)]
pub mod testutil;

pub use breaker::{BreakerConfig, Breakers, CircuitBreaker, CircuitState};
pub use completion::{CallbackOutcome, CompletionPipeline, HashApproval};
pub use config::ProviderConfig;
pub use credential::ServiceCredentialCache;
pub use digest::{combined_digest, sha256_hex};
pub use error::SignError;
pub use gateway::{
    AuthApi, CreatedProcess, DocumentSignApi, GatewayError, HashSignSdk, LtvApi, PreparedHash,
    RemoteDocument, SealApi, SealVerification, ServiceCredential, UploadDocument, UserCredential,
};
pub use orchestrator::{
    HashDocument, InitiatedSigning, NamedDocument, Orchestrator,
};
pub use reconfirm::{InitiatedReconfirmation, ReconfirmationService};
pub use seal::{SealJob, SealJobStatus, SealService, SealType, SealedArtifact};
pub use store::{blob_keys, AuditSink, BlobStore, JobStore, ReconfirmationStore, SealJobStore};
pub use token::{CorrelationTokenStore, FlowKind, TokenPayload, TOKEN_TTL};
pub use types::{
    validate_pdf, DocumentEntry, DocumentStatus, HintKind, IdentityClass, IdentityReconfirmation,
    JobStatus, Placement, ReconfirmationStatus, SignerProfile, SigningJob, SigningVariant,
};
