//! Gateway and storage adapters for the signing-workflow orchestrator.
//!
//! Everything behind the core crate's trait seams lives here: the reqwest
//! clients for the provider surfaces, the quick-xml seal/LTV RPC clients,
//! PostgreSQL and in-memory stores, and the filesystem blob store.

#![deny(unsafe_code)]

pub mod auth;
pub mod envelope;
pub mod fs_blob;
pub mod hash_sdk;
pub mod memory;
pub mod mock;
pub mod postgres;
pub mod seal_rpc;
pub mod sign_api;

mod http;

pub use auth::HttpAuthApi;
pub use fs_blob::FsBlobStore;
pub use hash_sdk::HttpHashSignSdk;
pub use mock::{
    MockAuthApi, MockDocumentSignApi, MockHashSignSdk, MockLtvApi, MockSealApi, MOCK_SUBJECT,
};
pub use memory::{
    MemoryBlobStore, MemoryJobStore, MemoryReconfirmationStore, MemorySealJobStore,
    TracingAuditSink,
};
pub use postgres::{
    PgAuditSink, PgJobStore, PgReconfirmationStore, PgSealJobStore, StorageConfig, Stores,
};
pub use seal_rpc::{HttpLtvApi, HttpSealApi, RpcEndpoint};
pub use sign_api::HttpDocumentSignApi;
