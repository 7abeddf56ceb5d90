//! PostgreSQL persistence.
//!
//! One pool shared by all stores; `ensure_schema` runs at bootstrap so a
//! fresh database is usable without migrations tooling.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use esign_core::seal::{SealJob, SealJobStatus, SealType};
use esign_core::store::{AuditSink, JobStore, ReconfirmationStore, SealJobStore};
use esign_core::types::{
    HintKind, IdentityReconfirmation, JobStatus, ReconfirmationStatus, SigningJob, SigningVariant,
};
use esign_core::SignError;

fn db_err(context: &str, err: sqlx::Error) -> SignError {
    SignError::Storage(format!("{context}: {err}"))
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, SignError> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await
        .map_err(|err| db_err("postgres connect failed", err))
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), SignError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS esign_jobs (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            variant TEXT NOT NULL,
            status TEXT NOT NULL,
            process_id TEXT NULL,
            sign_identity_id TEXT NULL,
            documents JSONB NOT NULL,
            callback_url TEXT NULL,
            callback_status TEXT NULL,
            ltv_applied BOOLEAN NOT NULL DEFAULT FALSE,
            error_message TEXT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            initiated_at TIMESTAMPTZ NULL,
            completed_at TIMESTAMPTZ NULL,
            expires_at TIMESTAMPTZ NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|err| db_err("postgres schema create failed", err))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_esign_jobs_process_id ON esign_jobs (process_id)")
        .execute(pool)
        .await
        .map_err(|err| db_err("postgres index create failed", err))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_esign_jobs_owner_status ON esign_jobs (owner_id, status)",
    )
    .execute(pool)
    .await
    .map_err(|err| db_err("postgres index create failed", err))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS esign_reconfirmations (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            purpose TEXT NOT NULL,
            transaction_ref TEXT NOT NULL,
            status TEXT NOT NULL,
            hint_kind TEXT NOT NULL,
            expected_subject TEXT NULL,
            returned_subject TEXT NULL,
            subject_match BOOLEAN NULL,
            created_at TIMESTAMPTZ NOT NULL,
            verified_at TIMESTAMPTZ NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|err| db_err("postgres schema create failed", err))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_esign_reconfirm_owner ON esign_reconfirmations (owner_id, status, verified_at)",
    )
    .execute(pool)
    .await
    .map_err(|err| db_err("postgres index create failed", err))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS esign_seal_jobs (
            id UUID PRIMARY KEY,
            requested_by UUID NULL,
            seal_type TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT NULL,
            input_key TEXT NOT NULL,
            output_key TEXT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|err| db_err("postgres schema create failed", err))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS esign_audit_log (
            id BIGSERIAL PRIMARY KEY,
            actor UUID NULL,
            action TEXT NOT NULL,
            subject_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            context JSONB NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|err| db_err("postgres schema create failed", err))?;

    Ok(())
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<SigningJob, SignError> {
        let variant: String = row.get("variant");
        let status: String = row.get("status");
        let documents: serde_json::Value = row.get("documents");
        Ok(SigningJob {
            id: row.get("id"),
            owner: row.get("owner_id"),
            variant: SigningVariant::parse(&variant)?,
            status: JobStatus::parse(&status)?,
            process_id: row.get("process_id"),
            sign_identity_id: row.get("sign_identity_id"),
            documents: serde_json::from_value(documents)?,
            callback_url: row.get("callback_url"),
            callback_status: row.get("callback_status"),
            ltv_applied: row.get("ltv_applied"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            initiated_at: row.get("initiated_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

const JOB_COLUMNS: &str = "id, owner_id, variant, status, process_id, sign_identity_id, \
     documents, callback_url, callback_status, ltv_applied, error_message, \
     created_at, initiated_at, completed_at, expires_at";

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &SigningJob) -> Result<(), SignError> {
        let documents = serde_json::to_value(&job.documents)?;
        sqlx::query(
            r#"
            INSERT INTO esign_jobs (
                id, owner_id, variant, status, process_id, sign_identity_id,
                documents, callback_url, callback_status, ltv_applied,
                error_message, created_at, initiated_at, completed_at, expires_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            "#,
        )
        .bind(job.id)
        .bind(job.owner)
        .bind(job.variant.as_str())
        .bind(job.status.as_str())
        .bind(&job.process_id)
        .bind(&job.sign_identity_id)
        .bind(documents)
        .bind(&job.callback_url)
        .bind(&job.callback_status)
        .bind(job.ltv_applied)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.initiated_at)
        .bind(job.completed_at)
        .bind(job.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("job insert failed", err))?;
        Ok(())
    }

    async fn update(&self, job: &SigningJob) -> Result<(), SignError> {
        let documents = serde_json::to_value(&job.documents)?;
        let result = sqlx::query(
            r#"
            UPDATE esign_jobs SET
                status = $2, process_id = $3, sign_identity_id = $4,
                documents = $5, callback_url = $6, callback_status = $7,
                ltv_applied = $8, error_message = $9, completed_at = $10,
                expires_at = $11
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.process_id)
        .bind(&job.sign_identity_id)
        .bind(documents)
        .bind(&job.callback_url)
        .bind(&job.callback_status)
        .bind(job.ltv_applied)
        .bind(&job.error_message)
        .bind(job.completed_at)
        .bind(job.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("job update failed", err))?;
        if result.rows_affected() == 0 {
            return Err(SignError::NotFound("signing job"));
        }
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SigningJob>, SignError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM esign_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| db_err("job lookup failed", err))?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_by_process_id(&self, process_id: &str) -> Result<Option<SigningJob>, SignError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM esign_jobs WHERE process_id = $1"
        ))
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("job lookup failed", err))?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_awaiting_hash_job(&self, owner: Uuid) -> Result<Option<SigningJob>, SignError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM esign_jobs
            WHERE owner_id = $1
              AND status = 'AWAITING_USER'
              AND variant IN ('HASH', 'HASH_BULK')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("job lookup failed", err))?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, SignError> {
        let result = sqlx::query(
            r#"
            UPDATE esign_jobs
            SET status = 'EXPIRED', completed_at = $1
            WHERE status IN ('INITIATED', 'AWAITING_USER')
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("job expiry sweep failed", err))?;
        Ok(result.rows_affected())
    }

    async fn delete_for_owner(&self, owner: Uuid) -> Result<u64, SignError> {
        let result = sqlx::query("DELETE FROM esign_jobs WHERE owner_id = $1")
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|err| db_err("job erasure failed", err))?;
        Ok(result.rows_affected())
    }
}

pub struct PgReconfirmationStore {
    pool: PgPool,
}

impl PgReconfirmationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<IdentityReconfirmation, SignError> {
        let status: String = row.get("status");
        let hint_kind: String = row.get("hint_kind");
        Ok(IdentityReconfirmation {
            id: row.get("id"),
            owner: row.get("owner_id"),
            purpose: row.get("purpose"),
            transaction_ref: row.get("transaction_ref"),
            status: ReconfirmationStatus::parse(&status)?,
            hint_kind: HintKind::parse(&hint_kind)?,
            expected_subject: row.get("expected_subject"),
            returned_subject: row.get("returned_subject"),
            subject_match: row.get("subject_match"),
            created_at: row.get("created_at"),
            verified_at: row.get("verified_at"),
        })
    }
}

const RECONFIRM_COLUMNS: &str = "id, owner_id, purpose, transaction_ref, status, hint_kind, \
     expected_subject, returned_subject, subject_match, created_at, verified_at";

#[async_trait]
impl ReconfirmationStore for PgReconfirmationStore {
    async fn insert(&self, record: &IdentityReconfirmation) -> Result<(), SignError> {
        sqlx::query(
            r#"
            INSERT INTO esign_reconfirmations (
                id, owner_id, purpose, transaction_ref, status, hint_kind,
                expected_subject, returned_subject, subject_match, created_at, verified_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(record.id)
        .bind(record.owner)
        .bind(&record.purpose)
        .bind(&record.transaction_ref)
        .bind(record.status.as_str())
        .bind(record.hint_kind.as_str())
        .bind(&record.expected_subject)
        .bind(&record.returned_subject)
        .bind(record.subject_match)
        .bind(record.created_at)
        .bind(record.verified_at)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("re-confirmation insert failed", err))?;
        Ok(())
    }

    async fn update(&self, record: &IdentityReconfirmation) -> Result<(), SignError> {
        let result = sqlx::query(
            r#"
            UPDATE esign_reconfirmations SET
                status = $2, returned_subject = $3, subject_match = $4, verified_at = $5
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(&record.returned_subject)
        .bind(record.subject_match)
        .bind(record.verified_at)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("re-confirmation update failed", err))?;
        if result.rows_affected() == 0 {
            return Err(SignError::NotFound("re-confirmation record"));
        }
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<IdentityReconfirmation>, SignError> {
        let row = sqlx::query(&format!(
            "SELECT {RECONFIRM_COLUMNS} FROM esign_reconfirmations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("re-confirmation lookup failed", err))?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_recent_verified(
        &self,
        owner: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<IdentityReconfirmation>, SignError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RECONFIRM_COLUMNS} FROM esign_reconfirmations
            WHERE owner_id = $1 AND status = 'VERIFIED' AND verified_at >= $2
            ORDER BY verified_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("re-confirmation lookup failed", err))?;
        row.as_ref().map(Self::from_row).transpose()
    }
}

pub struct PgSealJobStore {
    pool: PgPool,
}

impl PgSealJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SealJobStore for PgSealJobStore {
    async fn insert(&self, job: &SealJob) -> Result<(), SignError> {
        sqlx::query(
            r#"
            INSERT INTO esign_seal_jobs (
                id, requested_by, seal_type, status, error_message,
                input_key, output_key, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(job.id)
        .bind(job.requested_by)
        .bind(job.seal_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(&job.input_key)
        .bind(&job.output_key)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("seal job insert failed", err))?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SealJob>, SignError> {
        let row = sqlx::query(
            r#"
            SELECT id, requested_by, seal_type, status, error_message,
                   input_key, output_key, created_at
            FROM esign_seal_jobs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("seal job lookup failed", err))?;
        row.map(|row| {
            let seal_type: String = row.get("seal_type");
            let status: String = row.get("status");
            Ok(SealJob {
                id: row.get("id"),
                requested_by: row.get("requested_by"),
                seal_type: SealType::parse(&seal_type)?,
                status: SealJobStatus::parse(&status)?,
                error_message: row.get("error_message"),
                input_key: row.get("input_key"),
                output_key: row.get("output_key"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }
}

/// Audit sink backed by the `esign_audit_log` table. Write failures are
/// logged and swallowed; audit must never break a business flow.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(
        &self,
        actor: Option<Uuid>,
        action: &str,
        subject_type: &str,
        subject_id: &str,
        context: serde_json::Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO esign_audit_log (actor, action, subject_type, subject_id, context)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(actor)
        .bind(action)
        .bind(subject_type)
        .bind(subject_id)
        .bind(context)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            warn!(action, subject_id, error = %err, "audit write failed");
        }
    }
}

/// Storage backend selection, mirrored by the service CLI.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StorageConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// The full set of stores a service instance runs on.
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub reconfirmations: Arc<dyn ReconfirmationStore>,
    pub seal_jobs: Arc<dyn SealJobStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    pub async fn bootstrap(config: StorageConfig) -> Result<Self, SignError> {
        match config {
            StorageConfig::Memory => Ok(Self {
                jobs: Arc::new(crate::memory::MemoryJobStore::default()),
                reconfirmations: Arc::new(crate::memory::MemoryReconfirmationStore::default()),
                seal_jobs: Arc::new(crate::memory::MemorySealJobStore::default()),
                audit: Arc::new(crate::memory::TracingAuditSink),
            }),
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = connect(&database_url, max_connections).await?;
                ensure_schema(&pool).await?;
                Ok(Self {
                    jobs: Arc::new(PgJobStore::new(pool.clone())),
                    reconfirmations: Arc::new(PgReconfirmationStore::new(pool.clone())),
                    seal_jobs: Arc::new(PgSealJobStore::new(pool.clone())),
                    audit: Arc::new(PgAuditSink::new(pool)),
                })
            }
        }
    }
}
