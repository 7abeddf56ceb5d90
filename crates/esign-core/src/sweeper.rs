//! Housekeeping for abandoned flows.
//!
//! A user who walks away mid-approval leaves a job in INITIATED or
//! AWAITING_USER forever; the sweeper marks those EXPIRED once their
//! deadline passes and drops dead correlation tokens along the way.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::SignError;
use crate::store::JobStore;
use crate::token::CorrelationTokenStore;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// One sweep pass. Returns how many jobs were expired.
pub async fn sweep_once(
    jobs: &dyn JobStore,
    tokens: &CorrelationTokenStore,
) -> Result<u64, SignError> {
    let expired = jobs.expire_stale(Utc::now()).await?;
    let purged = tokens.purge_expired();
    if expired > 0 {
        info!(expired, "stale signing jobs expired");
    } else {
        debug!(purged, "sweep pass complete");
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobStore;
    use crate::testutil::{shared, MemJobStore};
    use crate::types::{JobStatus, SigningJob, SigningVariant};
    use uuid::Uuid;

    #[tokio::test]
    async fn expires_only_overdue_pre_approval_jobs() {
        let jobs = shared(MemJobStore::default());
        let tokens = CorrelationTokenStore::new();

        let mut overdue = SigningJob::new(Uuid::new_v4(), SigningVariant::Single, vec![]);
        overdue.status = JobStatus::AwaitingUser;
        overdue.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        jobs.insert(&overdue).await.unwrap();

        let mut fresh = SigningJob::new(Uuid::new_v4(), SigningVariant::Single, vec![]);
        fresh.status = JobStatus::AwaitingUser;
        jobs.insert(&fresh).await.unwrap();

        let mut settled = SigningJob::new(Uuid::new_v4(), SigningVariant::Hash, vec![]);
        settled.status = JobStatus::Signed;
        settled.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        jobs.insert(&settled).await.unwrap();

        let expired = sweep_once(jobs.as_ref(), &tokens).await.unwrap();
        assert_eq!(expired, 1);

        assert_eq!(
            jobs.find(overdue.id).await.unwrap().unwrap().status,
            JobStatus::Expired
        );
        assert_eq!(
            jobs.find(fresh.id).await.unwrap().unwrap().status,
            JobStatus::AwaitingUser
        );
        assert_eq!(
            jobs.find(settled.id).await.unwrap().unwrap().status,
            JobStatus::Signed
        );
    }
}
