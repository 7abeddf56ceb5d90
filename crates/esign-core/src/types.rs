use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SignError;

/// Signing flow variant. Hash variants go through the local signing
/// co-process; the document variants upload bytes to the provider's
/// signing API instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SigningVariant {
    Single,
    Multiple,
    Hash,
    HashBulk,
}

impl SigningVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "SINGLE",
            Self::Multiple => "MULTIPLE",
            Self::Hash => "HASH",
            Self::HashBulk => "HASH_BULK",
        }
    }

    pub fn is_hash(self) -> bool {
        matches!(self, Self::Hash | Self::HashBulk)
    }

    pub fn parse(value: &str) -> Result<Self, SignError> {
        match value {
            "SINGLE" => Ok(Self::Single),
            "MULTIPLE" => Ok(Self::Multiple),
            "HASH" => Ok(Self::Hash),
            "HASH_BULK" => Ok(Self::HashBulk),
            other => Err(SignError::Storage(format!(
                "unknown signing variant '{other}' in storage"
            ))),
        }
    }
}

/// Signing job lifecycle.
///
/// Initiated -> AwaitingUser -> CallbackReceived -> Completing -> terminal.
/// Expired is reachable only from the pre-approval states and only via the
/// sweeper. Terminal statuses are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initiated,
    AwaitingUser,
    CallbackReceived,
    Completing,
    Signed,
    FailedDocuments,
    Failed,
    Canceled,
    Expired,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::AwaitingUser => "AWAITING_USER",
            Self::CallbackReceived => "CALLBACK_RECEIVED",
            Self::Completing => "COMPLETING",
            Self::Signed => "SIGNED",
            Self::FailedDocuments => "FAILED_DOCUMENTS",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SignError> {
        match value {
            "INITIATED" => Ok(Self::Initiated),
            "AWAITING_USER" => Ok(Self::AwaitingUser),
            "CALLBACK_RECEIVED" => Ok(Self::CallbackReceived),
            "COMPLETING" => Ok(Self::Completing),
            "SIGNED" => Ok(Self::Signed),
            "FAILED_DOCUMENTS" => Ok(Self::FailedDocuments),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(SignError::Storage(format!(
                "unknown job status '{other}' in storage"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Signed | Self::FailedDocuments | Self::Failed | Self::Canceled | Self::Expired
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Initiated, AwaitingUser) => true,
            (Initiated | AwaitingUser, Expired) => true,
            (AwaitingUser, CallbackReceived) => true,
            (CallbackReceived, Completing) => true,
            // Terminal failure outcomes can be recorded as soon as the
            // callback arrives; Signed requires the pipeline to have run.
            (CallbackReceived, Failed | FailedDocuments | Canceled) => true,
            (Completing, Signed | Failed | FailedDocuments | Canceled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-document outcome inside a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Signed,
    Failed,
}

/// One document tracked by a signing job. Serialized as JSON into the job's
/// `documents` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub index: usize,
    pub name: String,
    /// Remote document url for SINGLE/MULTIPLE variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Co-process transaction id for HASH variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentEntry {
    pub fn pending(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            remote_url: None,
            transaction_id: None,
            digest: None,
            placement: None,
            status: DocumentStatus::Pending,
            error: None,
        }
    }
}

/// Signature field placement supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Placement {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Placement {
    pub const MIN_DIMENSION: f64 = 20.0;

    pub fn validate(&self) -> Result<(), SignError> {
        if self.page < 1 {
            return Err(SignError::validation("placement page must be >= 1"));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(SignError::validation("placement x/y must be >= 0"));
        }
        if self.width < Self::MIN_DIMENSION || self.height < Self::MIN_DIMENSION {
            return Err(SignError::validation(format!(
                "placement width/height must be >= {}",
                Self::MIN_DIMENSION
            )));
        }
        Ok(())
    }

    /// Co-process placement expression: `{page}:[{x},{y},{width},{height}]`.
    pub fn expression(&self) -> String {
        format!(
            "{}:[{},{},{},{}]",
            self.page, self.x, self.y, self.width, self.height
        )
    }
}

/// Persistent record of one signing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningJob {
    pub id: Uuid,
    pub owner: Uuid,
    pub variant: SigningVariant,
    pub status: JobStatus,
    /// Process id issued by the provider's signing API (SINGLE/MULTIPLE).
    pub process_id: Option<String>,
    /// Signing identity reference issued by the co-process (HASH variants).
    pub sign_identity_id: Option<String>,
    pub documents: Vec<DocumentEntry>,
    pub callback_url: Option<String>,
    /// Outcome string the provider reported on callback, verbatim.
    pub callback_status: Option<String>,
    pub ltv_applied: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SigningJob {
    pub fn new(owner: Uuid, variant: SigningVariant, documents: Vec<DocumentEntry>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            variant,
            status: JobStatus::Initiated,
            process_id: None,
            sign_identity_id: None,
            documents,
            callback_url: None,
            callback_status: None,
            ltv_applied: false,
            error_message: None,
            created_at: now,
            initiated_at: Some(now),
            completed_at: None,
            expires_at: Some(now + chrono::Duration::minutes(60)),
        }
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Move the job to `next`, enforcing the lifecycle table. Terminal
    /// statuses never mutate again.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), SignError> {
        if self.status.is_terminal() {
            return Err(SignError::Terminal { from: self.status });
        }
        if !self.status.can_transition_to(next) {
            return Err(SignError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Identity re-confirmation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconfirmationStatus {
    Pending,
    Verified,
    Failed,
}

impl ReconfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SignError> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "VERIFIED" => Ok(Self::Verified),
            "FAILED" => Ok(Self::Failed),
            other => Err(SignError::Storage(format!(
                "unknown reconfirmation status '{other}' in storage"
            ))),
        }
    }
}

/// A biometric identity re-confirmation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityReconfirmation {
    pub id: Uuid,
    pub owner: Uuid,
    pub purpose: String,
    pub transaction_ref: String,
    pub status: ReconfirmationStatus,
    pub hint_kind: HintKind,
    /// Provider subject bound to the profile, captured when the challenge
    /// was issued. Comparison runs against this snapshot, not live state.
    pub expected_subject: Option<String>,
    /// Identity reference the provider returned after the challenge.
    pub returned_subject: Option<String>,
    pub subject_match: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl IdentityReconfirmation {
    pub fn new(
        owner: Uuid,
        purpose: impl Into<String>,
        transaction_ref: impl Into<String>,
        hint_kind: HintKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            purpose: purpose.into(),
            transaction_ref: transaction_ref.into(),
            status: ReconfirmationStatus::Pending,
            hint_kind,
            expected_subject: None,
            returned_subject: None,
            subject_match: None,
            created_at: Utc::now(),
            verified_at: None,
        }
    }
}

/// Which profile field is sent to the provider as the username hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HintKind {
    NationalId,
    Mobile,
    Email,
}

impl HintKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NationalId => "NATIONAL_ID",
            Self::Mobile => "MOBILE",
            Self::Email => "EMAIL",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SignError> {
        match value {
            "NATIONAL_ID" => Ok(Self::NationalId),
            "MOBILE" => Ok(Self::Mobile),
            "EMAIL" => Ok(Self::Email),
            other => Err(SignError::Storage(format!(
                "unknown hint kind '{other}' in storage"
            ))),
        }
    }
}

/// Identity classes the provider distinguishes. Visitors hold the weakest
/// proofing level and are barred from legally binding signatures and from
/// the national-id username hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityClass {
    Visitor,
    Resident,
    Citizen,
}

/// Session-bound view of the caller, supplied by the (out of scope) session
/// layer on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerProfile {
    pub id: Uuid,
    pub class: IdentityClass,
    /// Provider subject bound to this profile at account-linking time.
    pub provider_subject: Option<String>,
    pub national_id: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
}

impl SignerProfile {
    pub fn may_sign(&self) -> Result<(), SignError> {
        if self.class == IdentityClass::Visitor {
            return Err(SignError::validation(
                "visitor identities cannot sign legally binding documents",
            ));
        }
        Ok(())
    }

    /// Resolve the username hint for a re-confirmation challenge. The
    /// national-id hint is barred for visitors; an absent profile field is a
    /// validation error.
    pub fn resolve_hint(&self, kind: HintKind) -> Result<String, SignError> {
        let (field, value) = match kind {
            HintKind::NationalId => {
                if self.class == IdentityClass::Visitor {
                    return Err(SignError::validation(
                        "visitor identities cannot use the national-id hint",
                    ));
                }
                ("national id", self.national_id.as_deref())
            }
            HintKind::Mobile => ("mobile number", self.mobile.as_deref()),
            HintKind::Email => ("email", self.email.as_deref()),
        };
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
            _ => Err(SignError::Validation(format!(
                "no {field} on file for this profile"
            ))),
        }
    }
}

/// Validate raw document bytes before any remote call.
pub fn validate_pdf(bytes: &[u8]) -> Result<(), SignError> {
    const MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;
    if bytes.is_empty() {
        return Err(SignError::validation("document is empty"));
    }
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(SignError::validation("document exceeds 20 MiB limit"));
    }
    if bytes.len() < 5 || &bytes[0..4] != b"%PDF" {
        return Err(SignError::validation(
            "file does not appear to be a valid PDF",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_reaches_signed() {
        let mut job = SigningJob::new(Uuid::new_v4(), SigningVariant::Single, vec![]);
        job.transition(JobStatus::AwaitingUser).unwrap();
        job.transition(JobStatus::CallbackReceived).unwrap();
        job.transition(JobStatus::Completing).unwrap();
        job.transition(JobStatus::Signed).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_statuses_are_sinks() {
        for terminal in [
            JobStatus::Signed,
            JobStatus::Failed,
            JobStatus::FailedDocuments,
            JobStatus::Canceled,
            JobStatus::Expired,
        ] {
            let mut job = SigningJob::new(Uuid::new_v4(), SigningVariant::Hash, vec![]);
            job.status = terminal;
            for next in [
                JobStatus::Initiated,
                JobStatus::AwaitingUser,
                JobStatus::Completing,
                JobStatus::Signed,
                JobStatus::Failed,
            ] {
                let err = job.transition(next).unwrap_err();
                assert!(matches!(err, SignError::Terminal { .. }));
            }
        }
    }

    #[test]
    fn expiry_only_from_pre_approval_states() {
        assert!(JobStatus::Initiated.can_transition_to(JobStatus::Expired));
        assert!(JobStatus::AwaitingUser.can_transition_to(JobStatus::Expired));
        assert!(!JobStatus::CallbackReceived.can_transition_to(JobStatus::Expired));
        assert!(!JobStatus::Completing.can_transition_to(JobStatus::Expired));
    }

    #[test]
    fn rejects_skipping_callback() {
        let mut job = SigningJob::new(Uuid::new_v4(), SigningVariant::Multiple, vec![]);
        job.transition(JobStatus::AwaitingUser).unwrap();
        let err = job.transition(JobStatus::Signed).unwrap_err();
        assert!(matches!(err, SignError::IllegalTransition { .. }));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            JobStatus::Initiated,
            JobStatus::AwaitingUser,
            JobStatus::CallbackReceived,
            JobStatus::Completing,
            JobStatus::Signed,
            JobStatus::FailedDocuments,
            JobStatus::Failed,
            JobStatus::Canceled,
            JobStatus::Expired,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("BOGUS").is_err());
    }

    #[test]
    fn placement_bounds() {
        let good = Placement {
            page: 1,
            x: 40.0,
            y: 60.0,
            width: 150.0,
            height: 50.0,
        };
        assert!(good.validate().is_ok());
        assert_eq!(good.expression(), "1:[40,60,150,50]");

        let bad_page = Placement { page: 0, ..good };
        assert!(bad_page.validate().is_err());
        let bad_width = Placement {
            width: 5.0,
            ..good
        };
        assert!(bad_width.validate().is_err());
    }

    #[test]
    fn pdf_magic_is_enforced() {
        assert!(validate_pdf(b"%PDF-1.7 rest of file").is_ok());
        assert!(validate_pdf(b"").is_err());
        assert!(validate_pdf(b"GIF89a").is_err());
    }

    #[test]
    fn visitor_hint_rules() {
        let visitor = SignerProfile {
            id: Uuid::new_v4(),
            class: IdentityClass::Visitor,
            provider_subject: Some("subj".into()),
            national_id: Some("784-1234".into()),
            mobile: Some("+971500000000".into()),
            email: None,
        };
        assert!(visitor.may_sign().is_err());
        assert!(visitor.resolve_hint(HintKind::NationalId).is_err());
        assert_eq!(
            visitor.resolve_hint(HintKind::Mobile).unwrap(),
            "+971500000000"
        );
        assert!(visitor.resolve_hint(HintKind::Email).is_err());
    }
}
