// src/models.rs

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio_postgres::Row as PgRow;
use uuid::Uuid;

/// Lifecycle of a reconciliation job row.
/// queued -> processing -> (completed | failed); processing -> queued only
/// through stale recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Uploading => "uploading",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

/// Status of a stored bank transaction. The worker only ever writes the
/// three matcher buckets; the remaining states are reached through the
/// external action handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    AutoMatched,
    NeedsReview,
    Unmatched,
    Confirmed,
    External,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::AutoMatched => "auto_matched",
            TransactionStatus::NeedsReview => "needs_review",
            TransactionStatus::Unmatched => "unmatched",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::External => "external",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "auto_matched" => Some(TransactionStatus::AutoMatched),
            "needs_review" => Some(TransactionStatus::NeedsReview),
            "unmatched" => Some(TransactionStatus::Unmatched),
            "confirmed" => Some(TransactionStatus::Confirmed),
            "external" => Some(TransactionStatus::External),
            _ => None,
        }
    }

    /// Batch counter column tracking this status, if any. `pending` rows are
    /// transient and counted nowhere.
    pub fn counter_column(&self) -> Option<&'static str> {
        match self {
            TransactionStatus::Pending => None,
            TransactionStatus::AutoMatched => Some("auto_matched_count"),
            TransactionStatus::NeedsReview => Some("needs_review_count"),
            TransactionStatus::Unmatched => Some("unmatched_count"),
            TransactionStatus::Confirmed => Some("confirmed_count"),
            TransactionStatus::External => Some("external_count"),
        }
    }
}

/// Outcome class of a single match decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBucket {
    AutoMatched,
    NeedsReview,
    Unmatched,
}

impl MatchBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchBucket::AutoMatched => "auto_matched",
            MatchBucket::NeedsReview => "needs_review",
            MatchBucket::Unmatched => "unmatched",
        }
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        match self {
            MatchBucket::AutoMatched => TransactionStatus::AutoMatched,
            MatchBucket::NeedsReview => TransactionStatus::NeedsReview,
            MatchBucket::Unmatched => TransactionStatus::Unmatched,
        }
    }
}

/// Audit trail action kinds for match_audit_log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AutoMatched,
    Confirmed,
    Rejected,
    ManualMatched,
    MarkedExternal,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AutoMatched => "auto_matched",
            AuditAction::Confirmed => "confirmed",
            AuditAction::Rejected => "rejected",
            AuditAction::ManualMatched => "manual_matched",
            AuditAction::MarkedExternal => "marked_external",
        }
    }
}

/// A claimed reconciliation job row.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub file_path: Option<String>,
    pub file_content: Vec<u8>,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        let status_str: String = row.try_get("status")?;
        let status = JobStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("unknown job status: {}", status_str))?;
        Ok(Job {
            id: row.try_get("id")?,
            batch_id: row.try_get("batch_id")?,
            file_path: row.try_get("file_path")?,
            file_content: row.try_get("file_content")?,
            status,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Running counters the worker maintains for one batch. Only the three
/// matcher buckets move here; confirmed/external are action-path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchCounters {
    pub processed: i64,
    pub auto_matched: i64,
    pub needs_review: i64,
    pub unmatched: i64,
}

impl MatchCounters {
    pub fn record(&mut self, bucket: MatchBucket) {
        self.processed += 1;
        match bucket {
            MatchBucket::AutoMatched => self.auto_matched += 1,
            MatchBucket::NeedsReview => self.needs_review += 1,
            MatchBucket::Unmatched => self.unmatched += 1,
        }
    }
}
