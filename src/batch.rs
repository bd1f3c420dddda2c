// src/batch.rs
// Read-side assembly of the batch status payload the UI polls. Counts come
// straight off the batch row (the worker keeps them fresh per flush);
// amount totals are aggregated from the stored transactions.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::TransactionStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusPayload {
    pub batch_id: String,
    pub status: String,
    pub processed_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_transactions: Option<i64>,
    pub counts: StatusCounts,
    /// Sum of transaction amounts per status, canonical decimal strings.
    pub totals: StatusTotals,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Present once total_transactions is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub auto_matched: i64,
    pub needs_review: i64,
    pub unmatched: i64,
    pub confirmed: i64,
    pub external: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTotals {
    pub auto_matched: String,
    pub needs_review: String,
    pub unmatched: String,
    pub confirmed: String,
    pub external: String,
}

impl Default for StatusTotals {
    fn default() -> Self {
        let zero = Decimal::new(0, 2).to_string();
        StatusTotals {
            auto_matched: zero.clone(),
            needs_review: zero.clone(),
            unmatched: zero.clone(),
            confirmed: zero.clone(),
            external: zero,
        }
    }
}

impl StatusTotals {
    fn set(&mut self, status: TransactionStatus, total: Decimal) {
        let rendered = total.to_string();
        match status {
            TransactionStatus::AutoMatched => self.auto_matched = rendered,
            TransactionStatus::NeedsReview => self.needs_review = rendered,
            TransactionStatus::Unmatched => self.unmatched = rendered,
            TransactionStatus::Confirmed => self.confirmed = rendered,
            TransactionStatus::External => self.external = rendered,
            TransactionStatus::Pending => {}
        }
    }
}

/// Fetches the status payload for one batch, or None if the batch does not
/// exist. Plain reads; never blocks the worker's counter updates.
pub async fn batch_status(pool: &PgPool, batch_id: Uuid) -> Result<Option<BatchStatusPayload>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for batch status")?;

    let batch_row = conn
        .query_opt(
            "SELECT id, status, processed_count, total_transactions,
                    auto_matched_count, needs_review_count, unmatched_count,
                    confirmed_count, external_count,
                    started_at, completed_at, updated_at
             FROM reconciliation_batches
             WHERE id = $1",
            &[&batch_id],
        )
        .await
        .context("Failed to query batch row")?;
    let Some(batch_row) = batch_row else {
        return Ok(None);
    };

    let mut totals = StatusTotals::default();
    let total_rows = conn
        .query(
            "SELECT status, COALESCE(SUM(amount), 0) AS total
             FROM bank_transactions
             WHERE batch_id = $1
             GROUP BY status",
            &[&batch_id],
        )
        .await
        .context("Failed to aggregate amount totals")?;
    for row in total_rows {
        let status_str: String = row.try_get("status")?;
        let status = TransactionStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("unknown transaction status: {}", status_str))?;
        let total: Decimal = row.try_get("total")?;
        totals.set(status, total);
    }

    let processed_count: i64 = batch_row.try_get("processed_count")?;
    let total_transactions: Option<i64> = batch_row.try_get("total_transactions")?;
    let progress_percent = progress_percent(processed_count, total_transactions);

    Ok(Some(BatchStatusPayload {
        batch_id: batch_id.to_string(),
        status: batch_row.try_get("status")?,
        processed_count,
        total_transactions,
        counts: StatusCounts {
            auto_matched: batch_row.try_get("auto_matched_count")?,
            needs_review: batch_row.try_get("needs_review_count")?,
            unmatched: batch_row.try_get("unmatched_count")?,
            confirmed: batch_row.try_get("confirmed_count")?,
            external: batch_row.try_get("external_count")?,
        },
        totals,
        started_at: batch_row.try_get("started_at")?,
        completed_at: batch_row.try_get("completed_at")?,
        updated_at: batch_row.try_get("updated_at")?,
        progress_percent,
    }))
}

fn progress_percent(processed: i64, total: Option<i64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some(processed as f64 / total as f64 * 100.0),
        // An empty-but-finalized batch is all the way done.
        Some(_) => Some(100.0),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, None), None);
        assert_eq!(progress_percent(250, Some(500)), Some(50.0));
        assert_eq!(progress_percent(500, Some(500)), Some(100.0));
        assert_eq!(progress_percent(0, Some(0)), Some(100.0));
    }

    #[test]
    fn test_payload_serialization_shape() {
        let payload = BatchStatusPayload {
            batch_id: Uuid::from_u128(9).to_string(),
            status: "processing".to_string(),
            processed_count: 250,
            total_transactions: None,
            counts: StatusCounts {
                auto_matched: 100,
                needs_review: 80,
                unmatched: 70,
                confirmed: 0,
                external: 0,
            },
            totals: StatusTotals::default(),
            started_at: Utc::now(),
            completed_at: None,
            updated_at: Utc::now(),
            progress_percent: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["processedCount"], 250);
        assert_eq!(value["counts"]["autoMatched"], 100);
        assert_eq!(value["counts"]["needsReview"], 80);
        assert_eq!(value["totals"]["unmatched"], "0.00");
        // Absent until finalization.
        assert!(value.get("totalTransactions").is_none());
        assert!(value.get("progressPercent").is_none());
        assert!(value.get("completedAt").is_none());
    }
}
