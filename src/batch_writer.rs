// src/batch_writer.rs
// Buffers (row, decision) pairs and lands them in fixed-size groups, one
// multi-row INSERT per group. Counters only advance after a group commits,
// so the batch row never claims rows that are not stored.

use log::{debug, warn};
use postgres_types::ToSql;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::db::PgPool;
use crate::error::PipelineError;
use crate::ingest::TransactionRow;
use crate::matching::matcher::MatchDecision;
use crate::models::{MatchBucket, MatchCounters};
use crate::progress::ProgressReporter;

const COLUMNS_PER_ROW: usize = 9;

const INSERT_PREFIX: &str = "INSERT INTO bank_transactions (
    batch_id, transaction_date, description, amount, reference_number,
    status, matched_invoice_id, confidence_score, match_details
) VALUES ";

pub struct BatchWriter<'a> {
    pool: &'a PgPool,
    batch_id: Uuid,
    flush_size: usize,
    progress_every: i64,
    last_reported: i64,
    pending: Vec<(TransactionRow, MatchDecision)>,
    counters: MatchCounters,
    reporter: ProgressReporter,
}

/// Owned per-row values that do not live in the ingested row itself.
struct PreparedValues {
    status: &'static str,
    confidence: Option<Decimal>,
    details: Value,
}

impl<'a> BatchWriter<'a> {
    pub fn new(pool: &'a PgPool, batch_id: Uuid, flush_size: usize, progress_every: usize) -> Self {
        BatchWriter {
            pool,
            batch_id,
            flush_size: flush_size.max(1),
            progress_every: progress_every.max(1) as i64,
            last_reported: 0,
            pending: Vec::with_capacity(flush_size.max(1)),
            counters: MatchCounters::default(),
            reporter: ProgressReporter::new(batch_id),
        }
    }

    pub async fn push(
        &mut self,
        row: TransactionRow,
        decision: MatchDecision,
    ) -> Result<(), PipelineError> {
        self.pending.push((row, decision));
        if self.pending.len() >= self.flush_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Tail flush after ingestion; returns the final counters.
    pub async fn finish(mut self) -> Result<MatchCounters, PipelineError> {
        self.flush().await?;
        Ok(self.counters)
    }

    pub fn counters(&self) -> MatchCounters {
        self.counters
    }

    async fn flush(&mut self) -> Result<(), PipelineError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let prepared: Vec<PreparedValues> = self
            .pending
            .iter()
            .map(|(_, decision)| prepare_values(decision))
            .collect::<Result<_, _>>()?;

        let query = build_insert_sql(self.pending.len());

        let mut params: Vec<&(dyn ToSql + Sync)> =
            Vec::with_capacity(self.pending.len() * COLUMNS_PER_ROW);
        for ((row, decision), values) in self.pending.iter().zip(prepared.iter()) {
            params.push(&self.batch_id);
            params.push(&row.transaction_date);
            params.push(&row.description);
            params.push(&row.amount_value);
            params.push(&row.reference_number);
            params.push(&values.status);
            params.push(&decision.invoice_id);
            params.push(&values.confidence);
            params.push(&values.details);
        }

        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| PipelineError::BatchInsert(e.to_string()))?;
        // A single multi-row INSERT is atomic; either the whole group lands
        // or none of it does.
        conn.execute(query.as_str(), &params[..])
            .await
            .map_err(|e| PipelineError::BatchInsert(e.to_string()))?;

        for (_, decision) in &self.pending {
            self.counters.record(decision.bucket);
        }
        debug!(
            "Flushed {} rows for batch {} (processed={})",
            self.pending.len(),
            self.batch_id,
            self.counters.processed
        );
        self.pending.clear();

        // Progress is advisory between flushes; a failed write here must
        // not sink rows that already committed. The final exact counters
        // land with batch finalization regardless.
        if self.counters.processed - self.last_reported >= self.progress_every {
            if let Err(e) = self.reporter.update(self.pool, &self.counters).await {
                warn!("Failed to update progress for batch {}: {}", self.batch_id, e);
            }
            self.last_reported = self.counters.processed;
        }
        Ok(())
    }
}

fn prepare_values(decision: &MatchDecision) -> Result<PreparedValues, PipelineError> {
    let confidence = match decision.bucket {
        MatchBucket::Unmatched => None,
        // The final score is exact at two decimals; rebuild it as NUMERIC
        // from basis points rather than going through a float cast.
        _ => Some(Decimal::new((decision.confidence * 100.0).round() as i64, 2)),
    };
    let details = serde_json::to_value(&decision.details)
        .map_err(|e| PipelineError::BatchInsert(e.to_string()))?;
    Ok(PreparedValues {
        status: decision.bucket.transaction_status().as_str(),
        confidence,
        details,
    })
}

fn build_insert_sql(row_count: usize) -> String {
    let mut groups = Vec::with_capacity(row_count);
    for i in 0..row_count {
        let base = i * COLUMNS_PER_ROW;
        groups.push(format!(
            "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${})",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5,
            base + 6,
            base + 7,
            base + 8,
            base + 9
        ));
    }
    format!("{}{}", INSERT_PREFIX, groups.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::details::MatchDetails;

    #[test]
    fn test_insert_sql_placeholders() {
        let sql = build_insert_sql(2);
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9)"));
        assert!(sql.contains("($10, $11, $12, $13, $14, $15, $16, $17, $18)"));
        assert_eq!(sql.matches('(').count(), 3); // column list + two groups
    }

    #[test]
    fn test_prepared_values_by_bucket() {
        let matched = MatchDecision {
            invoice_id: Some(Uuid::from_u128(1)),
            confidence: 97.0,
            bucket: MatchBucket::AutoMatched,
            details: MatchDetails::no_candidates(),
        };
        let values = prepare_values(&matched).unwrap();
        assert_eq!(values.status, "auto_matched");
        assert_eq!(values.confidence, Some(Decimal::new(9700, 2)));

        let unmatched = MatchDecision {
            invoice_id: None,
            confidence: 12.34,
            bucket: MatchBucket::Unmatched,
            details: MatchDetails::no_candidates(),
        };
        let values = prepare_values(&unmatched).unwrap();
        assert_eq!(values.status, "unmatched");
        // Unmatched rows store no confidence at all.
        assert_eq!(values.confidence, None);
        assert_eq!(values.details["reason"], "no_invoice_with_matching_amount");
    }
}
