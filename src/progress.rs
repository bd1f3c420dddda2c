// src/progress.rs
// Counter updates on the batch row, visible to the polling status endpoint.
// The production poolers in front of this database strip prepared
// statements, so these UPDATEs are assembled as plain text; every
// interpolated value is either an integer or a UUID re-rendered after
// parsing, never raw caller input.

use log::debug;
use uuid::Uuid;

use crate::db::PgPool;
use crate::error::PipelineError;
use crate::models::MatchCounters;

#[derive(Debug, Clone)]
pub struct ProgressReporter {
    batch_id: Uuid,
}

impl ProgressReporter {
    pub fn new(batch_id: Uuid) -> Self {
        ProgressReporter { batch_id }
    }

    /// Writes the running counters. Called once per flush; readers see an
    /// eventually-consistent view between flushes.
    pub async fn update(&self, pool: &PgPool, counters: &MatchCounters) -> Result<(), PipelineError> {
        let query = format!(
            "UPDATE reconciliation_batches \
             SET processed_count = {}, \
                 auto_matched_count = {}, \
                 needs_review_count = {}, \
                 unmatched_count = {}, \
                 updated_at = NOW() \
             WHERE id = '{}'",
            counters.processed,
            counters.auto_matched,
            counters.needs_review,
            counters.unmatched,
            self.batch_id,
        );

        self.execute(pool, &query).await?;
        debug!(
            "Progress batch_id={}: processed={} auto={} review={} unmatched={}",
            self.batch_id,
            counters.processed,
            counters.auto_matched,
            counters.needs_review,
            counters.unmatched
        );
        Ok(())
    }

    /// Final update: the total plus the closing counter tuple in a single
    /// statement. The batch status transition happens with job completion.
    pub async fn finalize(
        &self,
        pool: &PgPool,
        total_transactions: i64,
        counters: &MatchCounters,
    ) -> Result<(), PipelineError> {
        let query = format!(
            "UPDATE reconciliation_batches \
             SET total_transactions = {}, \
                 processed_count = {}, \
                 auto_matched_count = {}, \
                 needs_review_count = {}, \
                 unmatched_count = {}, \
                 updated_at = NOW() \
             WHERE id = '{}'",
            total_transactions,
            counters.processed,
            counters.auto_matched,
            counters.needs_review,
            counters.unmatched,
            self.batch_id,
        );

        self.execute(pool, &query).await
    }

    async fn execute(&self, pool: &PgPool, query: &str) -> Result<(), PipelineError> {
        let conn = pool
            .get()
            .await
            .map_err(|e| PipelineError::ProgressWrite(e.to_string()))?;
        conn.execute(query, &[])
            .await
            .map_err(|e| PipelineError::ProgressWrite(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolated_values_are_shape_safe() {
        // The UUID is stored parsed; its rendering is canonical hyphenated
        // lowercase hex, and the counters are plain integers. Nothing a
        // caller controls reaches the SQL text.
        let id = Uuid::parse_str("7e57d004-2b97-0e7a-b45f-5387367791cd").unwrap();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 36);
        assert!(rendered
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-'));

        let reporter = ProgressReporter::new(id);
        assert_eq!(reporter.batch_id, id);
    }
}
