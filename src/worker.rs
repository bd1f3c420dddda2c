// src/worker.rs
// The worker loop: claim a job, reconcile its CSV against the invoice
// cache, land the rows, finalize the batch. One job at a time, rows in CSV
// order; concurrency lives between worker processes, not inside one.

use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::watch;
use uuid::Uuid;

use crate::batch_writer::BatchWriter;
use crate::config::{MatcherConfig, WorkerConfig};
use crate::db::PgPool;
use crate::error::PipelineError;
use crate::ingest::CsvIngester;
use crate::invoice_cache::InvoiceCache;
use crate::matching::matcher::match_transaction;
use crate::models::{Job, MatchCounters};
use crate::progress::ProgressReporter;
use crate::queue;

pub struct Worker {
    pool: PgPool,
    config: WorkerConfig,
    matcher_config: MatcherConfig,
}

struct JobOutcome {
    counters: MatchCounters,
    invalid_rows: u64,
}

impl Worker {
    pub fn new(pool: PgPool, config: WorkerConfig, matcher_config: MatcherConfig) -> Self {
        Worker {
            pool,
            config,
            matcher_config,
        }
    }

    /// Polls until `shutdown` flips. A job in flight is finished before the
    /// loop exits; anything harder than that (SIGKILL, crash) is covered by
    /// stale-job recovery on the next startup.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Worker started");
        info!("Poll interval: {:?}", self.config.poll_interval);
        info!("Stale threshold: {:?}", self.config.stale_threshold);
        info!("Max attempts: {}", self.config.max_attempts);

        if let Err(e) = queue::recover_stale_jobs(&self.pool, self.config.stale_threshold).await {
            warn!("Stale job recovery failed at startup: {:#}", e);
        }

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, worker loop exiting");
                return Ok(());
            }

            match queue::claim_job(&self.pool, self.config.stale_threshold).await {
                Ok(Some(job)) => self.process_job(&job).await,
                Ok(None) => self.idle(&mut shutdown).await,
                Err(e) => {
                    // Transient store trouble; the poll loop is the retry.
                    warn!("Error claiming job: {:#}", e);
                    self.idle(&mut shutdown).await;
                }
            }
        }
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn process_job(&self, job: &Job) {
        let started = Instant::now();
        info!("Processing job: id={}, batch_id={}", job.id, job.batch_id);

        self.mark_batch_processing(job.batch_id).await;

        match self.run_reconciliation(job).await {
            Ok(outcome) => {
                if let Err(e) = queue::complete_job(&self.pool, job).await {
                    warn!("Failed to record job completion: {:#}", e);
                    return;
                }
                info!(
                    "Job done: batch_id={}, processed={}, invalid={}, auto={}, review={}, unmatched={}, duration={:.2?}",
                    job.batch_id,
                    outcome.counters.processed,
                    outcome.invalid_rows,
                    outcome.counters.auto_matched,
                    outcome.counters.needs_review,
                    outcome.counters.unmatched,
                    started.elapsed()
                );
            }
            Err(e) => {
                warn!(
                    "Job failed: id={}, batch_id={}, error={}, duration={:.2?}",
                    job.id,
                    job.batch_id,
                    e,
                    started.elapsed()
                );
                if let Err(e2) =
                    queue::fail_job(&self.pool, job, &e.to_string(), self.config.max_attempts).await
                {
                    warn!("Failed to record job failure: {:#}", e2);
                }
            }
        }
    }

    /// Batch leaves `uploading` the moment a worker picks its job up. A
    /// batch already past that state is left alone.
    async fn mark_batch_processing(&self, batch_id: Uuid) {
        let result = match self.pool.get().await {
            Ok(conn) => {
                conn.execute(
                    "UPDATE reconciliation_batches
                     SET status = 'processing', updated_at = NOW()
                     WHERE id = $1 AND status = 'uploading'",
                    &[&batch_id],
                )
                .await
            }
            Err(e) => {
                warn!("Failed to get connection for batch status update: {}", e);
                return;
            }
        };
        if let Err(e) = result {
            warn!("Failed to update batch status: {}", e);
        }
    }

    async fn run_reconciliation(&self, job: &Job) -> Result<JobOutcome, PipelineError> {
        if job.file_content.is_empty() {
            return Err(PipelineError::FileContentMissing);
        }

        // A reclaimed job may have rows from a crashed attempt; clear them
        // so re-ingesting cannot duplicate.
        self.clear_partial_rows(job.batch_id).await?;

        let cache_start = Instant::now();
        let cache = InvoiceCache::load(&self.pool).await?;
        debug!(
            "Invoice cache ready for batch {} ({} invoices, {:.2?})",
            job.batch_id,
            cache.len(),
            cache_start.elapsed()
        );

        let mut ingester = CsvIngester::new(&job.file_content)?;
        let mut writer = BatchWriter::new(
            &self.pool,
            job.batch_id,
            self.config.batch_flush_size,
            self.config.progress_every,
        );
        let mut reserved: HashSet<Uuid> = HashSet::new();

        while let Some(row) = ingester.next_row() {
            let decision = decide_and_reserve(&cache, &mut reserved, &row, &self.matcher_config);
            writer.push(row, decision).await?;
        }

        let counters = writer.finish().await?;
        let invalid_rows = ingester.invalid_rows();

        let reporter = ProgressReporter::new(job.batch_id);
        reporter
            .finalize(&self.pool, counters.processed, &counters)
            .await?;

        info!(
            "Reconciliation complete: batch_id={}, total={}, invalid_rows={}",
            job.batch_id, counters.processed, invalid_rows
        );
        Ok(JobOutcome {
            counters,
            invalid_rows,
        })
    }

    async fn clear_partial_rows(&self, batch_id: Uuid) -> Result<(), PipelineError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| PipelineError::PartialRowsCleanup(e.to_string()))?;
        let deleted = conn
            .execute(
                "DELETE FROM bank_transactions WHERE batch_id = $1",
                &[&batch_id],
            )
            .await
            .map_err(|e| PipelineError::PartialRowsCleanup(e.to_string()))?;
        if deleted > 0 {
            info!(
                "Cleared {} partial row(s) from a prior attempt for batch {}",
                deleted, batch_id
            );
        }
        Ok(())
    }
}

/// One row through the matcher: pick unreserved same-amount candidates,
/// decide, and reserve the chosen invoice for the rest of the batch.
/// auto_matched and needs_review both reserve; unmatched never does.
pub fn decide_and_reserve(
    cache: &InvoiceCache,
    reserved: &mut HashSet<Uuid>,
    row: &crate::ingest::TransactionRow,
    config: &MatcherConfig,
) -> crate::matching::matcher::MatchDecision {
    let candidates = cache.candidates_for_amount(&row.amount, reserved);
    let decision = match_transaction(
        &row.description,
        &row.amount,
        row.transaction_date,
        &candidates,
        config,
    );
    if let Some(invoice_id) = decision.invoice_id {
        reserved.insert(invoice_id);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::CsvIngester;
    use crate::invoice_cache::InvoiceCandidate;
    use crate::matching::normalize::normalize_customer_name;
    use crate::models::MatchBucket;
    use chrono::NaiveDate;

    fn invoice(id: u128, name: &str, amount: &str, due: NaiveDate) -> InvoiceCandidate {
        InvoiceCandidate {
            id: Uuid::from_u128(id),
            invoice_number: format!("INV-{:03}", id),
            amount: amount.to_string(),
            due_date: due,
            customer_name: name.to_string(),
            normalized_name: normalize_customer_name(name),
        }
    }

    fn run_pipeline(
        cache: &InvoiceCache,
        csv: &[u8],
    ) -> Vec<crate::matching::matcher::MatchDecision> {
        let config = MatcherConfig::default();
        let mut ingester = CsvIngester::new(csv).unwrap();
        let mut reserved = HashSet::new();
        let mut decisions = Vec::new();
        while let Some(row) = ingester.next_row() {
            decisions.push(decide_and_reserve(cache, &mut reserved, &row, &config));
        }
        decisions
    }

    #[test]
    fn test_reservation_prevents_duplicate_matches() {
        let due = NaiveDate::from_ymd_opt(2024, 12, 10).unwrap();
        let cache = InvoiceCache::build(vec![
            invoice(1, "Sarah Adams", "450.00", due),
            invoice(2, "Sarah Adams", "450.00", due),
        ]);

        // Three identical rows against two identical invoices: the first
        // two each take one invoice, the third finds an empty pool.
        let csv = b"transaction_date,description,amount\n\
                    2024-12-10,SARAH ADAMS,450.00\n\
                    2024-12-10,SARAH ADAMS,450.00\n\
                    2024-12-10,SARAH ADAMS,450.00\n";
        let decisions = run_pipeline(&cache, csv);

        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions[0].invoice_id, Some(Uuid::from_u128(1)));
        assert_eq!(decisions[1].invoice_id, Some(Uuid::from_u128(2)));
        assert_eq!(decisions[2].invoice_id, None);
        assert_eq!(decisions[2].bucket, MatchBucket::Unmatched);

        // No invoice referenced twice.
        let matched: Vec<Uuid> = decisions.iter().filter_map(|d| d.invoice_id).collect();
        let unique: HashSet<Uuid> = matched.iter().copied().collect();
        assert_eq!(matched.len(), unique.len());
    }

    #[test]
    fn test_unmatched_rows_do_not_reserve() {
        let due = NaiveDate::from_ymd_opt(2024, 12, 10).unwrap();
        let cache = InvoiceCache::build(vec![invoice(1, "Sarah Adams", "450.00", due)]);

        // The first row's name is nothing like the invoice and stays
        // unmatched; the invoice is still available for the second row.
        let csv = b"transaction_date,description,amount\n\
                    2024-12-10,ZZQXW KLMPT,450.00\n\
                    2024-12-10,SARAH ADAMS,450.00\n";
        let decisions = run_pipeline(&cache, csv);

        assert_eq!(decisions[0].bucket, MatchBucket::Unmatched);
        assert_eq!(decisions[0].invoice_id, None);
        assert_eq!(decisions[1].invoice_id, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn test_pipeline_is_deterministic_across_runs() {
        let due = NaiveDate::from_ymd_opt(2024, 12, 10).unwrap();
        let cache = InvoiceCache::build(vec![
            invoice(1, "John Smith", "450.00", due),
            invoice(2, "Jane Smith", "450.00", due),
            invoice(3, "Sarah Adams", "1250.00", due),
        ]);

        let csv = b"transaction_date,description,amount\n\
                    2024-12-10,JOHN SMITH,450.00\n\
                    2024-12-08,ADAMS SARAH,1250.00\n\
                    2024-12-10,JANE SMITH,450.00\n\
                    2024-12-10,NOBODY AT ALL,77.77\n";

        let first = run_pipeline(&cache, csv);
        for _ in 0..10 {
            // A fresh, identically-built cache must yield identical
            // decisions, bit for bit.
            let rebuilt = InvoiceCache::build(vec![
                invoice(2, "Jane Smith", "450.00", due),
                invoice(3, "Sarah Adams", "1250.00", due),
                invoice(1, "John Smith", "450.00", due),
            ]);
            let again = run_pipeline(&rebuilt, csv);
            assert_eq!(again, first);
        }

        assert_eq!(first[0].invoice_id, Some(Uuid::from_u128(1)));
        assert_eq!(first[1].invoice_id, Some(Uuid::from_u128(3)));
        assert_eq!(first[2].invoice_id, Some(Uuid::from_u128(2)));
        assert_eq!(first[3].invoice_id, None);
    }
}
