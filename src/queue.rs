// src/queue.rs
// Single-table work queue over reconciliation_jobs. The claim runs SELECT
// ... FOR UPDATE SKIP LOCKED inside a transaction, which is the whole
// coordination story: any number of workers can poll the same table and a
// job is only ever handed out once.

use anyhow::{Context, Result};
use log::{info, warn};
use std::time::Duration;
use tokio_postgres::GenericClient;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{Job, JobStatus};

const CLAIM_SQL: &str = "
    SELECT id, batch_id, file_path, file_content, status, attempts, last_error,
           created_at, updated_at
    FROM reconciliation_jobs
    WHERE status = 'queued'
       OR (status = 'processing' AND updated_at < NOW() - $1::interval)
    ORDER BY created_at ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
";

const MARK_PROCESSING_SQL: &str = "
    UPDATE reconciliation_jobs
    SET status = 'processing',
        attempts = attempts + 1,
        updated_at = NOW()
    WHERE id = $1
";

fn stale_interval(stale_threshold: Duration) -> String {
    format!("{} seconds", stale_threshold.as_secs())
}

/// Enqueues a job for a batch. Exposed on a generic client so the upload
/// path can run it inside the same transaction that creates the batch row.
pub async fn enqueue_job(
    client: &impl GenericClient,
    batch_id: Uuid,
    file_path: Option<&str>,
    file_content: &[u8],
) -> Result<Uuid> {
    let job_id = Uuid::new_v4();
    client
        .execute(
            "INSERT INTO reconciliation_jobs
                 (id, batch_id, file_path, file_content, status, attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'queued', 0, NOW(), NOW())",
            &[&job_id, &batch_id, &file_path, &file_content],
        )
        .await
        .context("Failed to enqueue reconciliation job")?;
    Ok(job_id)
}

/// Claims the oldest runnable job, if any. Stale `processing` rows (an
/// earlier worker died mid-job) are claimable alongside `queued` ones.
pub async fn claim_job(pool: &PgPool, stale_threshold: Duration) -> Result<Option<Job>> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for claim")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start claim transaction")?;

    let row = tx
        .query_opt(CLAIM_SQL, &[&stale_interval(stale_threshold)])
        .await
        .context("Failed to query for claimable jobs")?;

    let Some(row) = row else {
        // Nothing runnable; the open transaction rolls back on drop.
        return Ok(None);
    };

    let mut job = Job::from_row(&row)?;
    tx.execute(MARK_PROCESSING_SQL, &[&job.id])
        .await
        .context("Failed to mark job processing")?;
    tx.commit().await.context("Failed to commit claim")?;

    job.status = JobStatus::Processing;
    job.attempts += 1;
    info!(
        "Claimed job: id={}, batch_id={}, attempt={}",
        job.id, job.batch_id, job.attempts
    );
    Ok(Some(job))
}

/// Marks the job done and completes the owning batch, atomically.
pub async fn complete_job(pool: &PgPool, job: &Job) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for completion")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start completion transaction")?;

    tx.execute(
        "UPDATE reconciliation_jobs
         SET status = 'completed', updated_at = NOW()
         WHERE id = $1",
        &[&job.id],
    )
    .await
    .context("Failed to mark job completed")?;

    tx.execute(
        "UPDATE reconciliation_batches
         SET status = 'completed', completed_at = NOW(), updated_at = NOW()
         WHERE id = $1",
        &[&job.batch_id],
    )
    .await
    .context("Failed to mark batch completed")?;

    tx.commit().await.context("Failed to commit completion")?;
    info!("Job completed: id={}, batch_id={}", job.id, job.batch_id);
    Ok(())
}

/// Records a failure. Below the attempt limit the job goes back to the
/// queue; at the limit the job and its batch both become terminal.
pub async fn fail_job(pool: &PgPool, job: &Job, error: &str, max_attempts: i32) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for failure")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start failure transaction")?;

    let should_retry = job.attempts < max_attempts;

    if should_retry {
        tx.execute(
            "UPDATE reconciliation_jobs
             SET status = 'queued', last_error = $1, updated_at = NOW()
             WHERE id = $2",
            &[&error, &job.id],
        )
        .await
        .context("Failed to re-queue job")?;
    } else {
        tx.execute(
            "UPDATE reconciliation_jobs
             SET status = 'failed', last_error = $1, updated_at = NOW()
             WHERE id = $2",
            &[&error, &job.id],
        )
        .await
        .context("Failed to mark job failed")?;

        tx.execute(
            "UPDATE reconciliation_batches
             SET status = 'failed', completed_at = NOW(), updated_at = NOW()
             WHERE id = $1",
            &[&job.batch_id],
        )
        .await
        .context("Failed to mark batch failed")?;
    }

    tx.commit().await.context("Failed to commit failure")?;

    if should_retry {
        warn!(
            "Job re-queued after failure: id={}, attempt={}, error={}",
            job.id, job.attempts, error
        );
    } else {
        warn!(
            "Job failed permanently: id={}, batch_id={}, error={}",
            job.id, job.batch_id, error
        );
    }
    Ok(())
}

/// Returns abandoned `processing` jobs to the queue without charging an
/// attempt. Run once at worker startup.
pub async fn recover_stale_jobs(pool: &PgPool, stale_threshold: Duration) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for stale recovery")?;

    let recovered = conn
        .execute(
            "UPDATE reconciliation_jobs
             SET status = 'queued', updated_at = NOW()
             WHERE status = 'processing'
               AND updated_at < NOW() - $1::interval",
            &[&stale_interval(stale_threshold)],
        )
        .await
        .context("Failed to recover stale jobs")?;

    if recovered > 0 {
        info!("Recovered {} stale job(s)", recovered);
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_interval_rendering() {
        assert_eq!(stale_interval(Duration::from_secs(600)), "600 seconds");
        assert_eq!(stale_interval(Duration::from_secs(90)), "90 seconds");
    }

    #[test]
    fn test_claim_sql_shape() {
        // The two load-bearing clauses of the at-most-once protocol.
        assert!(CLAIM_SQL.contains("FOR UPDATE SKIP LOCKED"));
        assert!(CLAIM_SQL.contains("ORDER BY created_at ASC"));
        assert!(CLAIM_SQL.contains("LIMIT 1"));
    }
}
