// src/actions.rs
// Store-level handlers for the human review actions. Every action locks the
// transaction row, validates the transition, moves the batch counters and
// writes its audit entry inside one database transaction. The worker only
// ever inserts rows, so the two paths never contend on the same row.

use log::info;
use postgres_types::ToSql;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio_postgres::Transaction as PgTransaction;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{AuditAction, TransactionStatus};

/// Confidence recorded when a human asserts a match directly.
const MANUAL_MATCH_CONFIDENCE_BP: i64 = 10_000;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("transaction_not_found: {0}")]
    TransactionNotFound(Uuid),

    #[error("invalid_status_transition: cannot {action} a transaction in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: &'static str,
    },

    /// Manual match target is paid or gone.
    #[error("invoice_not_matchable: {0}")]
    InvoiceNotMatchable(Uuid),

    #[error("unknown_transaction_status: {0}")]
    UnknownStatus(String),

    #[error("storage_error: {0}")]
    Storage(String),
}

impl From<tokio_postgres::Error> for ActionError {
    fn from(e: tokio_postgres::Error) -> Self {
        ActionError::Storage(e.to_string())
    }
}

struct LockedTransaction {
    id: Uuid,
    batch_id: Uuid,
    status: TransactionStatus,
    matched_invoice_id: Option<Uuid>,
}

/// Accept a proposed match. Valid from auto_matched or needs_review.
pub async fn confirm_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    actor: &str,
) -> Result<(), ActionError> {
    let mut conn = get_conn(pool).await?;
    let tx = conn.transaction().await?;

    let locked = lock_transaction(&tx, transaction_id).await?;
    require_reviewable("confirm", &locked)?;

    tx.execute(
        "UPDATE bank_transactions SET status = 'confirmed' WHERE id = $1",
        &[&locked.id],
    )
    .await?;
    move_counters(
        &tx,
        locked.batch_id,
        locked.status,
        TransactionStatus::Confirmed,
        1,
    )
    .await?;
    insert_audit(
        &tx,
        locked.id,
        AuditAction::Confirmed,
        locked.matched_invoice_id,
        locked.matched_invoice_id,
        actor,
        None,
    )
    .await?;

    tx.commit().await?;
    info!("Transaction {} confirmed by {}", transaction_id, actor);
    Ok(())
}

/// Decline a proposed match. The row returns to unmatched with its proposal
/// cleared.
pub async fn reject_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    actor: &str,
    reason: Option<&str>,
) -> Result<(), ActionError> {
    let mut conn = get_conn(pool).await?;
    let tx = conn.transaction().await?;

    let locked = lock_transaction(&tx, transaction_id).await?;
    require_reviewable("reject", &locked)?;

    tx.execute(
        "UPDATE bank_transactions
         SET status = 'unmatched', matched_invoice_id = NULL, confidence_score = NULL
         WHERE id = $1",
        &[&locked.id],
    )
    .await?;
    move_counters(
        &tx,
        locked.batch_id,
        locked.status,
        TransactionStatus::Unmatched,
        1,
    )
    .await?;
    insert_audit(
        &tx,
        locked.id,
        AuditAction::Rejected,
        locked.matched_invoice_id,
        None,
        actor,
        reason,
    )
    .await?;

    tx.commit().await?;
    info!("Transaction {} rejected by {}", transaction_id, actor);
    Ok(())
}

/// Attach an invoice by hand. Allowed from any status as long as the target
/// invoice has not been paid; the result is a confirmed match at 100.00.
pub async fn manual_match(
    pool: &PgPool,
    transaction_id: Uuid,
    invoice_id: Uuid,
    actor: &str,
) -> Result<(), ActionError> {
    let mut conn = get_conn(pool).await?;
    let tx = conn.transaction().await?;

    let locked = lock_transaction(&tx, transaction_id).await?;

    let invoice_row = tx
        .query_opt(
            "SELECT status, paid_at FROM invoices WHERE id = $1",
            &[&invoice_id],
        )
        .await?;
    let Some(invoice_row) = invoice_row else {
        return Err(ActionError::InvoiceNotMatchable(invoice_id));
    };
    let invoice_status: String = invoice_row.try_get("status")?;
    let paid_at: Option<chrono::DateTime<chrono::Utc>> = invoice_row.try_get("paid_at")?;
    if invoice_status == "paid" || paid_at.is_some() {
        return Err(ActionError::InvoiceNotMatchable(invoice_id));
    }

    let confidence = Decimal::new(MANUAL_MATCH_CONFIDENCE_BP, 2);
    tx.execute(
        "UPDATE bank_transactions
         SET status = 'confirmed', matched_invoice_id = $1, confidence_score = $2
         WHERE id = $3",
        &[&invoice_id, &confidence, &locked.id],
    )
    .await?;
    move_counters(
        &tx,
        locked.batch_id,
        locked.status,
        TransactionStatus::Confirmed,
        1,
    )
    .await?;
    insert_audit(
        &tx,
        locked.id,
        AuditAction::ManualMatched,
        locked.matched_invoice_id,
        Some(invoice_id),
        actor,
        None,
    )
    .await?;

    tx.commit().await?;
    info!(
        "Transaction {} manually matched to invoice {} by {}",
        transaction_id, invoice_id, actor
    );
    Ok(())
}

/// Flag a row as not belonging to any invoice (payroll, fees, ...). Allowed
/// from any non-confirmed status.
pub async fn mark_external(
    pool: &PgPool,
    transaction_id: Uuid,
    actor: &str,
    reason: Option<&str>,
) -> Result<(), ActionError> {
    let mut conn = get_conn(pool).await?;
    let tx = conn.transaction().await?;

    let locked = lock_transaction(&tx, transaction_id).await?;
    if locked.status == TransactionStatus::Confirmed {
        return Err(ActionError::InvalidTransition {
            action: "mark_external",
            status: locked.status.as_str(),
        });
    }

    tx.execute(
        "UPDATE bank_transactions
         SET status = 'external', matched_invoice_id = NULL, confidence_score = NULL
         WHERE id = $1",
        &[&locked.id],
    )
    .await?;
    move_counters(
        &tx,
        locked.batch_id,
        locked.status,
        TransactionStatus::External,
        1,
    )
    .await?;
    insert_audit(
        &tx,
        locked.id,
        AuditAction::MarkedExternal,
        locked.matched_invoice_id,
        None,
        actor,
        reason,
    )
    .await?;

    tx.commit().await?;
    info!("Transaction {} marked external by {}", transaction_id, actor);
    Ok(())
}

/// Confirm every auto_matched row of a batch at once. Returns the number of
/// rows moved; each one gets its own audit entry.
pub async fn bulk_confirm(
    pool: &PgPool,
    batch_id: Uuid,
    actor: &str,
) -> Result<u64, ActionError> {
    let mut conn = get_conn(pool).await?;
    let tx = conn.transaction().await?;

    let rows = tx
        .query(
            "UPDATE bank_transactions
             SET status = 'confirmed'
             WHERE batch_id = $1 AND status = 'auto_matched'
             RETURNING id, matched_invoice_id",
            &[&batch_id],
        )
        .await?;

    if rows.is_empty() {
        tx.commit().await?;
        return Ok(0);
    }

    let changed = rows.len() as i64;
    move_counters(
        &tx,
        batch_id,
        TransactionStatus::AutoMatched,
        TransactionStatus::Confirmed,
        changed,
    )
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let transaction_id: Uuid = row.try_get("id")?;
        let invoice_id: Option<Uuid> = row.try_get("matched_invoice_id")?;
        entries.push((transaction_id, invoice_id));
    }
    insert_audit_batch(&tx, &entries, AuditAction::Confirmed, actor).await?;

    tx.commit().await?;
    info!(
        "Bulk-confirmed {} transaction(s) in batch {} by {}",
        changed, batch_id, actor
    );
    Ok(changed as u64)
}

async fn get_conn(
    pool: &PgPool,
) -> Result<bb8::PooledConnection<'_, bb8_postgres::PostgresConnectionManager<tokio_postgres::NoTls>>, ActionError>
{
    pool.get()
        .await
        .map_err(|e| ActionError::Storage(e.to_string()))
}

async fn lock_transaction(
    tx: &PgTransaction<'_>,
    transaction_id: Uuid,
) -> Result<LockedTransaction, ActionError> {
    let row = tx
        .query_opt(
            "SELECT id, batch_id, status, matched_invoice_id
             FROM bank_transactions
             WHERE id = $1
             FOR UPDATE",
            &[&transaction_id],
        )
        .await?;
    let Some(row) = row else {
        return Err(ActionError::TransactionNotFound(transaction_id));
    };

    let status_str: String = row.try_get("status")?;
    let status = TransactionStatus::from_str(&status_str)
        .ok_or(ActionError::UnknownStatus(status_str))?;
    Ok(LockedTransaction {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        status,
        matched_invoice_id: row.try_get("matched_invoice_id")?,
    })
}

/// Confirm and reject only apply to rows the matcher proposed.
fn require_reviewable(
    action: &'static str,
    locked: &LockedTransaction,
) -> Result<(), ActionError> {
    match locked.status {
        TransactionStatus::AutoMatched | TransactionStatus::NeedsReview => Ok(()),
        other => Err(ActionError::InvalidTransition {
            action,
            status: other.as_str(),
        }),
    }
}

/// Shifts `count` rows between two batch status counters in place. Column
/// names come from the status enum, never from input.
async fn move_counters(
    tx: &PgTransaction<'_>,
    batch_id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
    count: i64,
) -> Result<(), ActionError> {
    let Some(query) = counter_move_sql(from, to) else {
        return Ok(());
    };
    tx.execute(query.as_str(), &[&count, &batch_id]).await?;
    Ok(())
}

fn counter_move_sql(from: TransactionStatus, to: TransactionStatus) -> Option<String> {
    let from_col = from.counter_column();
    let to_col = to.counter_column();
    match (from_col, to_col) {
        (Some(f), Some(t)) if f != t => Some(format!(
            "UPDATE reconciliation_batches \
             SET {f} = {f} - $1, {t} = {t} + $1, updated_at = NOW() \
             WHERE id = $2",
            f = f,
            t = t
        )),
        (None, Some(t)) => Some(format!(
            "UPDATE reconciliation_batches \
             SET {t} = {t} + $1, updated_at = NOW() \
             WHERE id = $2",
            t = t
        )),
        _ => None,
    }
}

async fn insert_audit(
    tx: &PgTransaction<'_>,
    transaction_id: Uuid,
    action: AuditAction,
    previous_invoice_id: Option<Uuid>,
    new_invoice_id: Option<Uuid>,
    actor: &str,
    reason: Option<&str>,
) -> Result<(), ActionError> {
    tx.execute(
        "INSERT INTO match_audit_log
             (id, transaction_id, action, previous_invoice_id, new_invoice_id, actor, reason, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        &[
            &Uuid::new_v4(),
            &transaction_id,
            &action.as_str(),
            &previous_invoice_id,
            &new_invoice_id,
            &actor,
            &reason,
        ],
    )
    .await?;
    Ok(())
}

/// One audit row per changed transaction, landed as a single multi-row
/// insert.
async fn insert_audit_batch(
    tx: &PgTransaction<'_>,
    entries: &[(Uuid, Option<Uuid>)],
    action: AuditAction,
    actor: &str,
) -> Result<(), ActionError> {
    if entries.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = entries.iter().map(|_| Uuid::new_v4()).collect();
    let action_str = action.as_str();

    let mut groups = Vec::with_capacity(entries.len());
    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(entries.len() * 6);
    for (i, ((transaction_id, invoice_id), id)) in entries.iter().zip(ids.iter()).enumerate() {
        let base = i * 6;
        groups.push(format!(
            "(${}, ${}, ${}, ${}, ${}, ${}, NOW())",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5,
            base + 6
        ));
        params.push(id);
        params.push(transaction_id);
        params.push(&action_str);
        params.push(invoice_id);
        params.push(invoice_id);
        params.push(&actor);
    }

    let query = format!(
        "INSERT INTO match_audit_log
             (id, transaction_id, action, previous_invoice_id, new_invoice_id, actor, created_at)
         VALUES {}",
        groups.join(", ")
    );
    tx.execute(query.as_str(), &params[..]).await?;
    Ok(())
}
