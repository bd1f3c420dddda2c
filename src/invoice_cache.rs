// src/invoice_cache.rs
// One-time, eager load of every invoice eligible for matching, indexed by
// amount string. Bucket order is canonical (due_date, then id) no matter
// what order the database returned rows in; the matcher's determinism
// starts here.

use chrono::NaiveDate;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::PgPool;
use crate::error::PipelineError;
use crate::matching::normalize::normalize_customer_name;

/// Eligibility filter: an invoice can match while it is out with the
/// customer and unpaid.
const ELIGIBLE_INVOICES_SQL: &str = "
    SELECT id, invoice_number, amount::text AS amount, due_date, customer_name
    FROM invoices
    WHERE status IN ('sent', 'overdue')
      AND paid_at IS NULL
";

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceCandidate {
    pub id: Uuid,
    pub invoice_number: String,
    /// Canonical decimal string; matching is exact string equality.
    pub amount: String,
    pub due_date: NaiveDate,
    pub customer_name: String,
    pub normalized_name: String,
}

pub struct InvoiceCache {
    by_amount: HashMap<String, Vec<Arc<InvoiceCandidate>>>,
    by_id: HashMap<Uuid, Arc<InvoiceCandidate>>,
}

impl InvoiceCache {
    /// Loads all eligible invoices. Materializes everything up front; up to
    /// ~100K invoices fit comfortably and the job never re-queries.
    pub async fn load(pool: &PgPool) -> Result<Self, PipelineError> {
        let conn = pool
            .get()
            .await
            .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?;

        let rows = conn
            .query(ELIGIBLE_INVOICES_SQL, &[])
            .await
            .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            let customer_name: String = row
                .try_get("customer_name")
                .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?;
            invoices.push(InvoiceCandidate {
                id: row
                    .try_get("id")
                    .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?,
                invoice_number: row
                    .try_get("invoice_number")
                    .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?,
                amount: row
                    .try_get("amount")
                    .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?,
                due_date: row
                    .try_get("due_date")
                    .map_err(|e| PipelineError::InvoiceCacheLoad(e.to_string()))?,
                normalized_name: normalize_customer_name(&customer_name),
                customer_name,
            });
        }

        let cache = Self::build(invoices);
        info!(
            "Loaded {} eligible invoices into cache ({} amount buckets)",
            cache.len(),
            cache.by_amount.len()
        );
        Ok(cache)
    }

    /// Indexes pre-built candidates. Split from `load` so ordering and
    /// lookup behavior are testable without a database.
    pub fn build(mut invoices: Vec<InvoiceCandidate>) -> Self {
        // Canonical global order first; buckets then inherit it, but each
        // bucket is re-sorted anyway so nothing depends on insertion order.
        invoices.sort_by(|a, b| {
            a.amount
                .cmp(&b.amount)
                .then_with(|| a.due_date.cmp(&b.due_date))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut by_amount: HashMap<String, Vec<Arc<InvoiceCandidate>>> = HashMap::new();
        let mut by_id: HashMap<Uuid, Arc<InvoiceCandidate>> = HashMap::new();

        for invoice in invoices {
            let candidate = Arc::new(invoice);
            by_amount
                .entry(candidate.amount.clone())
                .or_default()
                .push(Arc::clone(&candidate));
            by_id.insert(candidate.id, candidate);
        }

        for bucket in by_amount.values_mut() {
            bucket.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        }

        debug!("Invoice cache built: {} invoices", by_id.len());
        InvoiceCache { by_amount, by_id }
    }

    /// Same-amount candidates not yet reserved within the running batch, in
    /// canonical bucket order.
    pub fn candidates_for_amount<'a>(
        &'a self,
        amount: &str,
        reserved: &HashSet<Uuid>,
    ) -> Vec<&'a InvoiceCandidate> {
        match self.by_amount.get(amount) {
            Some(bucket) => bucket
                .iter()
                .filter(|c| !reserved.contains(&c.id))
                .map(|c| c.as_ref())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&InvoiceCandidate> {
        self.by_id.get(id).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

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

    #[test]
    fn test_bucket_order_is_canonical() {
        // Deliberately shuffled input; bucket order must come out
        // (due_date asc, id asc) regardless.
        let cache = InvoiceCache::build(vec![
            invoice(3, "Carol", "450.00", date(2024, 12, 12)),
            invoice(2, "Bob", "450.00", date(2024, 12, 10)),
            invoice(1, "Alice", "450.00", date(2024, 12, 10)),
            invoice(4, "Dave", "100.00", date(2024, 12, 1)),
        ]);

        let reserved = HashSet::new();
        let bucket = cache.candidates_for_amount("450.00", &reserved);
        let ids: Vec<Uuid> = bucket.iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)]
        );
    }

    #[test]
    fn test_amount_is_exact_string_lookup() {
        let cache = InvoiceCache::build(vec![invoice(1, "Alice", "450.00", date(2024, 12, 10))]);
        let reserved = HashSet::new();

        assert_eq!(cache.candidates_for_amount("450.00", &reserved).len(), 1);
        // "450.0" is a different string, so a different bucket. Intentional:
        // the CSV and invoice representations must coincide to match.
        assert!(cache.candidates_for_amount("450.0", &reserved).is_empty());
        assert!(cache.candidates_for_amount("77.77", &reserved).is_empty());
    }

    #[test]
    fn test_reserved_invoices_are_excluded() {
        let cache = InvoiceCache::build(vec![
            invoice(1, "Alice", "450.00", date(2024, 12, 10)),
            invoice(2, "Bob", "450.00", date(2024, 12, 11)),
        ]);

        let mut reserved = HashSet::new();
        reserved.insert(Uuid::from_u128(1));

        let bucket = cache.candidates_for_amount("450.00", &reserved);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].id, Uuid::from_u128(2));
    }

    #[test]
    fn test_lookup_by_id_and_precomputed_normalization() {
        let cache = InvoiceCache::build(vec![invoice(7, "Smith, John", "10.00", date(2024, 1, 1))]);
        let found = cache.get(&Uuid::from_u128(7)).unwrap();
        assert_eq!(found.normalized_name, "SMITH JOHN");
        assert!(cache.get(&Uuid::from_u128(8)).is_none());
        assert_eq!(cache.len(), 1);
    }
}
