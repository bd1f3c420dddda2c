// src/matching/matcher.rs
// Scores one bank row against its same-amount invoice candidates and picks
// the winner under a strict total order. Candidates arrive pre-filtered by
// amount and reservation; this module never touches storage.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::MatcherConfig;
use crate::invoice_cache::InvoiceCandidate;
use crate::matching::details::{
    AmbiguityDetail, AmountDetail, DateDetail, MatchDetails, NameDetail, TopCandidate,
    MATCH_DETAILS_VERSION,
};
use crate::matching::normalize::extract_name_from_description;
use crate::matching::similarity::name_similarity;
use crate::models::MatchBucket;

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Extracted names shorter than this carry no real signal.
const WEAK_NAME_MIN_CHARS: usize = 3;
const TOP_CANDIDATE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub invoice_id: Option<Uuid>,
    /// Final score of the best candidate, 0..100 at two decimals.
    pub confidence: f64,
    pub bucket: MatchBucket,
    pub details: MatchDetails,
}

struct ScoredCandidate<'a> {
    candidate: &'a InvoiceCandidate,
    name_score: f64,
    date_delta: i64,
    date_adjustment: f64,
    ambiguity_penalty: f64,
    final_score: f64,
    /// final_score * 100 as an integer; all ordering happens on this.
    final_score_bp: i64,
}

pub fn match_transaction(
    description: &str,
    amount: &str,
    transaction_date: NaiveDate,
    candidates: &[&InvoiceCandidate],
    config: &MatcherConfig,
) -> MatchDecision {
    if candidates.is_empty() {
        return MatchDecision {
            invoice_id: None,
            confidence: 0.0,
            bucket: MatchBucket::Unmatched,
            details: MatchDetails::no_candidates(),
        };
    }

    let extracted = extract_name_from_description(description);
    let name_too_weak = extracted.chars().count() < WEAK_NAME_MIN_CHARS;

    let ambiguity_penalty = (candidates.len() as i64 - config.ambiguity_free_candidates).max(0)
        as f64
        * config.ambiguity_penalty_per_extra;

    let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut name_score = name_similarity(&extracted, &candidate.normalized_name);
        if name_too_weak {
            name_score = name_score.min(config.weak_name_cap);
        }

        let date_delta = transaction_date
            .signed_duration_since(candidate.due_date)
            .num_days();
        let date_adjustment = date_adjustment(date_delta);

        let raw = name_score + date_adjustment - ambiguity_penalty;
        let final_score_bp = (raw.clamp(0.0, 100.0) * 100.0).round() as i64;
        let final_score = final_score_bp as f64 / 100.0;

        scored.push(ScoredCandidate {
            candidate,
            name_score,
            date_delta,
            date_adjustment,
            ambiguity_penalty,
            final_score,
            final_score_bp,
        });
    }

    // Strict total order: basis points, then date proximity, then earlier
    // due date, then invoice id. No two candidates ever compare equal.
    scored.sort_by(|a, b| {
        b.final_score_bp
            .cmp(&a.final_score_bp)
            .then_with(|| a.date_delta.abs().cmp(&b.date_delta.abs()))
            .then_with(|| a.candidate.due_date.cmp(&b.candidate.due_date))
            .then_with(|| a.candidate.id.cmp(&b.candidate.id))
    });

    let best = &scored[0];

    let mut bucket = bucket_for_score(best.final_score_bp, config);
    if name_too_weak && candidates.len() > 1 && bucket == MatchBucket::AutoMatched {
        bucket = MatchBucket::NeedsReview;
    }

    let details = build_details(
        &extracted,
        amount,
        transaction_date,
        best,
        &scored,
        bucket,
    );

    let invoice_id = match bucket {
        MatchBucket::Unmatched => None,
        _ => Some(best.candidate.id),
    };

    MatchDecision {
        invoice_id,
        confidence: best.final_score,
        bucket,
        details,
    }
}

fn bucket_for_score(score_bp: i64, config: &MatcherConfig) -> MatchBucket {
    if score_bp >= (config.auto_threshold * 100.0).round() as i64 {
        MatchBucket::AutoMatched
    } else if score_bp >= (config.review_threshold * 100.0).round() as i64 {
        MatchBucket::NeedsReview
    } else {
        MatchBucket::Unmatched
    }
}

/// Adjustment by days between transaction and due date. Early payment is a
/// good sign, slightly-late is neutral, very late payments are suspect.
fn date_adjustment(days_delta: i64) -> f64 {
    if days_delta < 0 {
        5.0
    } else if days_delta <= 7 {
        2.0
    } else if days_delta <= 30 {
        0.0
    } else {
        -10.0
    }
}

fn build_details(
    extracted: &str,
    amount: &str,
    transaction_date: NaiveDate,
    best: &ScoredCandidate,
    scored: &[ScoredCandidate],
    bucket: MatchBucket,
) -> MatchDetails {
    let top_candidates = scored
        .iter()
        .take(TOP_CANDIDATE_LIMIT)
        .map(|s| TopCandidate {
            invoice_id: s.candidate.id.to_string(),
            invoice_number: s.candidate.invoice_number.clone(),
            score: s.final_score,
            name_score: round2(s.name_score),
            delta_days: s.date_delta,
        })
        .collect();

    MatchDetails {
        version: MATCH_DETAILS_VERSION.to_string(),
        amount: Some(AmountDetail {
            transaction: amount.to_string(),
            invoice: Some(best.candidate.amount.clone()),
        }),
        name: Some(NameDetail {
            extracted: extracted.to_string(),
            invoice_name: Some(best.candidate.customer_name.clone()),
            similarity: round2(best.name_score),
        }),
        date: Some(DateDetail {
            transaction_date: transaction_date.format(DATE_FORMAT).to_string(),
            invoice_due_date: Some(best.candidate.due_date.format(DATE_FORMAT).to_string()),
            delta_days: best.date_delta,
            adjustment: best.date_adjustment,
        }),
        ambiguity: Some(AmbiguityDetail {
            candidate_count: scored.len(),
            penalty: best.ambiguity_penalty,
        }),
        final_score: Some(best.final_score),
        bucket: Some(bucket.as_str().to_string()),
        top_candidates: Some(top_candidates),
        reason: None,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::details::REASON_NO_MATCHING_AMOUNT;
    use crate::matching::normalize::normalize_customer_name;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate(
        id: &str,
        number: &str,
        name: &str,
        amount: &str,
        due: NaiveDate,
    ) -> InvoiceCandidate {
        InvoiceCandidate {
            id: Uuid::parse_str(id).unwrap(),
            invoice_number: number.to_string(),
            amount: amount.to_string(),
            due_date: due,
            customer_name: name.to_string(),
            normalized_name: normalize_customer_name(name),
        }
    }

    const ID_1: &str = "00000000-0000-0000-0000-000000000001";
    const ID_2: &str = "00000000-0000-0000-0000-000000000002";
    const ID_3: &str = "00000000-0000-0000-0000-000000000003";

    #[test]
    fn test_exact_match_single_candidate() {
        let inv = candidate(ID_1, "INV-001", "Sarah Adams", "1250.00", date(2024, 12, 10));
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "SARAH ADAMS",
            "1250.00",
            date(2024, 12, 10),
            &[&inv],
            &config,
        );

        assert_eq!(decision.bucket, MatchBucket::AutoMatched);
        assert_eq!(decision.invoice_id, Some(inv.id));
        assert_eq!(decision.confidence, 100.0);
        let details = &decision.details;
        assert_eq!(details.name.as_ref().unwrap().similarity, 100.0);
        assert_eq!(details.date.as_ref().unwrap().adjustment, 2.0);
        assert_eq!(details.date.as_ref().unwrap().delta_days, 0);
        assert_eq!(details.ambiguity.as_ref().unwrap().penalty, 0.0);
        assert_eq!(details.final_score, Some(100.0));
    }

    #[test]
    fn test_reordered_name_before_due_date() {
        let inv = candidate(ID_1, "INV-001", "Sarah Adams", "1250.00", date(2024, 12, 10));
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "ADAMS SARAH",
            "1250.00",
            date(2024, 12, 8),
            &[&inv],
            &config,
        );

        assert_eq!(decision.bucket, MatchBucket::AutoMatched);
        assert_eq!(decision.confidence, 100.0);
        assert_eq!(decision.details.date.as_ref().unwrap().adjustment, 5.0);
        assert_eq!(decision.details.date.as_ref().unwrap().delta_days, -2);
    }

    #[test]
    fn test_bank_noise_and_initial() {
        let inv = candidate(ID_1, "INV-001", "Sarah Adams", "1250.00", date(2024, 12, 10));
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "DEPOSIT S ADAMS",
            "1250.00",
            date(2024, 12, 10),
            &[&inv],
            &config,
        );

        // "S ADAMS": initial claims SARAH at 90, ADAMS exact at 100 -> 95,
        // plus the on-time +2 -> 97.00.
        assert_eq!(decision.confidence, 97.0);
        assert_eq!(decision.bucket, MatchBucket::AutoMatched);
        assert_eq!(decision.invoice_id, Some(inv.id));
        assert_eq!(
            decision.details.name.as_ref().unwrap().extracted,
            "S ADAMS"
        );
    }

    #[test]
    fn test_ambiguous_pair_is_deterministic() {
        let inv1 = candidate(ID_1, "INV-001", "John Smith", "450.00", date(2024, 12, 10));
        let inv2 = candidate(ID_2, "INV-002", "Jane Smith", "450.00", date(2024, 12, 10));
        let config = MatcherConfig::default();

        let first = match_transaction(
            "JOHN SMITH",
            "450.00",
            date(2024, 12, 10),
            &[&inv1, &inv2],
            &config,
        );
        assert_eq!(first.invoice_id, Some(inv1.id));
        assert_eq!(first.bucket, MatchBucket::AutoMatched);
        // Two candidates sit inside the penalty-free allowance.
        assert_eq!(first.details.ambiguity.as_ref().unwrap().penalty, 0.0);
        assert_eq!(first.details.ambiguity.as_ref().unwrap().candidate_count, 2);

        for _ in 0..100 {
            let again = match_transaction(
                "JOHN SMITH",
                "450.00",
                date(2024, 12, 10),
                &[&inv1, &inv2],
                &config,
            );
            assert_eq!(again, first);
        }

        // Candidate order must not matter either.
        let flipped = match_transaction(
            "JOHN SMITH",
            "450.00",
            date(2024, 12, 10),
            &[&inv2, &inv1],
            &config,
        );
        assert_eq!(flipped.invoice_id, first.invoice_id);
        assert_eq!(flipped.confidence, first.confidence);
    }

    #[test]
    fn test_no_candidates() {
        let config = MatcherConfig::default();
        let decision = match_transaction("ANYONE", "77.77", date(2024, 12, 10), &[], &config);

        assert_eq!(decision.bucket, MatchBucket::Unmatched);
        assert_eq!(decision.invoice_id, None);
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(
            decision.details.reason.as_deref(),
            Some(REASON_NO_MATCHING_AMOUNT)
        );
        assert!(decision.details.amount.is_none());
    }

    #[test]
    fn test_late_payment_demotes_to_review() {
        let inv = candidate(ID_1, "INV-001", "Jones", "99.00", date(2024, 10, 1));
        let config = MatcherConfig::default();

        // 35 days late: exact name 100 - 10 = 90, below the auto threshold.
        let decision =
            match_transaction("JONES", "99.00", date(2024, 11, 5), &[&inv], &config);

        assert_eq!(decision.details.date.as_ref().unwrap().adjustment, -10.0);
        assert_eq!(decision.confidence, 90.0);
        assert_eq!(decision.bucket, MatchBucket::NeedsReview);
        assert_eq!(decision.invoice_id, Some(inv.id));
    }

    #[test]
    fn test_ambiguity_penalty_beyond_allowance() {
        let due = date(2024, 12, 10);
        let inv1 = candidate(ID_1, "INV-001", "John Smith", "450.00", due);
        let inv2 = candidate(ID_2, "INV-002", "Jane Smith", "450.00", due);
        let inv3 = candidate(ID_3, "INV-003", "Joan Smith", "450.00", due);
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "JOHN SMITH",
            "450.00",
            due,
            &[&inv1, &inv2, &inv3],
            &config,
        );

        // (3 - 2) * 2.0 = 2.0 points off every candidate.
        assert_eq!(decision.details.ambiguity.as_ref().unwrap().penalty, 2.0);
        assert_eq!(decision.invoice_id, Some(inv1.id));
        // 100 + 2 - 2 = 100.00
        assert_eq!(decision.confidence, 100.0);
    }

    #[test]
    fn test_tie_break_on_date_proximity() {
        // Same name, both in the 8..30-day band (adjustment 0), different
        // distances. Closer due date wins.
        let inv_near = candidate(ID_2, "INV-002", "Acme Corp", "75.00", date(2024, 11, 30));
        let inv_far = candidate(ID_1, "INV-001", "Acme Corp", "75.00", date(2024, 11, 20));
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "ACME CORP",
            "75.00",
            date(2024, 12, 10),
            &[&inv_far, &inv_near],
            &config,
        );

        assert_eq!(decision.invoice_id, Some(inv_near.id));
    }

    #[test]
    fn test_tie_break_on_earlier_due_date() {
        // Both clamp to 100.00 (+5 early vs +2 on-time band) with |delta| 7
        // on each side; the earlier due date wins.
        let inv_late_due = candidate(ID_1, "INV-001", "Acme Corp", "75.00", date(2024, 12, 17));
        let inv_early_due = candidate(ID_2, "INV-002", "Acme Corp", "75.00", date(2024, 12, 3));
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "ACME CORP",
            "75.00",
            date(2024, 12, 10),
            &[&inv_late_due, &inv_early_due],
            &config,
        );

        assert_eq!(decision.confidence, 100.0);
        assert_eq!(decision.invoice_id, Some(inv_early_due.id));
    }

    #[test]
    fn test_tie_break_on_invoice_id() {
        let due = date(2024, 12, 10);
        let inv1 = candidate(ID_1, "INV-001", "Acme Corp", "75.00", due);
        let inv2 = candidate(ID_2, "INV-002", "Acme Corp", "75.00", due);
        let config = MatcherConfig::default();

        let decision =
            match_transaction("ACME CORP", "75.00", due, &[&inv2, &inv1], &config);

        assert_eq!(decision.invoice_id, Some(inv1.id));
    }

    #[test]
    fn test_weak_name_caps_score() {
        let inv = candidate(ID_1, "INV-001", "Sarah Adams", "1250.00", date(2024, 12, 10));
        let config = MatcherConfig::default();

        // Description normalizes to the empty string: weak, capped at 50.
        let decision = match_transaction(
            "CHK 1024",
            "1250.00",
            date(2024, 12, 10),
            &[&inv],
            &config,
        );

        assert_eq!(decision.bucket, MatchBucket::Unmatched);
        assert_eq!(decision.invoice_id, None);
        assert!(decision.confidence <= 55.0);
        assert_eq!(decision.details.name.as_ref().unwrap().extracted, "");
    }

    #[test]
    fn test_bucket_thresholds_are_monotonic() {
        let config = MatcherConfig::default();
        let buckets: Vec<MatchBucket> = [0, 4500, 5999, 6000, 9499, 9500, 10000]
            .iter()
            .map(|bp| bucket_for_score(*bp, &config))
            .collect();

        // Never weaker as the score rises.
        fn rank(b: MatchBucket) -> u8 {
            match b {
                MatchBucket::Unmatched => 0,
                MatchBucket::NeedsReview => 1,
                MatchBucket::AutoMatched => 2,
            }
        }
        for pair in buckets.windows(2) {
            assert!(rank(pair[0]) <= rank(pair[1]));
        }
        assert_eq!(buckets[2], MatchBucket::NeedsReview); // 59.99
        assert_eq!(buckets[3], MatchBucket::NeedsReview); // 60.00
        assert_eq!(buckets[4], MatchBucket::NeedsReview); // 94.99
        assert_eq!(buckets[5], MatchBucket::AutoMatched); // 95.00
    }

    #[test]
    fn test_top_candidates_lead_with_winner() {
        let due = date(2024, 12, 10);
        let inv1 = candidate(ID_1, "INV-001", "John Smith", "450.00", due);
        let inv2 = candidate(ID_2, "INV-002", "Jane Smith", "450.00", due);
        let config = MatcherConfig::default();

        let decision = match_transaction(
            "JOHN SMITH",
            "450.00",
            due,
            &[&inv2, &inv1],
            &config,
        );

        let top = decision.details.top_candidates.as_ref().unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].invoice_id, decision.invoice_id.unwrap().to_string());
        assert!(top[0].score >= top[1].score);
    }
}
