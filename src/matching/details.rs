// src/matching/details.rs
// Typed `match_details` record, stored as JSONB on every transaction. The
// serialized shape is versioned ("v1") and consumed by the review UI, so
// field names and presence rules are part of the wire contract.

use serde::{Deserialize, Serialize};

pub const MATCH_DETAILS_VERSION: &str = "v1";
pub const REASON_NO_MATCHING_AMOUNT: &str = "no_invoice_with_matching_amount";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetails {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<AmountDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<NameDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguity: Option<AmbiguityDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_candidates: Option<Vec<TopCandidate>>,
    /// Only present when there were no same-amount candidates at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MatchDetails {
    /// The minimal record written when the amount gate found nothing.
    pub fn no_candidates() -> Self {
        MatchDetails {
            version: MATCH_DETAILS_VERSION.to_string(),
            amount: None,
            name: None,
            date: None,
            ambiguity: None,
            final_score: None,
            bucket: None,
            top_candidates: None,
            reason: Some(REASON_NO_MATCHING_AMOUNT.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmountDetail {
    pub transaction: String,
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NameDetail {
    pub extracted: String,
    pub invoice_name: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateDetail {
    /// YYYY-MM-DD
    pub transaction_date: String,
    pub invoice_due_date: Option<String>,
    pub delta_days: i64,
    pub adjustment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmbiguityDetail {
    pub candidate_count: usize,
    pub penalty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopCandidate {
    pub invoice_id: String,
    pub invoice_number: String,
    pub score: f64,
    pub name_score: f64,
    pub delta_days: i64,
}
