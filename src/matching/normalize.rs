// src/matching/normalize.rs
// Deterministic canonicalization of customer names and bank descriptions.
// Everything downstream compares these forms, so both sides of a match must
// pass through here exactly once.

/// Tokens a bank drops into transaction descriptions that carry no customer
/// signal. Matched whole-token only; substrings survive (removing "DEPOSIT"
/// must not leave "OSIT" behind).
const BANK_NOISE_TOKENS: [&str; 37] = [
    "CHK", "DEP", "PMT", "PAYMENT", "ONLINE", "TRANSFER", "ACH", "DEPOSIT", "WIRE", "CHECK",
    "REF", "REFERENCE", "MISC", "DEBIT", "CREDIT", "TXN", "TRANSACTION", "FEE", "CHARGE", "FROM",
    "TO", "VIA", "ATM", "POS", "MOBILE", "WEB", "EXTERNAL", "INTERNAL", "INCOMING", "OUTGOING",
    "COUNTER", "VENDOR", "REBATE", "UNKNOWN", "BANK", "CASH", "PURCHASE",
];

/// Normalizes an invoice customer name: upper-case, `,`/`.`/`-` become
/// spaces, whitespace runs collapse. Digits survive (customer names contain
/// none in practice, but this side never strips them).
pub fn normalize_customer_name(name: &str) -> String {
    let upper = name.to_uppercase();
    let replaced: String = upper
        .chars()
        .map(|c| if matches!(c, ',' | '.' | '-') { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the customer-name part of a bank description. Upper-cases, keeps
/// only A-Z letters and spaces, drops whole-token bank noise, then applies
/// the single-letter rule: one-letter tokens are initials and only survive
/// when a longer token remains.
pub fn extract_name_from_description(description: &str) -> String {
    let upper = description.to_uppercase();
    let cleaned: String = upper
        .chars()
        .filter(|c| c.is_ascii_uppercase() || *c == ' ')
        .collect();

    let kept: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|word| !BANK_NOISE_TOKENS.contains(word))
        .collect();

    let has_longer_token = kept.iter().any(|word| word.len() >= 2);
    let words: Vec<&str> = kept
        .into_iter()
        .filter(|word| word.len() >= 2 || has_longer_token)
        .collect();

    words.join(" ")
}
