// src/matching/similarity.rs
// Name similarity on 0..100. Inputs are pre-normalized (see normalize.rs);
// the score is the best of three measures so reordered tokens, partial
// token sets and initials each get a fair reading.

use strsim::jaro_winkler;

/// Minimum Jaro-Winkler for a fuzzy token pair to count in token overlap.
const TOKEN_FUZZY_FLOOR: f64 = 80.0;
/// Score for an initial matching the first letter of a full token.
const INITIAL_MATCH_SCORE: f64 = 90.0;
/// Floor applied when every token of the shorter string matched exactly.
const EXACT_SUBSET_FLOOR: f64 = 90.0;

/// Best of direct Jaro-Winkler, token-sorted Jaro-Winkler and greedy token
/// overlap, each scaled to 0..100.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 100.0;
    }

    let direct = jaro_winkler(a, b) * 100.0;
    let sorted = token_sorted_similarity(a, b);
    let overlap = token_overlap_similarity(a, b);

    direct.max(sorted).max(overlap)
}

/// Jaro-Winkler over the strings with their tokens sorted lexicographically.
/// "SMITH JOHN" and "JOHN SMITH" become identical under this measure.
fn token_sorted_similarity(a: &str, b: &str) -> f64 {
    let mut a_tokens: Vec<&str> = a.split_whitespace().collect();
    let mut b_tokens: Vec<&str> = b.split_whitespace().collect();
    a_tokens.sort_unstable();
    b_tokens.sort_unstable();
    jaro_winkler(&a_tokens.join(" "), &b_tokens.join(" ")) * 100.0
}

/// Greedy per-token matching: each token of `a` claims its best-scoring
/// unmatched token of `b`. The aggregate is normalized by the longer token
/// count, and floored to 90 when the shorter side matched exactly in full.
fn token_overlap_similarity(a: &str, b: &str) -> f64 {
    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }

    let mut b_claimed = vec![false; b_tokens.len()];
    let mut total = 0.0;
    let mut exact_matches = 0usize;

    for a_token in &a_tokens {
        let mut best_score = 0.0f64;
        let mut best_idx: Option<usize> = None;
        for (idx, b_token) in b_tokens.iter().enumerate() {
            if b_claimed[idx] {
                continue;
            }
            let score = token_pair_score(a_token, b_token);
            if score > best_score {
                best_score = score;
                best_idx = Some(idx);
            }
        }
        if let Some(idx) = best_idx {
            b_claimed[idx] = true;
            if a_token == &b_tokens[idx] {
                exact_matches += 1;
            }
        }
        total += best_score;
    }

    let longer = a_tokens.len().max(b_tokens.len()) as f64;
    let mut score = total / longer;
    if exact_matches == a_tokens.len().min(b_tokens.len()) {
        score = score.max(EXACT_SUBSET_FLOOR);
    }
    score.min(100.0)
}

fn token_pair_score(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    // An initial against the full token it abbreviates.
    let a_first = a.chars().next();
    let b_first = b.chars().next();
    if (a.chars().count() == 1 || b.chars().count() == 1) && a_first == b_first {
        return INITIAL_MATCH_SCORE;
    }
    let fuzzy = jaro_winkler(a, b) * 100.0;
    if fuzzy >= TOKEN_FUZZY_FLOOR {
        fuzzy
    } else {
        0.0
    }
}
