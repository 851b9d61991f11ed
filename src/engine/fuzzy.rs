//! Fuzzy tag-name resolution.
//!
//! A typed tag token is mapped onto the closest known tag by the composite
//! distance `sqrt(|len(c) - len(q)| + 1) / ((overlap + 1)^3 * ratio)`, where
//! `overlap` counts distinct shared characters and `ratio` is a normalized
//! Levenshtein similarity. Lower is better.

use std::collections::HashSet;

/// Picks the best candidate for `query`. `None` only when `candidates` is empty.
///
/// An exact case-insensitive match always wins; otherwise ties go to the first
/// candidate encountered.
pub fn best_match<'c>(query: &str, candidates: &'c [String]) -> Option<&'c str> {
    let q = query.to_lowercase();
    if let Some(exact) = candidates.iter().find(|c| c.to_lowercase() == q) {
        return Some(exact.as_str());
    }

    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let d = distance(&candidate.to_lowercase(), &q);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((candidate.as_str(), d));
        }
    }
    best.map(|(name, _)| name)
}

/// Composite distance between two already-lowercased names.
pub fn distance(candidate: &str, query: &str) -> f64 {
    let c_len = candidate.chars().count() as f64;
    let q_len = query.chars().count() as f64;
    let overlap = token_overlap(candidate, query) as f64;
    let ratio = similarity_ratio(candidate, query).max(f64::EPSILON);

    ((c_len - q_len).abs() + 1.0).sqrt() / ((overlap + 1.0).powi(3) * ratio)
}

/// Number of distinct characters present in both strings.
pub fn token_overlap(a: &str, b: &str) -> usize {
    let a: HashSet<char> = a.chars().collect();
    let b: HashSet<char> = b.chars().collect();
    a.intersection(&b).count()
}

/// `(|a| + |b| - lev(a, b)) / (|a| + |b|)`, in `[0, 1]`.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    (total - levenshtein(a, b)) as f64 / total as f64
}

/// Classic two-row Levenshtein distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}
