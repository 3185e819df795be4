//! Bigram Jaccard similarity between normalized titles.
//!
//! Whitespace is removed before windowing, so word splits that differ between
//! sources ("hyper nuclei" vs "hypernuclei") cost at most one bigram.

use std::collections::HashSet;

/// Title similarity in `[0.0, 1.0]`.
///
/// Both inputs are expected to be normalized already (see
/// [`crate::normalize::normalize`]). The score is commutative and
/// `similarity(a, a) == 1.0`.
///
/// Strings too short to form a bigram are compared directly: two empty
/// strings are identical (1.0), otherwise equal stripped text scores 1.0 and
/// anything else 0.0. This keeps `similarity("x", "") == 0.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = strip_whitespace(a);
    let b = strip_whitespace(b);

    let a_bigrams = bigrams(&a);
    let b_bigrams = bigrams(&b);

    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let intersection = a_bigrams.intersection(&b_bigrams).count();
    let union = a_bigrams.union(&b_bigrams).count();

    (intersection as f64 / union as f64).clamp(0.0, 1.0)
}

/// True when `similarity(a, b) >= threshold`.
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}

fn strip_whitespace(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}
