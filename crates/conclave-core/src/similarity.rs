//! Text similarity used by scoring and consensus.
//!
//! Two deliberately different metrics coexist: consensus voting measures
//! surface overlap (Jaccard over token sets), while the consensus scorer
//! measures weighted overlap (TF-IDF cosine). Keep them distinct.

use std::collections::{HashMap, HashSet};

const DELIMITERS: &[char] = &[
    ',', '.', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'',
];

/// Split on whitespace and punctuation, lowercase, and drop tokens of
/// length one or less.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || DELIMITERS.contains(&c))
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity over the two token sets: `|A ∩ B| / |A ∪ B|`.
///
/// Returns 0.0 when the union is empty.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / union as f64
}

/// TF-IDF cosine similarity between two texts.
///
/// The corpus drives document frequencies; when `None`, the two inputs
/// themselves form the corpus. Empty input on either side yields 0.0, and
/// vectors with magnitude below `1e-10` are treated as zero.
pub fn tfidf_cosine(a: &str, b: &str, corpus: Option<&[String]>) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let owned_default;
    let corpus_texts: &[String] = match corpus {
        Some(docs) if !docs.is_empty() => docs,
        _ => {
            owned_default = [a.to_string(), b.to_string()];
            &owned_default
        }
    };

    let docs: Vec<HashSet<String>> = corpus_texts
        .iter()
        .map(|d| tokenize(d).into_iter().collect())
        .collect();
    let n = docs.len() as f64;

    let idf = |term: &str| -> f64 {
        let df = docs.iter().filter(|d| d.contains(term)).count();
        if df == 0 {
            0.0
        } else {
            (n / df as f64).ln() + 1.0
        }
    };

    let counts_a = term_counts(&tokens_a);
    let counts_b = term_counts(&tokens_b);

    let vocabulary: HashSet<&str> = counts_a
        .keys()
        .copied()
        .chain(counts_b.keys().copied())
        .collect();

    let mut dot = 0.0;
    let mut mag_a = 0.0;
    let mut mag_b = 0.0;
    for term in vocabulary {
        let weight = idf(term);
        let wa = tf(counts_a.get(term).copied().unwrap_or(0)) * weight;
        let wb = tf(counts_b.get(term).copied().unwrap_or(0)) * weight;
        dot += wa * wb;
        mag_a += wa * wa;
        mag_b += wb * wb;
    }

    let mag_a = mag_a.sqrt();
    let mag_b = mag_b.sqrt();
    if mag_a < 1e-10 || mag_b < 1e-10 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn term_counts(tokens: &[String]) -> HashMap<&str, u32> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Sublinear term frequency: `1 + ln(count)` for positive counts.
fn tf(count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        1.0 + (count as f64).ln()
    }
}
