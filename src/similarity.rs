// 📏 Similarity Scorer - Ratcliff/Obershelp string similarity
//
// ratio = 2·M / (|a| + |b|), where M is the number of characters in the
// matching blocks found by repeatedly taking the longest common substring
// and recursing on the pieces to its left and right.
//
// Examples:
// - "muhammed" vs "mohammed ali" → 0.70
// - "tsthose"  vs "testhouse"    → 0.875

/// One compared field: (left value, right value, weight)
pub type WeightedField<'a> = (&'a str, &'a str, f64);

#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityScorer;

impl SimilarityScorer {
    pub fn new() -> Self {
        SimilarityScorer
    }

    /// Case-insensitive similarity in [0, 1]. Empty on either side → 0.0.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let a = a.to_lowercase();
        let b = b.to_lowercase();

        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }

        // Block selection is order dependent, so compare in a fixed order
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first: Vec<char> = first.chars().collect();
        let second: Vec<char> = second.chars().collect();

        let matched = matching_chars(&first, &second);
        (2 * matched) as f64 / (first.len() + second.len()) as f64
    }

    /// Weighted mean of field scores.
    ///
    /// Fields with a blank value on either side, or a non-positive weight, are
    /// left out of both numerator and denominator. Nothing left → 0.0.
    pub fn weighted_score(&self, fields: &[WeightedField<'_>]) -> f64 {
        let mut total = 0.0;
        let mut weights = 0.0;

        for (left, right, weight) in fields {
            if *weight <= 0.0 || left.trim().is_empty() || right.trim().is_empty() {
                continue;
            }
            total += self.score(left.trim(), right.trim()) * weight;
            weights += weight;
        }

        if weights == 0.0 {
            0.0
        } else {
            total / weights
        }
    }
}

/// Total length of the recursively found longest matching blocks
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Longest common substring as (start in a, start in b, length).
/// Ties go to the earliest start in `a`, then the earliest in `b`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                current[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = current;
    }

    best
}
