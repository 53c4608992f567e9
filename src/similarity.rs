use std::collections::HashSet;

/// Jaccard similarity over lowercased word sets.
///
/// Used by the engine to detect edit stall: two candidates whose word sets
/// almost coincide mean the soft edits are no longer changing the text.
/// Conventions: two empty texts are identical (1.0); exactly one empty text
/// shares nothing (0.0).
pub fn jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(jaccard("the quick brown fox", "the quick brown fox"), 1.0);
    }

    #[test]
    fn case_is_ignored() {
        assert_eq!(jaccard("Alpha Beta", "alpha beta"), 1.0);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        assert_eq!(jaccard("one two", "three four"), 0.0);
    }

    #[test]
    fn empty_conventions() {
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("words", ""), 0.0);
        assert_eq!(jaccard("", "words"), 0.0);
    }

    #[test]
    fn partial_overlap() {
        // {a,b,c} vs {b,c,d}: 2 shared of 4 total.
        let sim = jaccard("a b c", "b c d");
        assert!((sim - 0.5).abs() < 1e-9);
    }
}
