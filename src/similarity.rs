// Scores are on a 0-100 scale; 100 means the reordered strings are equal.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, left: &str, right: &str) -> f64;
}

// Token-order-insensitive scorer: whitespace tokens are sorted and rejoined
// before a normalized Levenshtein comparison, so "cafe central park" and
// "central park cafe" score 100.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSortScorer;

impl SimilarityScorer for TokenSortScorer {
    fn score(&self, left: &str, right: &str) -> f64 {
        strsim::normalized_levenshtein(&sort_tokens(left), &sort_tokens(right)) * 100.0
    }
}

fn sort_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}
