//! Token Estimation
//!
//! Heuristic token estimation used for the tokens-per-minute pre-check and
//! for cost estimates when a provider cannot quote one itself. Estimates are
//! intentionally cheap; no provider tokenizer is loaded.

/// Token estimation method
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TokenEstimator {
    /// Simple character-based estimation (4 chars = 1 token)
    /// Good for general English text
    #[default]
    CharBased,
    /// Word-based estimation (0.75 tokens per word on average)
    WordBased,
}

/// Token counter for pre-dispatch budgeting
pub struct TokenCounter {
    estimator: TokenEstimator,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(TokenEstimator::default())
    }
}

impl TokenCounter {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }

    /// Estimate token count for a string
    pub fn count(&self, text: &str) -> usize {
        match self.estimator {
            TokenEstimator::CharBased => self.count_char_based(text),
            TokenEstimator::WordBased => self.count_word_based(text),
        }
    }

    /// Estimate tokens for a JSON context payload
    pub fn count_context(&self, context: &serde_json::Map<String, serde_json::Value>) -> usize {
        let serialized = serde_json::Value::Object(context.clone()).to_string();
        self.count(&serialized)
    }

    /// Simple character-based counting (4 chars = 1 token)
    fn count_char_based(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4).max(1)
    }

    /// Word-based counting (average 0.75 tokens per word)
    fn count_word_based(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f32 * 0.75).ceil() as usize + 1
    }

    /// Check if content fits within a token budget
    pub fn fits_budget(&self, text: &str, budget: usize) -> bool {
        self.count(text) <= budget
    }
}

/// Convenience: estimate tokens with the default estimator
pub fn estimate_tokens(text: &str) -> usize {
    TokenCounter::default().count(text)
}

/// Convenience: estimate tokens for a context map with the default estimator
pub fn estimate_context_tokens(context: &serde_json::Map<String, serde_json::Value>) -> usize {
    TokenCounter::default().count_context(context)
}
