use crate::protocol::canonical::UsageInfo;
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Number of whitespace-separated words in `text`.
#[must_use]
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Usage block reported by `/v1/embeddings`.
///
/// Prompt tokens are counted as words; the total uses the token estimate.
#[must_use]
pub fn embedding_usage<'a>(inputs: impl IntoIterator<Item = &'a str> + Clone) -> UsageInfo {
    UsageInfo {
        prompt_tokens: inputs.clone().into_iter().map(count_words).sum(),
        completion_tokens: 0,
        total_tokens: inputs.into_iter().map(estimate_tokens).sum(),
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &UsageInfo, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_nonempty() {
        assert_eq!(estimate_tokens("Hello, world!"), 4);
    }

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("  the quick\tbrown\nfox "), 4);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn test_embedding_usage() {
        let inputs = ["hello world", "abc"];
        let usage = embedding_usage(inputs.iter().copied());
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 3 + 1);
    }
}
