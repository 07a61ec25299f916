//! LLM reviewer port for review quality gates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Verdict returned by a review gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub reasoning: String,
}

impl ReviewVerdict {
    /// Parse the literal `{"passed": ..., "reasoning": ...}` shape an LLM
    /// reviewer is instructed to return. Any parse failure yields a failed
    /// verdict rather than an error, so a rambling model cannot pass a gate.
    pub fn from_llm_output(output: &str) -> Self {
        // Models sometimes wrap the JSON in a code fence; strip one if present.
        let trimmed = output.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        serde_json::from_str(body).unwrap_or_else(|_| Self {
            passed: false,
            reasoning: "Failed to parse LLM response".to_string(),
        })
    }
}

/// Performs LLM-review gates.
#[async_trait]
pub trait LlmReviewer: Send + Sync {
    async fn review(&self, prompt: &str, context: Option<&str>) -> DomainResult<ReviewVerdict>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_json() {
        let v = ReviewVerdict::from_llm_output(r#"{"passed": true, "reasoning": "looks good"}"#);
        assert!(v.passed);
        assert_eq!(v.reasoning, "looks good");
    }

    #[test]
    fn test_parses_fenced_json() {
        let v = ReviewVerdict::from_llm_output(
            "```json\n{\"passed\": false, \"reasoning\": \"missing tests\"}\n```",
        );
        assert!(!v.passed);
    }

    #[test]
    fn test_garbage_fails_closed() {
        let v = ReviewVerdict::from_llm_output("Sure! The code looks fine to me.");
        assert!(!v.passed);
        assert_eq!(v.reasoning, "Failed to parse LLM response");
    }
}
