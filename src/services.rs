//! Abstract interfaces for the two external collaborators.
//!
//! The engine treats the critic and the fixer as opaque remote services:
//! one call each, plain text in, plain text out. The traits decouple the
//! refinement loop from any specific provider or transport and make the
//! loop testable with in-process mocks.

use async_trait::async_trait;

use crate::error::Result;

/// One critic evaluation request.
#[derive(Debug, Clone, Copy)]
pub struct CriticRequest<'a> {
    /// The rubric the candidate must satisfy, treated as opaque text.
    pub rubric_prompt: &'a str,
    /// The draft under evaluation.
    pub candidate_text: &'a str,
    /// Tag selecting which rubric variant applies.
    pub content_type: &'a str,
}

/// One fixer rewrite request.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    /// Instructions assembled from the accumulated feedback.
    pub instructions: &'a str,
    /// The draft to rewrite.
    pub prior_text: &'a str,
    /// The score the rewrite should reach.
    pub target_score: f64,
}

/// External text-evaluation capability.
///
/// The reply is free text expected to contain a single structured score
/// object; parsing and repair are the caller's concern (`parser::parse`),
/// so implementations return the raw body untouched.
#[async_trait]
pub trait CriticService: Send + Sync {
    async fn evaluate(&self, request: CriticRequest<'_>) -> Result<String>;
}

/// External text-production capability that rewrites or extends a candidate
/// given feedback. The response is opaque replacement text, never parsed as
/// structured data.
#[async_trait]
pub trait FixerService: Send + Sync {
    async fn rewrite(&self, request: FixRequest<'_>) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct CannedCritic {
        response: String,
    }

    #[async_trait]
    impl CriticService for CannedCritic {
        async fn evaluate(&self, _request: CriticRequest<'_>) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn critic_as_trait_object() {
        let critic: Arc<dyn CriticService> = Arc::new(CannedCritic {
            response: r#"{"score": 9.0}"#.to_string(),
        });

        let raw = critic
            .evaluate(CriticRequest {
                rubric_prompt: "rubric",
                candidate_text: "draft",
                content_type: "profile",
            })
            .await
            .unwrap();

        assert!(raw.contains("9.0"));
    }
}
