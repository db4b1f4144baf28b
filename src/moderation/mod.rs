//! Content moderation pipeline.
//!
//! An ordered chain of filters runs over every content-bearing command:
//! length/encoding check, profanity dictionary + regex, spam heuristics,
//! reputation gate, and an optional external analyzer with a bounded
//! deadline. Each filter yields allow/flag/block; the most restrictive
//! output wins. A `flag` persists the message hidden from non-moderators;
//! a `block` refuses delivery and is recorded in the moderation log by the
//! router.

mod external;
mod profanity;
mod reputation;
mod spam;

pub use external::ExternalAnalyzer;
pub use profanity::ProfanityFilter;
pub use reputation::ReputationStore;
pub use spam::SpamFilter;

use palaver_proto::{MessageKind, MAX_TEXT_CODE_POINTS};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::ModerationConfig;

/// Outcome of a single filter, and of the pipeline as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Deliver normally.
    Allow,
    /// Persist but hide from non-moderators and enqueue for review.
    Flag(String),
    /// Refuse delivery.
    Block(String),
}

impl Decision {
    /// Combine two outcomes; the more restrictive wins. At equal severity
    /// the earlier filter's reason is kept (chain order is meaningful).
    pub fn merge(self, other: Decision) -> Decision {
        match (self, other) {
            (Decision::Block(r), _) | (_, Decision::Block(r)) => Decision::Block(r),
            (Decision::Flag(r), _) | (_, Decision::Flag(r)) => Decision::Flag(r),
            (Decision::Allow, Decision::Allow) => Decision::Allow,
        }
    }

    /// Whether this decision refuses delivery.
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

/// Validation-class refusals found before the filter chain runs.
///
/// These surface as `validation-failed`, not as moderation outcomes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentViolation {
    #[error("text of {actual} code points exceeds the limit of {limit}")]
    TooLong { actual: usize, limit: usize },

    #[error("text contains disallowed control characters")]
    DisallowedControlChars,
}

/// The content under review.
#[derive(Debug, Clone, Copy)]
pub struct ContentCtx<'a> {
    pub principal_id: i64,
    pub room_id: i64,
    pub content: &'a str,
    pub kind: MessageKind,
}

/// A single content filter in the chain.
pub trait ContentFilter: Send + Sync {
    /// Filter name for logs and review entries.
    fn name(&self) -> &'static str;
    /// Inspect the content. Must be cheap; expensive analysis belongs in the
    /// external hook.
    fn inspect(&self, ctx: &ContentCtx<'_>) -> Decision;
    /// Periodic housekeeping (bound caches). Called from the maintenance
    /// loop.
    fn maintain(&self) {}
}

/// The ordered filter chain.
pub struct ModerationPipeline {
    filters: Vec<Box<dyn ContentFilter>>,
    external: Option<ExternalAnalyzer>,
}

impl ModerationPipeline {
    /// Build the pipeline from configuration.
    ///
    /// Chain order: profanity → spam heuristics → reputation gate →
    /// external hook. Rate limiting has already run by the time content
    /// reaches this pipeline.
    pub fn from_config(
        config: &ModerationConfig,
        reputation: Arc<ReputationStore>,
    ) -> std::io::Result<Self> {
        let dictionary = match &config.dictionary_path {
            Some(path) => profanity::load_dictionary(path)?,
            None => Vec::new(),
        };
        let flag_patterns = config
            .flag_patterns
            .iter()
            .filter_map(|p| regex::Regex::new(p).ok())
            .collect();

        let filters: Vec<Box<dyn ContentFilter>> = vec![
            Box::new(ProfanityFilter::new(dictionary, flag_patterns)),
            Box::new(SpamFilter::new(config.max_links)),
            Box::new(reputation::ReputationGate::new(
                reputation,
                config.reputation_threshold,
            )),
        ];

        let external = config
            .external_endpoint
            .as_ref()
            .map(|endpoint| ExternalAnalyzer::new(endpoint.clone(), config.external_timeout_ms));

        Ok(Self { filters, external })
    }

    /// Pipeline with explicit parts (tests and embedders).
    pub fn new(filters: Vec<Box<dyn ContentFilter>>, external: Option<ExternalAnalyzer>) -> Self {
        Self { filters, external }
    }

    /// Run the full chain over one piece of content.
    pub async fn review(&self, ctx: &ContentCtx<'_>) -> Result<Decision, ContentViolation> {
        validate_text(ctx.content)?;

        let mut decision = Decision::Allow;
        for filter in &self.filters {
            let verdict = filter.inspect(ctx);
            if verdict != Decision::Allow {
                debug!(
                    filter = filter.name(),
                    principal = ctx.principal_id,
                    room = ctx.room_id,
                    ?verdict,
                    "content filter verdict"
                );
            }
            decision = decision.merge(verdict);
            if decision.is_block() {
                // Nothing downstream can relax a block.
                return Ok(decision);
            }
        }

        if let Some(external) = &self.external {
            decision = decision.merge(external.analyze(ctx).await);
        }

        Ok(decision)
    }

    /// Run each filter's housekeeping.
    pub fn maintain(&self) {
        for filter in &self.filters {
            filter.maintain();
        }
    }
}

/// Length and encoding check: counts code points, rejects control characters
/// other than newline and tab.
fn validate_text(content: &str) -> Result<(), ContentViolation> {
    let count = content.chars().count();
    if count > MAX_TEXT_CODE_POINTS {
        return Err(ContentViolation::TooLong {
            actual: count,
            limit: MAX_TEXT_CODE_POINTS,
        });
    }
    if content
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
    {
        return Err(ContentViolation::DisallowedControlChars);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Decision);
    impl ContentFilter for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn inspect(&self, _ctx: &ContentCtx<'_>) -> Decision {
            self.0.clone()
        }
    }

    fn ctx(content: &str) -> ContentCtx<'_> {
        ContentCtx {
            principal_id: 1,
            room_id: 1,
            content,
            kind: MessageKind::Text,
        }
    }

    #[test]
    fn merge_prefers_most_restrictive() {
        assert_eq!(
            Decision::Allow.merge(Decision::Flag("f".into())),
            Decision::Flag("f".into())
        );
        assert_eq!(
            Decision::Flag("f".into()).merge(Decision::Block("b".into())),
            Decision::Block("b".into())
        );
        assert_eq!(
            Decision::Block("first".into()).merge(Decision::Block("second".into())),
            Decision::Block("first".into())
        );
    }

    #[tokio::test]
    async fn block_short_circuits_the_chain() {
        let pipeline = ModerationPipeline::new(
            vec![
                Box::new(Fixed(Decision::Block("nope".into()))),
                Box::new(Fixed(Decision::Flag("later".into()))),
            ],
            None,
        );
        let decision = pipeline.review(&ctx("hello")).await.unwrap();
        assert_eq!(decision, Decision::Block("nope".into()));
    }

    #[tokio::test]
    async fn exact_limit_accepted_one_over_rejected() {
        let pipeline = ModerationPipeline::new(vec![], None);

        let at_limit = "x".repeat(MAX_TEXT_CODE_POINTS);
        assert_eq!(pipeline.review(&ctx(&at_limit)).await.unwrap(), Decision::Allow);

        let over = "x".repeat(MAX_TEXT_CODE_POINTS + 1);
        let err = pipeline.review(&ctx(&over)).await.unwrap_err();
        assert_eq!(
            err,
            ContentViolation::TooLong {
                actual: MAX_TEXT_CODE_POINTS + 1,
                limit: MAX_TEXT_CODE_POINTS
            }
        );
    }

    #[tokio::test]
    async fn limit_counts_code_points_not_bytes() {
        let pipeline = ModerationPipeline::new(vec![], None);
        // Multi-byte code points right at the limit are fine.
        let at_limit = "ß".repeat(MAX_TEXT_CODE_POINTS);
        assert!(at_limit.len() > MAX_TEXT_CODE_POINTS);
        assert_eq!(pipeline.review(&ctx(&at_limit)).await.unwrap(), Decision::Allow);
    }

    #[tokio::test]
    async fn control_characters_rejected() {
        let pipeline = ModerationPipeline::new(vec![], None);
        let err = pipeline.review(&ctx("null\u{0000}byte")).await.unwrap_err();
        assert_eq!(err, ContentViolation::DisallowedControlChars);
        // Newlines and tabs stay legal.
        assert_eq!(
            pipeline.review(&ctx("line\nbreak\tok")).await.unwrap(),
            Decision::Allow
        );
    }
}
