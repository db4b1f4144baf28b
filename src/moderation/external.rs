//! External content-analysis hook.
//!
//! An optional collaborator reached over HTTP with a hard deadline. Timeouts
//! and transport failures fall back to allow and count toward the
//! degraded-mode metric; moderation must never take a room hostage to a
//! slow vendor.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ContentCtx, Decision};

/// Response shape expected from the analysis endpoint.
#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    decision: String,
    #[serde(default)]
    reason: Option<String>,
}

/// HTTP client for the external analyzer.
pub struct ExternalAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ExternalAnalyzer {
    /// Create the analyzer with its deadline.
    pub fn new(endpoint: String, timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            timeout,
        }
    }

    /// Analyze content; degrades to allow on any failure.
    pub async fn analyze(&self, ctx: &ContentCtx<'_>) -> Decision {
        let request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "principal_id": ctx.principal_id,
                "room_id": ctx.room_id,
                "content": ctx.content,
            }))
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(error = %e, "external moderation call failed; allowing");
                crate::metrics::MODERATION_DEGRADED.inc();
                return Decision::Allow;
            }
            Err(_) => {
                warn!(deadline_ms = self.timeout.as_millis() as u64, "external moderation timed out; allowing");
                crate::metrics::MODERATION_DEGRADED.inc();
                return Decision::Allow;
            }
        };

        let analysis: AnalysisResponse = match response.json().await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "external moderation returned malformed body; allowing");
                crate::metrics::MODERATION_DEGRADED.inc();
                return Decision::Allow;
            }
        };

        let reason = analysis
            .reason
            .unwrap_or_else(|| "external analysis".to_string());
        match analysis.decision.as_str() {
            "block" => Decision::Block(reason),
            "flag" => Decision::Flag(reason),
            "allow" => Decision::Allow,
            other => {
                debug!(decision = other, "unknown external decision; allowing");
                Decision::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_proto::MessageKind;

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_allow() {
        // TEST-NET-1 address; connection fails fast or times out.
        let analyzer = ExternalAnalyzer::new("http://192.0.2.1:9/analyze".into(), 50);
        let ctx = ContentCtx {
            principal_id: 1,
            room_id: 1,
            content: "hello",
            kind: MessageKind::Text,
        };
        let before = crate::metrics::MODERATION_DEGRADED.get();
        let decision = analyzer.analyze(&ctx).await;
        assert_eq!(decision, Decision::Allow);
        assert!(crate::metrics::MODERATION_DEGRADED.get() > before);
    }
}
