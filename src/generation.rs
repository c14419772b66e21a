//! Generation capability seam and the collect-then-evaluate drain contract.
//!
//! Transports often deliver an answer as incremental events and sometimes
//! signal a benign teardown error after the content has already arrived. The
//! rule here is to drain first and judge afterwards: an error with no text
//! collected is a failure, an error after text is noise, and a blank total is
//! treated as a failure so the caller can fall back.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::ConversationSession;

/// Errors surfaced by generation transports.
#[derive(Debug, Error, Diagnostic)]
pub enum GenerationError {
    /// The transport or model rejected the request.
    #[error("generation provider error: {message}")]
    #[diagnostic(code(membersight::generation::provider))]
    Provider { message: String },

    /// The transport disconnected mid-stream.
    #[error("generation stream interrupted: {message}")]
    #[diagnostic(code(membersight::generation::interrupted))]
    Interrupted { message: String },
}

/// Incremental text events from one logical generation call.
pub type GenerationStream = BoxStream<'static, Result<String, GenerationError>>;

/// Text-generation capability: accepts a prompt, returns streamed text or
/// fails. Session context is supplied so transports can keep multi-turn
/// continuity.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        session: &ConversationSession,
    ) -> Result<GenerationStream, GenerationError>;
}

/// Result of fully draining one generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Non-blank text was produced (possibly despite a late stream error).
    Text(String),
    /// The stream completed but yielded nothing usable.
    Empty,
    /// The stream failed before any text arrived.
    Failed(String),
}

/// Drain a generation stream completely, then evaluate what was collected.
///
/// Errors are partitioned by whether content was received first: with text
/// in hand the error is logged and the text kept; with nothing collected it
/// is a failure.
pub async fn collect_stream(mut stream: GenerationStream) -> GenerationOutcome {
    let mut collected = String::new();

    while let Some(event) = stream.next().await {
        match event {
            Ok(part) => collected.push_str(&part),
            Err(err) => {
                if collected.trim().is_empty() {
                    warn!(error = %err, "generation failed before any content arrived");
                    return GenerationOutcome::Failed(err.to_string());
                }
                // Content already in hand; trailing transport noise is non-fatal.
                warn!(error = %err, collected = collected.len(), "ignoring post-content stream error");
                break;
            }
        }
    }

    let text = collected.trim();
    if text.is_empty() {
        debug!("generation stream drained empty");
        GenerationOutcome::Empty
    } else {
        GenerationOutcome::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn boxed(events: Vec<Result<String, GenerationError>>) -> GenerationStream {
        stream::iter(events).boxed()
    }

    #[tokio::test]
    async fn collects_all_parts_in_order() {
        let outcome = collect_stream(boxed(vec![
            Ok("Membership ".to_string()),
            Ok("held steady.".to_string()),
        ]))
        .await;
        assert_eq!(outcome, GenerationOutcome::Text("Membership held steady.".into()));
    }

    #[tokio::test]
    async fn error_before_content_is_a_failure() {
        let outcome = collect_stream(boxed(vec![Err(GenerationError::Provider {
            message: "quota exceeded".into(),
        })]))
        .await;
        assert!(matches!(outcome, GenerationOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn error_after_content_keeps_the_content() {
        let outcome = collect_stream(boxed(vec![
            Ok("Partial answer".to_string()),
            Err(GenerationError::Interrupted {
                message: "event loop is closed".into(),
            }),
        ]))
        .await;
        assert_eq!(outcome, GenerationOutcome::Text("Partial answer".into()));
    }

    #[tokio::test]
    async fn whitespace_only_output_counts_as_empty() {
        let outcome = collect_stream(boxed(vec![Ok("   \n\t ".to_string())])).await;
        assert_eq!(outcome, GenerationOutcome::Empty);
    }

    #[tokio::test]
    async fn whitespace_then_error_is_a_failure() {
        // Nothing usable was collected, so the error wins.
        let outcome = collect_stream(boxed(vec![
            Ok("  ".to_string()),
            Err(GenerationError::Provider {
                message: "backend down".into(),
            }),
        ]))
        .await;
        assert!(matches!(outcome, GenerationOutcome::Failed(_)));
    }
}
