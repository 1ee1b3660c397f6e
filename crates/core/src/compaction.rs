//! Compaction Handler: summarizes old conversation history and splices a
//! synthetic acknowledgment in its place so the Context Manager's token
//! count drops without losing the thread of the session.
//!
//! Partitioning follows the teacher's turn-counting split (count user
//! messages back from the end), generalized from transcript lines to
//! [`Message`] values and from a turn-count trigger to the token-percentage
//! trigger the Context Manager already owns.

use async_trait::async_trait;

use tron_domain::error::Result;
use tron_domain::event::CompactionReason;
use tron_domain::session::{CompactionResult, ExtractedData};
use tron_domain::tool::{Message, Role};

/// What a [`Summarizer`] returns for a partition of old history.
#[derive(Debug, Clone, Default)]
pub struct SummarizeOutput {
    pub extracted_data: ExtractedData,
    pub narrative: String,
}

/// A collaborator that turns a partition of old messages into a summary.
/// Typically implemented by spawning a text-only subagent on a cheap model.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message], model: &str, working_directory: &str) -> Result<SummarizeOutput>;
}

const ASSISTANT_ACK: &str = "Got it — continuing with that context in mind.";
const CONTEXT_PREFIX: &str = "[Context from earlier in session] ";

/// What [`preview_compaction`] reports: the shape [`compact`] would produce,
/// without paying for a summarizer call to find out.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPreview {
    pub would_compact: bool,
    pub tokens_before: u32,
    pub estimated_tokens_after: u32,
    pub preserved_turns: usize,
    pub summarized_turns: usize,
}

/// Partition `messages` into `(old, recent)`. `recent` is the last
/// `preserve_recent_turns * 2` messages counted back from the end, measured
/// by user-message count; if the history is shorter than that, everything
/// is preserved and `old` is empty.
pub fn partition_for_compaction(messages: &[Message], preserve_recent_turns: usize) -> (&[Message], &[Message]) {
    if preserve_recent_turns == 0 {
        return (messages, &[]);
    }
    let mut user_count = 0;
    for (i, message) in messages.iter().enumerate().rev() {
        if message.role == Role::User {
            user_count += 1;
            if user_count > preserve_recent_turns {
                return (&messages[..=i], &messages[i + 1..]);
            }
        }
    }
    (&[], messages)
}

/// `previewCompaction` — side-effect-free: partitions the same way
/// [`compact`] would and estimates the token count after, but never calls
/// the summarizer, so a caller can show this to the user before committing
/// to an actual (costly) compaction pass.
pub fn preview_compaction(messages: &[Message], preserve_recent_turns: usize) -> CompactionPreview {
    let (old, recent) = partition_for_compaction(messages, preserve_recent_turns);
    let tokens_before = estimate_message_tokens(messages);
    let synthetic_chars = CONTEXT_PREFIX.len() + ASSISTANT_ACK.len();
    let synthetic_tokens = ((synthetic_chars as f64) / 4.0).ceil() as u32;
    CompactionPreview {
        would_compact: !old.is_empty(),
        tokens_before,
        estimated_tokens_after: estimate_message_tokens(recent) + synthetic_tokens,
        preserved_turns: recent.iter().filter(|m| m.role == Role::User).count(),
        summarized_turns: old.iter().filter(|m| m.role == Role::User).count(),
    }
}

/// Run a full compaction pass. On summarizer failure the error propagates
/// and the caller's history is left untouched — callers should only commit
/// the returned `(Vec<Message>, CompactionResult)` after this returns `Ok`.
///
/// `edited_summary`, when supplied, overrides the summarizer's narrative
/// verbatim — compaction still succeeds even if the summarizer itself would
/// have failed, as long as an edited summary is provided.
pub async fn compact(
    messages: &[Message],
    summarizer: &dyn Summarizer,
    model: &str,
    working_directory: &str,
    preserve_recent_turns: usize,
    edited_summary: Option<String>,
    _reason: CompactionReason,
) -> Result<(Vec<Message>, CompactionResult)> {
    let (old, recent) = partition_for_compaction(messages, preserve_recent_turns);
    let tokens_before = estimate_message_tokens(messages);

    let (narrative, extracted_data) = if let Some(edited) = edited_summary {
        let extracted = match summarizer.summarize(old, model, working_directory).await {
            Ok(output) => output.extracted_data,
            Err(_) => ExtractedData::default(),
        };
        (edited, extracted)
    } else {
        let output = summarizer.summarize(old, model, working_directory).await?;
        (output.narrative, output.extracted_data)
    };

    let context_message = Message::user(format!("{CONTEXT_PREFIX}{narrative}"));
    let ack_message = Message::assistant(ASSISTANT_ACK);

    let mut new_history = Vec::with_capacity(2 + recent.len());
    new_history.push(context_message);
    new_history.push(ack_message);
    new_history.extend_from_slice(recent);

    let tokens_after = estimate_message_tokens(&new_history);
    let compression_ratio = if tokens_before == 0 {
        1.0
    } else {
        tokens_after as f64 / tokens_before as f64
    };

    let result = CompactionResult {
        success: true,
        tokens_before,
        tokens_after,
        compression_ratio,
        summary: narrative,
        extracted_data,
        preserved_turns: recent.iter().filter(|m| m.role == Role::User).count(),
        summarized_turns: old.iter().filter(|m| m.role == Role::User).count(),
    };

    Ok((new_history, result))
}

/// Component estimate of message-only tokens (system prompt and tools
/// excluded), matching the Context Manager's definition of `tokens_after` so
/// compression ratios are meaningful.
fn estimate_message_tokens(messages: &[Message]) -> u32 {
    let chars: usize = messages
        .iter()
        .map(|m| match &m.content {
            tron_domain::tool::MessageContent::Text(t) => t.len(),
            tron_domain::tool::MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    tron_domain::tool::ContentPart::Text { text } => text.len(),
                    tron_domain::tool::ContentPart::ToolUse { input, .. } => input.to_string().len(),
                    tron_domain::tool::ContentPart::ToolResult { content, .. } => content.len(),
                    tron_domain::tool::ContentPart::Image { .. } => 256,
                    tron_domain::tool::ContentPart::Thinking { thinking } => thinking.len(),
                })
                .sum(),
        })
        .sum();
    ((chars as f64) / 4.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedSummarizer {
        narrative: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _messages: &[Message], _model: &str, _working_directory: &str) -> Result<SummarizeOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SummarizeOutput {
                extracted_data: ExtractedData {
                    current_goal: Some("ship the feature".into()),
                    ..Default::default()
                },
                narrative: self.narrative.clone(),
            })
        }
    }

    struct FailingSummarizer;
    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _messages: &[Message], _model: &str, _working_directory: &str) -> Result<SummarizeOutput> {
            Err(tron_domain::error::Error::Summarizer("model unavailable".into()))
        }
    }

    fn turns(n: usize) -> Vec<Message> {
        (0..n)
            .flat_map(|i| vec![Message::user(format!("msg {i}")), Message::assistant(format!("reply {i}"))])
            .collect()
    }

    #[test]
    fn partition_preserves_exact_recent_turn_count() {
        let messages = turns(5);
        let (old, recent) = partition_for_compaction(&messages, 2);
        let old_users = old.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(old_users, 3);
        let recent_users = recent.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(recent_users, 2);
    }

    #[test]
    fn partition_keeps_everything_when_history_shorter_than_window() {
        let messages = turns(2);
        let (old, recent) = partition_for_compaction(&messages, 5);
        assert!(old.is_empty());
        assert_eq!(recent.len(), messages.len());
    }

    #[tokio::test]
    async fn compact_splices_synthetic_context_and_ack() {
        let messages = turns(6);
        let summarizer = FixedSummarizer {
            narrative: "working on the export feature".into(),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let (new_history, result) = compact(&messages, &summarizer, "claude-sonnet-4-5", "/work", 2, None, CompactionReason::ThresholdExceeded)
            .await
            .unwrap();

        assert!(result.success);
        assert!(matches!(new_history[0].content, tron_domain::tool::MessageContent::Text(ref t) if t.starts_with("[Context from earlier in session] working on the export feature")));
        assert_eq!(new_history[1].role, Role::Assistant);
        assert_eq!(result.preserved_turns, 2);
        assert_eq!(result.summarized_turns, 4);
    }

    #[tokio::test]
    async fn summarizer_failure_propagates_and_leaves_no_partial_result() {
        let messages = turns(6);
        let err = compact(&messages, &FailingSummarizer, "m", "/w", 2, None, CompactionReason::Manual)
            .await
            .unwrap_err();
        assert_eq!(err.category(), tron_domain::error::ErrorCategory::SummarizerFailure);
    }

    #[tokio::test]
    async fn edited_summary_overrides_narrative_even_when_summarizer_fails() {
        let messages = turns(6);
        let (new_history, result) = compact(
            &messages,
            &FailingSummarizer,
            "m",
            "/w",
            2,
            Some("operator-edited summary".into()),
            CompactionReason::Manual,
        )
        .await
        .unwrap();
        assert!(result.success);
        assert_eq!(result.summary, "operator-edited summary");
        assert!(matches!(new_history[0].content, tron_domain::tool::MessageContent::Text(ref t) if t.contains("operator-edited summary")));
    }

    #[test]
    fn preview_matches_compact_partition_without_calling_the_summarizer() {
        let messages = turns(6);
        let preview = preview_compaction(&messages, 2);
        assert!(preview.would_compact);
        assert_eq!(preview.preserved_turns, 2);
        assert_eq!(preview.summarized_turns, 4);
        assert!(preview.estimated_tokens_after < preview.tokens_before);
    }

    #[test]
    fn preview_reports_no_compaction_needed_when_history_fits_the_window() {
        let messages = turns(2);
        let preview = preview_compaction(&messages, 5);
        assert!(!preview.would_compact);
        assert_eq!(preview.summarized_turns, 0);
    }

    #[tokio::test]
    async fn compression_ratio_is_computed_from_message_only_tokens() {
        let messages = turns(10);
        let summarizer = FixedSummarizer {
            narrative: "short".into(),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let (_new_history, result) = compact(&messages, &summarizer, "m", "/w", 1, None, CompactionReason::Manual)
            .await
            .unwrap();
        assert!(result.compression_ratio < 1.0);
    }
}
