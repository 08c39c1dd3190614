//! Count-based compaction: fold the middle of the history into one summary.

use serde_json::{Value, json};
use tracing::debug;

use crate::message::{
    ContentBlock, KIND_SUMMARY, META_KIND, META_SUMMARIZED_COUNT, META_THINKING, Message,
    MessageContent,
};
use warden_core::CompactionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Compaction is a no-op at or below this many messages
    pub threshold: usize,
    /// Messages kept verbatim at the end
    pub keep_recent: usize,
    /// Characters kept from each summarized message
    pub summary_chars: usize,
    /// Compact automatically at the end of a turn
    pub auto: bool,
}

impl From<&CompactionSettings> for CompactionPolicy {
    fn from(settings: &CompactionSettings) -> Self {
        Self {
            threshold: settings.threshold(),
            keep_recent: settings.keep_recent(),
            summary_chars: settings.summary_chars,
            auto: settings.auto,
        }
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self::from(&CompactionSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Messages folded into the summary
    pub summarized: usize,
    pub before: usize,
    pub after: usize,
}

/// Compact `messages` in place. Returns `None` when nothing changed.
///
/// Index 0 is never touched. The kept tail is the last `keep_recent`
/// messages, widened backwards while it would start on a tool result so a
/// result is never separated from the call that produced it.
pub(crate) fn compact(messages: &mut Vec<Message>, policy: &CompactionPolicy) -> Option<CompactionReport> {
    let before = messages.len();
    if before <= policy.threshold {
        return None;
    }

    let keep = policy.keep_recent.min(before - 1);
    let mut tail_start = before - keep;
    while tail_start > 1 && tail_start < before && messages[tail_start].is_tool_result() {
        tail_start -= 1;
    }
    // Re-folding a lone summary changes nothing useful
    if tail_start <= 1 || (tail_start == 2 && messages[1].is_summary()) {
        debug!(before, "Nothing to summarize outside the kept tail");
        return None;
    }

    let folded: Vec<Message> = messages.drain(1..tail_start).collect();
    let summary = summarize(&folded, policy.summary_chars);
    messages.insert(1, summary);

    let report = CompactionReport {
        summarized: folded.len(),
        before,
        after: messages.len(),
    };
    debug!(?report, "Conversation compacted");
    Some(report)
}

fn summarize(folded: &[Message], summary_chars: usize) -> Message {
    let mut text = format!("[Summary of {} earlier messages]", folded.len());
    let mut thinking: Vec<Value> = Vec::new();

    for message in folded {
        let label = if message.is_tool_result() {
            "tool"
        } else if message.is_summary() {
            "summary"
        } else {
            message.role.as_str()
        };
        text.push('\n');
        text.push_str(label);
        text.push_str(": ");
        text.push_str(&truncate_chars(&render(message), summary_chars));

        if let Some(Value::Array(carried)) = message.metadata.get(META_THINKING) {
            thinking.extend(carried.iter().cloned());
        }
        thinking.extend(
            message
                .thinking_blocks()
                .filter_map(|b| serde_json::to_value(b).ok()),
        );
    }

    let mut summary = Message::system(text)
        .with_metadata(META_KIND, json!(KIND_SUMMARY))
        .with_metadata(META_SUMMARIZED_COUNT, json!(folded.len()));
    if !thinking.is_empty() {
        summary = summary.with_metadata(META_THINKING, Value::Array(thinking));
    }
    summary
}

/// One-line rendering of a message, without reasoning blocks.
fn render(message: &Message) -> String {
    let blocks = match &message.content {
        MessageContent::Text(text) => return text.replace('\n', " "),
        MessageContent::Blocks(blocks) => blocks,
    };
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.replace('\n', " ")),
            ContentBlock::ToolUse { name, .. } => Some(format!("[called {name}]")),
            ContentBlock::ToolResult { content, .. } => Some(match content {
                Value::String(s) => s.replace('\n', " "),
                other => other.to_string(),
            }),
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
