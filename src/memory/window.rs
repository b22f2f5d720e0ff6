//! Bounded context window
//!
//! Token accounting is a character estimate: `ceil(chars / chars_per_token)`
//! plus a fixed per-message overhead. Tool-call arguments count towards the
//! characters of the message that carries them.
//!
//! When the raw history is over the ceiling, the oldest non-pinned messages are
//! replaced by one synthetic system message built from extractive one-line
//! snippets. The projection is a pure function of the history and the
//! [`WindowConfig`], so repeated reads over the same history are identical.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::message::{Message, Payload, Role};

const TRUNCATION_MARKER: &str = " ...[truncated]";

/// Size accounting for the context window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Ceiling on the estimated token count of a window
    pub max_tokens: usize,
    pub chars_per_token: usize,
    /// Tokens charged per message for role/framing
    pub message_overhead: usize,
    /// Number of snippet lines kept in a summary
    pub summary_lines: usize,
    /// Characters kept per snippet line
    pub summary_line_chars: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 32_000,
            chars_per_token: 4,
            message_overhead: 4,
            summary_lines: 12,
            summary_line_chars: 80,
        }
    }
}

impl WindowConfig {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn tokens_for_chars(&self, chars: usize) -> usize {
        chars.div_ceil(self.chars_per_token.max(1)) + self.message_overhead
    }

    /// Upper bound on the cost of any summary this config can produce
    fn summary_bound(&self) -> usize {
        // header + one "omitted" line + the snippet lines, each with role prefix
        let header = 120;
        let line = self.summary_line_chars + 24;
        self.tokens_for_chars(header + (self.summary_lines + 1) * line)
    }
}

/// Estimated token cost of one message
pub fn estimate_tokens(message: &Message, config: &WindowConfig) -> usize {
    let mut chars = message.content.chars().count();
    if let Some(Payload::ToolCalls { calls }) = &message.payload {
        chars += calls
            .iter()
            .map(|c| c.tool_name.len() + c.arguments.to_string().len())
            .sum::<usize>();
    }
    config.tokens_for_chars(chars)
}

/// Collapse a run of messages into one synthetic system message.
///
/// The summary takes the sequence number and timestamp of the last message it
/// covers. Returns `None` for an empty run.
pub fn summarize(run: &[Message], config: &WindowConfig) -> Option<Message> {
    let first = run.first()?;
    let last = run.last()?;

    let mut content = format!(
        "[Context summary: {} earlier messages compacted, seq {}-{}]",
        run.len(),
        first.seq,
        last.seq
    );

    let skip = run.len().saturating_sub(config.summary_lines);
    if skip > 0 {
        content.push_str(&format!("\n- ... {} older messages omitted", skip));
    }
    for message in &run[skip..] {
        content.push_str(&format!(
            "\n- {}: {}",
            message.role,
            snippet(message, config.summary_line_chars)
        ));
    }

    Some(Message {
        seq: last.seq,
        role: Role::System,
        content,
        payload: Some(Payload::Summary {
            first_seq: first.seq,
            last_seq: last.seq,
            count: run.len(),
        }),
        timestamp: last.timestamp,
        pinned: false,
    })
}

fn snippet(message: &Message, max_chars: usize) -> String {
    let mut text = message.content.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        let names: Vec<&str> = message
            .tool_calls()
            .iter()
            .map(|c| c.tool_name.as_str())
            .collect();
        if !names.is_empty() {
            text = format!("called {}", names.join(", "));
        }
    }
    if text.chars().count() > max_chars {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    } else {
        text
    }
}

/// Ordered, size-bounded projection of a transcript
#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    messages: Vec<Message>,
    estimated_tokens: usize,
    summarized: usize,
}

impl ContextWindow {
    /// Project `history` (in sequence order) under the configured ceiling
    pub fn build(history: &[Message], config: &WindowConfig) -> Self {
        let costs: Vec<usize> = history.iter().map(|m| estimate_tokens(m, config)).collect();
        let total: usize = costs.iter().sum();
        if total <= config.max_tokens {
            return Self {
                messages: history.to_vec(),
                estimated_tokens: total,
                summarized: 0,
            };
        }

        let pinned_cost: usize = history
            .iter()
            .zip(&costs)
            .filter(|(m, _)| m.pinned)
            .map(|(_, c)| *c)
            .sum();
        let budget = config
            .max_tokens
            .saturating_sub(pinned_cost + config.summary_bound());

        // Newest messages first, until the budget runs out
        let mut cut = history.len();
        let mut used = 0;
        for i in (0..history.len()).rev() {
            if !history[i].pinned {
                if used + costs[i] > budget {
                    break;
                }
                used += costs[i];
            }
            cut = i;
        }

        // A tool result must not appear without the call that produced it
        while cut < history.len() && history[cut].role == Role::Tool && !history[cut].pinned {
            cut += 1;
        }
        if cut == history.len() && !history.is_empty() {
            let mut newest = history.len() - 1;
            while newest > 0 && history[newest].role == Role::Tool {
                newest -= 1;
            }
            cut = newest;
        }

        let run: Vec<Message> = history[..cut].iter().filter(|m| !m.pinned).cloned().collect();
        let mut head: Vec<Message> = history[..cut].iter().filter(|m| m.pinned).cloned().collect();
        if let Some(summary) = summarize(&run, config) {
            head.push(summary);
        }
        head.sort_by_key(|m| m.seq);

        let mut messages = head;
        messages.extend_from_slice(&history[cut..]);
        let estimated_tokens = enforce_ceiling(&mut messages, config);

        Self {
            messages,
            estimated_tokens,
            summarized: run.len(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    /// Number of transcript messages folded into the summary
    pub fn summarized(&self) -> usize {
        self.summarized
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Largest piece of text in a window that can still be shrunk
#[derive(Debug, Clone, Copy)]
enum Bulk {
    Content { msg: usize },
    Arguments { msg: usize, call: usize },
}

/// Arguments at or below this size are left alone
const MIN_ELIDED_ARGUMENTS: usize = 96;

fn largest_bulk(messages: &[Message]) -> Option<(Bulk, usize)> {
    let mut best: Option<(Bulk, usize)> = None;
    let mut consider = |bulk: Bulk, len: usize| {
        // ties go to the oldest candidate
        match best {
            Some((_, best_len)) if len <= best_len => {}
            _ => best = Some((bulk, len)),
        }
    };

    for (msg, message) in messages.iter().enumerate() {
        let content = message.content.chars().count();
        if content > 0 {
            consider(Bulk::Content { msg }, content);
        }
        if let Some(Payload::ToolCalls { calls }) = &message.payload {
            for (call, c) in calls.iter().enumerate() {
                let len = c.arguments.to_string().len();
                if len > MIN_ELIDED_ARGUMENTS {
                    consider(Bulk::Arguments { msg, call }, len);
                }
            }
        }
    }
    best
}

fn truncate_chars(text: &str, keep: usize) -> String {
    if keep == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

/// Longest string anywhere inside a JSON value
fn longest_string(value: &mut Value) -> Option<&mut String> {
    match value {
        Value::String(s) => Some(s),
        Value::Array(items) => items
            .iter_mut()
            .filter_map(longest_string)
            .max_by_key(|s| s.len()),
        Value::Object(map) => map
            .values_mut()
            .filter_map(longest_string)
            .max_by_key(|s| s.len()),
        _ => None,
    }
}

/// Drop at least `excess` characters from tool-call arguments: shorten the
/// longest string when that is enough, otherwise replace them with a marker
fn shrink_arguments(arguments: &mut Value, excess: usize) {
    let total = arguments.to_string().len();
    if let Some(longest) = longest_string(arguments) {
        let len = longest.chars().count();
        let needed = excess + TRUNCATION_MARKER.len();
        if len > needed {
            *longest = truncate_chars(longest, len - needed);
            return;
        }
    }
    *arguments = json!({ "elided": format!("{} characters of arguments omitted", total) });
}

/// Truncate the bulkiest text until the window fits. Only reachable when
/// pinned messages or the newest exchange alone exceed the ceiling.
///
/// Tool-call arguments are shrunk in place; call ids stay intact so results
/// still pair with their calls.
fn enforce_ceiling(messages: &mut [Message], config: &WindowConfig) -> usize {
    loop {
        let total: usize = messages.iter().map(|m| estimate_tokens(m, config)).sum();
        if total <= config.max_tokens {
            return total;
        }
        let Some((bulk, len)) = largest_bulk(messages) else {
            return total;
        };

        let excess_chars = (total - config.max_tokens) * config.chars_per_token.max(1);
        match bulk {
            Bulk::Content { msg } => {
                let keep = len.saturating_sub(excess_chars + TRUNCATION_MARKER.len());
                let message = &mut messages[msg];
                message.content = truncate_chars(&message.content, keep);
            }
            Bulk::Arguments { msg, call } => {
                if let Some(Payload::ToolCalls { calls }) = &mut messages[msg].payload {
                    shrink_arguments(&mut calls[call].arguments, excess_chars);
                }
            }
        }
    }
}
