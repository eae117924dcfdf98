//! Context Manager: bounded conversation memory with named compaction
//! strategies and tool-call/tool-result pair preservation.
//!
//! Grounded on the teacher's `ai/context.rs` token-budget mechanics
//! (`estimate_tokens`, `fits_in_context`), generalized from a single
//! truncate-to-fit rule into the strategy system this spec requires.

use std::collections::HashSet;

use crate::types::{Message, MessageRole};

/// Parameters shared by every compaction strategy.
#[derive(Debug, Clone)]
pub struct CompactionParams {
    /// Fraction of `max_tokens` the strategy aims to leave the context at.
    pub compaction_target: f32,
    /// Fraction of units kept verbatim before pruning further.
    pub keep_ratio: f32,
    /// Number of most-recent tool-call/result units always preserved.
    pub preserve_recent_tool_pairs: usize,
    /// Always keep the first user message (the task description).
    pub preserve_task_description: bool,
    /// Roles that are never dropped by compaction.
    pub pinned_roles: HashSet<MessageRole>,
}

impl Default for CompactionParams {
    fn default() -> Self {
        Self {
            compaction_target: 0.6,
            keep_ratio: 0.5,
            preserve_recent_tool_pairs: 2,
            preserve_task_description: true,
            pinned_roles: HashSet::new(),
        }
    }
}

/// Named compaction strategies, each with tunable [`CompactionParams`].
#[derive(Debug, Clone)]
pub enum CompactionStrategy {
    /// Keep the last `k` conversational units verbatim, drop older
    /// non-pinned units.
    SlidingWindow { k: usize, params: CompactionParams },
    /// `SlidingWindow { k: 5 }` with a larger compaction target.
    SlidingConservative { params: CompactionParams },
    /// Aggregate dropped units into one synthetic "[SUMMARY …]" message.
    SummarizeCoding { params: CompactionParams },
    /// Drop the oldest non-pinned unit repeatedly until under budget.
    DropOldestPinned { params: CompactionParams },
}

impl CompactionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CompactionStrategy::SlidingWindow { .. } => "sliding_window_k",
            CompactionStrategy::SlidingConservative { .. } => "sliding_conservative",
            CompactionStrategy::SummarizeCoding { .. } => "summarize_coding",
            CompactionStrategy::DropOldestPinned { .. } => "drop_oldest_pinned",
        }
    }

    fn params(&self) -> &CompactionParams {
        match self {
            CompactionStrategy::SlidingWindow { params, .. }
            | CompactionStrategy::SlidingConservative { params }
            | CompactionStrategy::SummarizeCoding { params }
            | CompactionStrategy::DropOldestPinned { params } => params,
        }
    }
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        CompactionStrategy::SlidingWindow {
            k: 10,
            params: CompactionParams::default(),
        }
    }
}

/// A contiguous conversational unit: either a single message, or an
/// assistant-with-tool_calls message plus all of its following tool-role
/// replies. Units are the granularity compaction operates on so a
/// tool-call/tool-result pair is never split.
struct Unit {
    messages: Vec<Message>,
}

impl Unit {
    fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(estimate_message_tokens).sum()
    }

    fn is_pinned(&self, pinned_roles: &HashSet<MessageRole>) -> bool {
        self.messages.iter().any(|m| pinned_roles.contains(&m.role))
    }
}

fn group_into_units(messages: &[Message]) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let m = &messages[i];
        if m.has_tool_calls() {
            let mut group = vec![m.clone()];
            let mut j = i + 1;
            while j < messages.len() && messages[j].role == MessageRole::Tool {
                group.push(messages[j].clone());
                j += 1;
            }
            units.push(Unit { messages: group });
            i = j;
        } else {
            units.push(Unit {
                messages: vec![m.clone()],
            });
            i += 1;
        }
    }
    units
}

/// Cheap token estimate: ~4 characters per token, matching the teacher's
/// heuristic in `ai/context.rs`.
fn estimate_message_tokens(m: &Message) -> usize {
    let mut chars = m.content.len();
    for tc in &m.tool_calls {
        chars += tc.name.len() + tc.args.to_string().len() + 16;
    }
    (chars + 3) / 4
}

/// Maintains the ordered [`Message`] sequence for a session, subject to a
/// token budget, with named compaction strategies.
pub struct ContextManager {
    messages: Vec<Message>,
    system_prompt: Option<String>,
    max_tokens: usize,
    strategy: CompactionStrategy,
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: None,
            max_tokens,
            strategy: CompactionStrategy::default(),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Append a message and compact if the context now exceeds the budget.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        if self.estimate_tokens() > self.max_tokens {
            self.compact();
        }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = Some(prompt.into());
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Drop all messages; the system prompt, if any, survives.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Current ordered message list, excluding the system prompt (which is
    /// conveyed to engines separately).
    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn set_strategy(&mut self, strategy: CompactionStrategy) {
        self.strategy = strategy;
    }

    pub fn get_strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Cheap approximation of total tokens currently held, including the
    /// system prompt.
    pub fn estimate_tokens(&self) -> usize {
        let sys = self
            .system_prompt
            .as_ref()
            .map(|s| (s.len() + 3) / 4)
            .unwrap_or(0);
        sys + self
            .messages
            .iter()
            .map(estimate_message_tokens)
            .sum::<usize>()
    }

    fn compact(&mut self) {
        let units = group_into_units(&self.messages);
        if units.is_empty() {
            return;
        }

        let params = self.strategy.params().clone();
        let target_tokens = ((self.max_tokens as f32) * params.compaction_target) as usize;

        let first_is_task_description = params.preserve_task_description
            && units[0]
                .messages
                .first()
                .map(|m| m.role == MessageRole::User)
                .unwrap_or(false);

        let rebuilt = match &self.strategy {
            CompactionStrategy::SlidingWindow { k, .. } => {
                self.sliding_window(&units, *k, first_is_task_description, &params)
            }
            CompactionStrategy::SlidingConservative { .. } => {
                self.sliding_window(&units, 5, first_is_task_description, &params)
            }
            CompactionStrategy::SummarizeCoding { .. } => {
                self.summarize_coding(&units, first_is_task_description, &params, target_tokens)
            }
            CompactionStrategy::DropOldestPinned { .. } => {
                self.drop_oldest_pinned(units, first_is_task_description, &params, target_tokens)
            }
        };

        self.messages = rebuilt;
    }

    fn sliding_window(
        &self,
        units: &[Unit],
        k: usize,
        first_is_task_description: bool,
        params: &CompactionParams,
    ) -> Vec<Message> {
        let total = units.len();
        let keep_from = total.saturating_sub(k.max(1));
        let mut out = Vec::new();

        if first_is_task_description && keep_from > 0 {
            out.extend(units[0].messages.iter().cloned());
        }

        for (idx, unit) in units.iter().enumerate() {
            let is_recent = idx >= keep_from;
            let is_recent_tool_pair = unit.messages.first().map(|m| m.has_tool_calls()).unwrap_or(false)
                && idx + params.preserve_recent_tool_pairs >= total;
            let pinned = unit.is_pinned(&params.pinned_roles);
            if is_recent || is_recent_tool_pair || pinned || (first_is_task_description && idx == 0) {
                if idx == 0 && first_is_task_description {
                    continue; // already pushed above
                }
                out.extend(unit.messages.iter().cloned());
            }
        }

        out
    }

    fn summarize_coding(
        &self,
        units: &[Unit],
        first_is_task_description: bool,
        params: &CompactionParams,
        target_tokens: usize,
    ) -> Vec<Message> {
        let mut kept = Vec::new();
        let mut dropped_count = 0usize;
        let mut running = 0usize;

        // Walk from the most recent backwards, keeping units until we'd
        // exceed the target; everything older gets summarized.
        let mut kept_indices = HashSet::new();
        for (idx, unit) in units.iter().enumerate().rev() {
            let pinned = unit.is_pinned(&params.pinned_roles);
            if running + unit.estimate_tokens() <= target_tokens || pinned {
                running += unit.estimate_tokens();
                kept_indices.insert(idx);
            } else if !(first_is_task_description && idx == 0) {
                dropped_count += 1;
            }
        }
        if first_is_task_description {
            kept_indices.insert(0);
        }

        if dropped_count > 0 {
            kept.push(Message::system(format!(
                "[SUMMARY of {dropped_count} earlier message group(s) omitted to stay within the context budget]"
            )));
        }
        for (idx, unit) in units.iter().enumerate() {
            if kept_indices.contains(&idx) {
                kept.extend(unit.messages.iter().cloned());
            }
        }
        kept
    }

    fn drop_oldest_pinned(
        &self,
        mut units: Vec<Unit>,
        first_is_task_description: bool,
        params: &CompactionParams,
        target_tokens: usize,
    ) -> Vec<Message> {
        loop {
            let total: usize = units.iter().map(Unit::estimate_tokens).sum();
            if total <= target_tokens {
                break;
            }
            let drop_idx = units.iter().position(|u| {
                !u.is_pinned(&params.pinned_roles)
            });
            let drop_idx = match drop_idx {
                Some(0) if first_is_task_description && units.len() > 1 => {
                    units.iter().skip(1).position(|u| !u.is_pinned(&params.pinned_roles)).map(|p| p + 1)
                }
                other => other,
            };
            match drop_idx {
                Some(idx) => {
                    units.remove(idx);
                }
                None => break, // everything left is pinned; budget exceeded by necessity
            }
        }
        units.into_iter().flat_map(|u| u.messages).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    #[test]
    fn estimate_tokens_uses_four_chars_per_token_heuristic() {
        let mut ctx = ContextManager::new(1000);
        ctx.add_message(Message::user("hello world")); // 11 chars -> 3 tokens
        assert_eq!(ctx.estimate_tokens(), (11 + 3) / 4);
    }

    #[test]
    fn clear_drops_messages_but_keeps_system_prompt() {
        let mut ctx = ContextManager::new(1000);
        ctx.set_system_prompt("be helpful");
        ctx.add_message(Message::user("hi"));
        ctx.clear();
        assert!(ctx.get_messages().is_empty());
        assert_eq!(ctx.system_prompt(), Some("be helpful"));
    }

    #[test]
    fn compaction_preserves_tool_call_result_pairs_as_atomic_units() {
        let mut ctx = ContextManager::new(40);
        ctx.set_strategy(CompactionStrategy::SlidingWindow {
            k: 1,
            params: CompactionParams {
                preserve_task_description: false,
                preserve_recent_tool_pairs: 0,
                ..Default::default()
            },
        });
        ctx.add_message(Message::user("long padding message one ...."));
        ctx.add_message(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "t1".into(),
                name: "file_read".into(),
                args: json!({"path": "a.txt"}),
            }],
        ));
        ctx.add_message(Message::tool("file contents", "t1"));
        ctx.add_message(Message::user("another long padding message to force compaction"));

        let messages = ctx.get_messages();
        // Whenever the assistant tool-call message survives, its matching
        // tool reply must also survive, in order.
        for (idx, m) in messages.iter().enumerate() {
            if m.has_tool_calls() {
                let next = messages.get(idx + 1);
                assert!(next.is_some(), "tool-call message must be followed by its result");
                assert_eq!(next.unwrap().tool_call_id.as_deref(), Some("t1"));
            }
        }
    }

    #[test]
    fn summarize_coding_inserts_summary_note_when_dropping() {
        let mut ctx = ContextManager::new(20);
        ctx.set_strategy(CompactionStrategy::SummarizeCoding {
            params: CompactionParams {
                preserve_task_description: false,
                ..Default::default()
            },
        });
        for i in 0..10 {
            ctx.add_message(Message::user(format!("message number {i} with some padding text")));
        }
        let messages = ctx.get_messages();
        assert!(messages.iter().any(|m| m.content.starts_with("[SUMMARY")));
    }

    #[test]
    fn preserve_task_description_keeps_first_user_message() {
        let mut ctx = ContextManager::new(30);
        ctx.set_strategy(CompactionStrategy::SlidingWindow {
            k: 1,
            params: CompactionParams::default(),
        });
        ctx.add_message(Message::user("THE ORIGINAL TASK DESCRIPTION"));
        for i in 0..10 {
            ctx.add_message(Message::assistant(format!("reply {i} padding padding padding")));
        }
        let messages = ctx.get_messages();
        assert_eq!(messages[0].content, "THE ORIGINAL TASK DESCRIPTION");
    }

    #[test]
    fn drop_oldest_pinned_never_removes_pinned_roles() {
        let mut ctx = ContextManager::new(20);
        let mut pinned_roles = HashSet::new();
        pinned_roles.insert(MessageRole::System);
        ctx.set_strategy(CompactionStrategy::DropOldestPinned {
            params: CompactionParams {
                preserve_task_description: false,
                pinned_roles,
                ..Default::default()
            },
        });
        ctx.add_message(Message::system("pinned note that must survive"));
        for i in 0..10 {
            ctx.add_message(Message::user(format!("filler message {i} padding padding")));
        }
        assert!(ctx.get_messages().iter().any(|m| m.role == MessageRole::System));
    }
}
