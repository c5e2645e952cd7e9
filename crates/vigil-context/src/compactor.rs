//! History compaction.
//!
//! The conversation is partitioned into:
//! - every system message (always kept),
//! - the first user message, the original instruction (always kept),
//! - the tail, cut into segments. A segment starts at each assistant
//!   message and absorbs the tool messages that follow it. A tool message
//!   with no open segment attaches to the last one (or opens its own).
//!
//! Only the last K segments survive. Later user messages in the tail (step
//! instructions in session mode) ride along with the segment that follows
//! them; the most recent one is always kept so the current step is never
//! lost, and trailing ones with no segment after them are kept too.
//!
//! Whole segments are kept or dropped, so pairing survives by construction.

use tracing::debug;
use vigil_core::messages::{Message, Role};

/// Result of a compaction pass.
#[derive(Clone, Debug, PartialEq)]
pub struct CompactionResult {
    /// Retained messages in original relative order.
    pub messages: Vec<Message>,
    /// Number of messages removed.
    pub removed: usize,
    /// Number of tail segments retained.
    pub segments_kept: usize,
}

impl CompactionResult {
    fn unchanged(messages: &[Message]) -> Self {
        Self {
            messages: messages.to_vec(),
            removed: 0,
            segments_kept: 0,
        }
    }
}

/// Keep only the last `keep_last` tail segments.
///
/// No-op when `keep_last < 0` or fewer than two messages exist.
#[must_use]
pub fn compact(messages: &[Message], keep_last: i32) -> CompactionResult {
    let Ok(keep_last) = usize::try_from(keep_last) else {
        return CompactionResult::unchanged(messages);
    };
    if messages.len() < 2 {
        return CompactionResult::unchanged(messages);
    }

    let mut keep = vec![false; messages.len()];
    let instruction = messages.iter().position(Message::is_user);
    let mut segments: Vec<Vec<usize>> = Vec::new();
    let mut preamble: Vec<usize> = Vec::new();
    let mut latest_user: Option<usize> = None;

    for (idx, msg) in messages.iter().enumerate() {
        if msg.is_system() || Some(idx) == instruction {
            keep[idx] = true;
            continue;
        }
        match msg.role() {
            Role::Assistant => {
                let mut segment = std::mem::take(&mut preamble);
                segment.push(idx);
                segments.push(segment);
            }
            Role::Tool => match segments.last_mut() {
                Some(last) => last.push(idx),
                None => {
                    let mut segment = std::mem::take(&mut preamble);
                    segment.push(idx);
                    segments.push(segment);
                }
            },
            Role::User => {
                preamble.push(idx);
                latest_user = Some(idx);
            }
            Role::System => {}
        }
    }

    for idx in preamble {
        keep[idx] = true;
    }
    if let Some(idx) = latest_user {
        keep[idx] = true;
    }

    let dropped = segments.len().saturating_sub(keep_last);
    let segments_kept = segments.len() - dropped;
    for segment in &segments[dropped..] {
        for &idx in segment {
            keep[idx] = true;
        }
    }

    let retained: Vec<Message> = messages
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(m, _)| m.clone())
        .collect();
    let removed = messages.len() - retained.len();
    if removed > 0 {
        debug!(
            removed,
            segments_dropped = dropped,
            segments_kept,
            "compacted history"
        );
    }

    CompactionResult {
        messages: retained,
        removed,
        segments_kept,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Map;
    use vigil_core::messages::{ToolCall, validate_pairing};

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, Map::new())
    }

    /// Segment `n`: one assistant with one call plus its result.
    fn segment(n: usize) -> Vec<Message> {
        let id = format!("c{n}");
        vec![
            Message::assistant_with_tools(Some(format!("s{n}")), vec![call(&id, "click")]),
            Message::tool_result(&id, "click", format!("r{n}"), false),
        ]
    }

    fn history(segments: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys"), Message::user("instruction")];
        for n in 1..=segments {
            msgs.extend(segment(n));
        }
        msgs
    }

    #[test]
    fn keep_one_of_three_segments() {
        let result = compact(&history(3), 1);
        let mut expected = vec![Message::system("sys"), Message::user("instruction")];
        expected.extend(segment(3));
        assert_eq!(result.messages, expected);
        assert_eq!(result.removed, 4);
        assert_eq!(result.segments_kept, 1);
    }

    #[test]
    fn negative_k_is_noop() {
        let msgs = history(4);
        assert_eq!(compact(&msgs, -1).messages, msgs);
    }

    #[test]
    fn single_message_is_noop() {
        let msgs = vec![Message::user("only")];
        assert_eq!(compact(&msgs, 0).messages, msgs);
    }

    #[test]
    fn zero_drops_every_segment() {
        let result = compact(&history(2), 0);
        assert_eq!(
            result.messages,
            vec![Message::system("sys"), Message::user("instruction")]
        );
    }

    #[test]
    fn empty_tail_keeps_system_and_instruction() {
        let msgs = vec![Message::system("sys"), Message::user("instruction")];
        assert_eq!(compact(&msgs, 1).messages, msgs);
    }

    #[test]
    fn k_larger_than_segment_count_keeps_all() {
        let msgs = history(2);
        let result = compact(&msgs, 10);
        assert_eq!(result.messages, msgs);
        assert_eq!(result.removed, 0);
    }

    #[test]
    fn multi_call_segment_stays_whole() {
        let mut msgs = vec![Message::system("sys"), Message::user("go")];
        msgs.extend(segment(1));
        msgs.push(Message::assistant_with_tools(None, vec![call("a", "type"), call("b", "press_key")]));
        msgs.push(Message::tool_result("a", "type", "typed", false));
        msgs.push(Message::tool_result("b", "press_key", "pressed", false));

        let result = compact(&msgs, 1);
        assert_eq!(result.messages.len(), 5);
        assert!(validate_pairing(&result.messages).is_ok());
    }

    #[test]
    fn orphan_tool_attaches_to_last_segment() {
        let mut msgs = history(2);
        msgs.push(Message::tool_result("stray", "snapshot", "late", false));
        let result = compact(&msgs, 1);
        assert_eq!(result.messages.last().unwrap().tool_call_id(), Some("stray"));
        assert_eq!(result.messages.len(), 5);
    }

    #[test]
    fn orphan_tool_before_any_assistant_opens_segment() {
        let msgs = vec![
            Message::user("go"),
            Message::tool_result("stray", "snapshot", "tree", false),
            Message::assistant("done"),
        ];
        let result = compact(&msgs, 1);
        assert_eq!(result.messages, vec![Message::user("go"), Message::assistant("done")]);
    }

    #[test]
    fn system_messages_anywhere_survive() {
        let mut msgs = history(2);
        msgs.insert(3, Message::system("late system note"));
        let result = compact(&msgs, 0);
        assert_eq!(result.messages.iter().filter(|m| m.is_system()).count(), 2);
    }

    #[test]
    fn latest_step_instruction_is_pinned() {
        let mut msgs = history(1);
        msgs.push(Message::user("Step 2: open settings"));
        msgs.extend(segment(2));
        msgs.extend(segment(3));

        let result = compact(&msgs, 1);
        assert!(result.messages.iter().any(|m| m.content() == Some("Step 2: open settings")));
        assert!(validate_pairing(&result.messages).is_ok());
        assert_eq!(result.messages.iter().filter(|m| m.is_assistant()).count(), 1);
    }

    #[test]
    fn older_step_instructions_leave_with_their_segment() {
        let mut msgs = history(0);
        msgs.push(Message::user("Step 2"));
        msgs.extend(segment(1));
        msgs.push(Message::user("Step 3"));
        msgs.extend(segment(2));

        let result = compact(&msgs, 1);
        let texts: Vec<_> = result.messages.iter().filter_map(Message::content).collect();
        assert!(!texts.contains(&"Step 2"));
        assert!(texts.contains(&"Step 3"));
    }

    #[test]
    fn trailing_user_messages_are_kept() {
        let mut msgs = history(2);
        msgs.push(Message::user("Step 4"));
        let result = compact(&msgs, 0);
        assert_eq!(result.messages.last().unwrap().content(), Some("Step 4"));
    }

    // ── properties ──────────────────────────────────────────────────

    #[derive(Clone, Debug)]
    enum Block {
        Calls(usize),
        Text,
        User,
    }

    fn block() -> impl Strategy<Value = Block> {
        prop_oneof![
            4 => (1usize..4).prop_map(Block::Calls),
            1 => Just(Block::Text),
            1 => Just(Block::User),
        ]
    }

    fn build(blocks: &[Block]) -> (Vec<Message>, usize) {
        let mut msgs = vec![Message::system("sys"), Message::user("instruction")];
        let mut segments = 0;
        for (b, kind) in blocks.iter().enumerate() {
            match kind {
                Block::Calls(n) => {
                    let calls: Vec<ToolCall> = (0..*n).map(|i| call(&format!("b{b}c{i}"), "click")).collect();
                    let results: Vec<Message> = calls
                        .iter()
                        .map(|c| Message::tool_result(&c.id, "click", "ok", false))
                        .collect();
                    msgs.push(Message::assistant_with_tools(None, calls));
                    msgs.extend(results);
                    segments += 1;
                }
                Block::Text => {
                    msgs.push(Message::assistant(format!("note {b}")));
                    segments += 1;
                }
                Block::User => msgs.push(Message::user(format!("step {b}"))),
            }
        }
        (msgs, segments)
    }

    proptest! {
        #[test]
        fn compaction_invariants(blocks in proptest::collection::vec(block(), 0..12), k in 0i32..6) {
            let (msgs, segments) = build(&blocks);
            let result = compact(&msgs, k);
            let out = &result.messages;

            prop_assert!(validate_pairing(out).is_ok());
            prop_assert_eq!(out.iter().filter(|m| m.is_system()).count(), 1);
            prop_assert_eq!(out[1].content(), Some("instruction"));

            let kept_assistants = out.iter().filter(|m| m.is_assistant()).count();
            prop_assert_eq!(kept_assistants, segments.min(usize::try_from(k).unwrap()));
            prop_assert_eq!(result.removed, msgs.len() - out.len());
        }
    }
}
