//! Pairing-safe truncation of a message history to a retention count.
//!
//! Dropping old messages naively breaks two structural rules the model API
//! enforces:
//!
//! - a `toolResult` must be preceded by the `toolUse` it answers, and a
//!   `toolUse` must be followed by its `toolResult`;
//! - messages carrying model reasoning must be replayed, together with the
//!   tool calls made in the same turn.
//!
//! [`limit_context_length`] keeps the last `K` messages and then pulls in
//! exactly the older messages needed to satisfy those rules. The output can
//! therefore be longer than `K`; it is always an order-preserving subsequence
//! of the input.

use crate::{ContextError, Message, validate_messages};
use std::collections::HashSet;
use tracing::debug;

/// Keep the last `retention_count` messages plus every older message needed
/// for tool pairing and reasoning pinning.
///
/// Returns the input unchanged when `retention_count` is zero or not smaller
/// than the history.
pub fn limit_context_length(messages: &[Message], retention_count: usize) -> Vec<Message> {
    retained_indices(messages, retention_count)
        .into_iter()
        .map(|i| messages[i].clone())
        .collect()
}

/// [`limit_context_length`] for untrusted input: fails fast on malformed
/// messages instead of silently keeping or dropping them.
pub fn try_limit_context_length(
    messages: &[Message],
    retention_count: usize,
) -> Result<Vec<Message>, ContextError> {
    validate_messages(messages)?;
    Ok(limit_context_length(messages, retention_count))
}

/// Indices (ascending) of the messages [`limit_context_length`] retains.
pub fn retained_indices(messages: &[Message], retention_count: usize) -> Vec<usize> {
    let len = messages.len();
    if retention_count == 0 || len <= retention_count {
        return (0..len).collect();
    }

    let split = len - retention_count;
    let (older, recent) = messages.split_at(split);

    // Ids referenced by the retained set. Grows as older messages are pulled in.
    let mut tool_use_ids: HashSet<&str> = HashSet::new();
    let mut tool_result_ids: HashSet<&str> = HashSet::new();
    for msg in recent {
        tool_use_ids.extend(msg.tool_use_ids());
        tool_result_ids.extend(msg.tool_result_ids());
    }

    // Tool calls made in the same turn as model reasoning, across the whole history.
    let reasoning_tool_ids: HashSet<&str> = messages
        .iter()
        .filter(|m| m.has_reasoning())
        .flat_map(|m| m.tool_use_ids())
        .collect();

    let mut required = vec![false; older.len()];

    // A pulled-in message may itself reference blocks further back, so repeat
    // until no new older message is selected.
    loop {
        let mut changed = false;
        for (i, msg) in older.iter().enumerate() {
            if required[i] || !is_required(msg, &tool_use_ids, &tool_result_ids, &reasoning_tool_ids)
            {
                continue;
            }
            required[i] = true;
            changed = true;
            tool_use_ids.extend(msg.tool_use_ids());
            tool_result_ids.extend(msg.tool_result_ids());
        }
        if !changed {
            break;
        }
    }

    let kept: Vec<usize> = required
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .chain(split..len)
        .collect();

    debug!(
        "Context truncation: {} messages -> {} (retention {}, {} pinned older)",
        len,
        kept.len(),
        retention_count,
        kept.len() - retention_count
    );
    kept
}

/// Whether an older message must be retained alongside the current selection.
fn is_required(
    msg: &Message,
    tool_use_ids: &HashSet<&str>,
    tool_result_ids: &HashSet<&str>,
    reasoning_tool_ids: &HashSet<&str>,
) -> bool {
    if msg.has_reasoning() {
        return true;
    }
    let answers_retained_call = msg
        .tool_result_ids()
        .any(|id| tool_use_ids.contains(id) || reasoning_tool_ids.contains(id));
    let called_by_retained_result = msg
        .tool_use_ids()
        .any(|id| tool_result_ids.contains(id) || reasoning_tool_ids.contains(id));
    answers_retained_call || called_by_retained_result
}
