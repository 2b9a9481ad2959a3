//! Budgeted assembly of the bounded conversation context.
//!
//! A context has three zones:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ System prompt                │  never trimmed
//! ├──────────────────────────────┤
//! │ Summaries                    │  dropped / truncated, newest kept first
//! ├──────────────────────────────┤
//! │ Recent messages (last N)     │  never trimmed
//! └──────────────────────────────┘
//! ```
//!
//! When the estimated total exceeds `max_token_limit - token_buffer`, only
//! the summaries zone gives way. Summaries are taken newest-first while they
//! fit; the first one that doesn't is either truncated into the remaining
//! room or dropped, and selection stops there. Older, smaller summaries are
//! never used to fill the gap.

use crate::context::estimator::estimate_structured;
use crate::summary::Summary;
use crate::summary::store::SummaryStore;
use crate::{ContextConfig, ContextError, Message, validate_messages};
use tracing::{debug, warn};

/// The bounded view of a session sent to the model on one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    pub system_prompt: Option<String>,
    /// Store order when nothing was trimmed, newest-first after trimming.
    pub summaries: Vec<Summary>,
    /// The retention window, verbatim and in original order.
    pub recent_messages: Vec<Message>,
}

impl ConversationContext {
    /// Per-zone estimated token usage against `config`'s budget.
    pub fn breakdown(&self, config: &ContextConfig) -> ContextBreakdown {
        let system_prompt_tokens = system_prompt_cost(self.system_prompt.as_deref());
        let summary_tokens = self.summaries.iter().map(Summary::estimated_cost).sum();
        let recent_tokens = messages_cost(&self.recent_messages);
        ContextBreakdown {
            system_prompt_tokens,
            summary_tokens,
            recent_tokens,
            total_tokens: system_prompt_tokens + summary_tokens + recent_tokens,
            budget: config.token_budget(),
        }
    }
}

/// Per-zone breakdown of a [`ConversationContext`]'s estimated cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBreakdown {
    pub system_prompt_tokens: usize,
    pub summary_tokens: usize,
    pub recent_tokens: usize,
    pub total_tokens: usize,
    /// `max_token_limit - token_buffer`.
    pub budget: usize,
}

impl ContextBreakdown {
    pub fn fits(&self) -> bool {
        self.total_tokens <= self.budget
    }

    pub fn usage_pct(&self) -> f64 {
        if self.budget == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.budget as f64 * 100.0
    }

    /// One-line summary for logs.
    pub fn to_log_string(&self) -> String {
        format!(
            "Context: ~{} tokens ({:.0}% of {} budget) [system {}, summaries {}, recent {}]",
            self.total_tokens,
            self.usage_pct(),
            self.budget,
            self.system_prompt_tokens,
            self.summary_tokens,
            self.recent_tokens,
        )
    }
}

/// Estimated cost of the system prompt. An absent prompt costs nothing.
pub fn system_prompt_cost(system_prompt: Option<&str>) -> usize {
    system_prompt.map_or(0, |p| estimate_structured(p))
}

/// Estimated cost of a message slice.
pub fn messages_cost(messages: &[Message]) -> usize {
    messages.iter().map(estimate_structured).sum()
}

/// Assemble system prompt, stored summaries and the retention window into a
/// context that fits the token budget.
///
/// Fails only when `messages` contains a malformed message. A store that
/// cannot list summaries is treated as having none.
pub fn build_conversation_context(
    config: &ContextConfig,
    store: &dyn SummaryStore,
    session_id: &str,
    messages: &[Message],
    system_prompt: Option<&str>,
) -> Result<ConversationContext, ContextError> {
    validate_messages(messages)?;

    let window_start = messages.len().saturating_sub(config.max_recent_messages);
    let recent_messages = messages[window_start..].to_vec();

    let summaries = store.list_summaries(session_id).unwrap_or_else(|e| {
        warn!("Building context for session {session_id} without summaries: {e}");
        Vec::new()
    });

    let mandatory = system_prompt_cost(system_prompt) + messages_cost(&recent_messages);
    let summaries_total: usize = summaries.iter().map(Summary::estimated_cost).sum();
    let budget = config.token_budget();

    let summaries = if mandatory + summaries_total <= budget {
        summaries
    } else {
        let remaining = budget.saturating_sub(mandatory);
        let selected = select_summaries(summaries, remaining, config.min_truncated_summary_tokens);
        debug!(
            "Trimmed summaries for session {session_id}: kept {} (mandatory ~{mandatory} tokens, {remaining} remaining of {budget})",
            selected.len()
        );
        selected
    };

    Ok(ConversationContext {
        system_prompt: system_prompt.map(str::to_string),
        summaries,
        recent_messages,
    })
}

/// Pick summaries newest-first within `remaining` tokens.
///
/// The first summary that does not fit whole is truncated into the leftover
/// room if more than `min_truncated_tokens` of text would survive, otherwise
/// dropped. Either way selection ends at the first miss.
pub fn select_summaries(
    mut summaries: Vec<Summary>,
    remaining: usize,
    min_truncated_tokens: usize,
) -> Vec<Summary> {
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut selected = Vec::new();
    let mut cumulative = 0;
    for summary in summaries {
        let cost = summary.estimated_cost();
        if cumulative + cost <= remaining {
            cumulative += cost;
            selected.push(summary);
            continue;
        }

        let available = remaining
            .saturating_sub(cumulative)
            .saturating_sub(summary.topics_cost());
        if available > min_truncated_tokens {
            debug!(
                "Truncating summary {} from ~{cost} to ~{available} text tokens",
                summary.storage_key()
            );
            selected.push(summary.truncated_to(available));
        } else {
            debug!(
                "Dropping summary {} (~{cost} tokens) and all older ones",
                summary.storage_key()
            );
        }
        break;
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use crate::context::estimator::estimate;
    use crate::summary::SummaryProgress;
    use crate::summary::store::InMemorySummaryStore;

    /// A summary with no topics whose estimated cost is exactly `cost`.
    /// Empty topics serialize as `[]`, one token.
    fn summary_costing(cost: usize, created_at: i64) -> Summary {
        Summary {
            created_at,
            ..Summary::new("x".repeat(2 * (cost - 1)), vec![], &[])
        }
    }

    fn history(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("message {i}"))).collect()
    }

    struct BrokenStore;

    impl SummaryStore for BrokenStore {
        fn get_progress(&self, _: &str) -> SummaryProgress {
            SummaryProgress::default()
        }
        fn set_progress(&self, _: &str, _: &SummaryProgress) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn append_summary(&self, _: &str, _: &Summary) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn list_summaries(&self, _: &str) -> Result<Vec<Summary>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn delete_all(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[test]
    fn summary_cost_helper_is_exact() {
        assert_eq!(summary_costing(40, 1).estimated_cost(), 40);
        assert_eq!(summary_costing(1, 1).estimated_cost(), 1);
    }

    #[test]
    fn recent_window_is_last_n_messages() {
        let store = InMemorySummaryStore::new();
        let msgs = history(15);
        let ctx = build_conversation_context(
            &ContextConfig::default(),
            &store,
            "s",
            &msgs,
            Some("sys"),
        )
        .unwrap();
        assert_eq!(ctx.recent_messages, msgs[5..].to_vec());
        assert_eq!(ctx.system_prompt.as_deref(), Some("sys"));
        assert!(ctx.summaries.is_empty());
    }

    #[test]
    fn under_budget_returns_everything() {
        let store = InMemorySummaryStore::new();
        store.append_summary("s", &summary_costing(50, 1)).unwrap();
        store.append_summary("s", &summary_costing(60, 2)).unwrap();

        let config = ContextConfig::default();
        let ctx = build_conversation_context(&config, &store, "s", &history(3), None).unwrap();
        assert_eq!(ctx.summaries.len(), 2);
        assert!(ctx.breakdown(&config).fits());
    }

    #[test]
    fn newest_oversized_summary_is_truncated_and_older_ignored() {
        // Budget 54000 with 40000- and 20000-token summaries. Whatever the
        // mandatory cost, the newest doesn't fit and the older one is never
        // considered even though it would fit on its own.
        let config = ContextConfig::default();
        let store = InMemorySummaryStore::new();
        store.append_summary("s", &summary_costing(20_000, 100)).unwrap();
        store.append_summary("s", &summary_costing(40_000, 200)).unwrap();

        let msgs = vec![Message::user("y".repeat(39_900))];
        let mandatory = messages_cost(&msgs);
        assert!(mandatory > 19_900 && mandatory < 20_100);

        let ctx = build_conversation_context(&config, &store, "s", &msgs, None).unwrap();
        assert_eq!(ctx.summaries.len(), 1);
        let kept = &ctx.summaries[0];
        assert_eq!(kept.created_at, 200);
        assert!(kept.summary_text.ends_with("..."));

        let remaining = 54_000 - mandatory;
        assert_eq!(kept.estimated_cost(), remaining);
        let breakdown = ctx.breakdown(&config);
        assert_eq!(breakdown.total_tokens, 54_000);
        assert!(breakdown.fits());
    }

    #[test]
    fn first_miss_is_dropped_when_too_little_room_remains() {
        // remaining 150: newest (100) fits, next (200) would leave 50 - 1 < 100.
        let selected = select_summaries(
            vec![
                summary_costing(10, 1),
                summary_costing(200, 2),
                summary_costing(100, 3),
            ],
            150,
            100,
        );
        let order: Vec<i64> = selected.iter().map(|s| s.created_at).collect();
        assert_eq!(order, vec![3]);
    }

    #[test]
    fn truncation_floor_is_exclusive() {
        // available = 101 - 0 - 1 = 100, which is not > 100.
        assert!(select_summaries(vec![summary_costing(500, 1)], 101, 100).is_empty());
        // available = 101 > 100.
        let kept = select_summaries(vec![summary_costing(500, 1)], 102, 100);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].estimated_cost() <= 102);
        assert!(estimate(&kept[0].summary_text) <= 101);
    }

    #[test]
    fn selection_is_newest_first() {
        let selected = select_summaries(
            vec![summary_costing(5, 1), summary_costing(5, 3), summary_costing(5, 2)],
            1_000,
            100,
        );
        let order: Vec<i64> = selected.iter().map(|s| s.created_at).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn mandatory_over_budget_drops_all_summaries() {
        let config = ContextConfig::default().with_token_limit(200, 100);
        let store = InMemorySummaryStore::new();
        store.append_summary("s", &summary_costing(10, 1)).unwrap();

        let msgs = vec![Message::user("z".repeat(400))];
        let ctx = build_conversation_context(&config, &store, "s", &msgs, Some("sys")).unwrap();
        assert!(ctx.summaries.is_empty());
        // Nothing left to drop; recent messages survive untouched.
        assert_eq!(ctx.recent_messages, msgs);
        assert!(!ctx.breakdown(&config).fits());
    }

    #[test]
    fn budget_holds_whenever_summaries_remain() {
        let config = ContextConfig::default().with_token_limit(2_000, 500);
        let store = InMemorySummaryStore::new();
        for (i, cost) in [300, 700, 250, 900, 120].into_iter().enumerate() {
            store
                .append_summary("s", &summary_costing(cost, i as i64 + 1))
                .unwrap();
        }
        for n in [1, 5, 10, 30] {
            let ctx =
                build_conversation_context(&config, &store, "s", &history(n), Some("You are helpful."))
                    .unwrap();
            let breakdown = ctx.breakdown(&config);
            assert!(breakdown.fits() || ctx.summaries.is_empty(), "{breakdown:?}");
        }
    }

    #[test]
    fn store_failure_degrades_to_no_summaries() {
        let ctx = build_conversation_context(
            &ContextConfig::default(),
            &BrokenStore,
            "s",
            &history(4),
            None,
        )
        .unwrap();
        assert!(ctx.summaries.is_empty());
        assert_eq!(ctx.recent_messages.len(), 4);
    }

    #[test]
    fn malformed_messages_fail_fast() {
        let msgs = vec![Message::user("ok"), Message::new(crate::Role::User, vec![])];
        let err = build_conversation_context(
            &ContextConfig::default(),
            &InMemorySummaryStore::new(),
            "s",
            &msgs,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ContextError::MalformedMessage { index: 1, .. }));
    }

    #[test]
    fn absent_system_prompt_costs_nothing() {
        assert_eq!(system_prompt_cost(None), 0);
        // "\"abcd\"" is 6 units.
        assert_eq!(system_prompt_cost(Some("abcd")), 3);
    }

    #[test]
    fn breakdown_log_string_mentions_zones() {
        let ctx = ConversationContext {
            system_prompt: Some("sys".into()),
            summaries: vec![summary_costing(10, 1)],
            recent_messages: history(2),
        };
        let line = ctx.breakdown(&ContextConfig::default()).to_log_string();
        assert!(line.contains("summaries 10"));
        assert!(line.contains("54000 budget"));
    }
}
