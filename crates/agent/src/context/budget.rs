//! ContextBudgetPlanner: how many tokens the model may spend on its reply.
//!
//! The reply gets whatever the input leaves of the total window, but never
//! less than the reserved floor and never more than the reply ceiling.

use super::token::TokenCounter;
use redscope_config::BudgetConfig;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ContextBudgetPlanner {
    counter: Arc<TokenCounter>,
}

impl ContextBudgetPlanner {
    pub fn new(counter: Arc<TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// `max(reserved_floor, total_window - est(instructions) - est(query))`,
    /// clamped to `reply_ceiling`.
    ///
    /// Oversized input saturates to the floor instead of going negative.
    /// Expects `reserved_floor <= reply_ceiling`, which config validation enforces.
    pub fn plan_reply_budget(
        &self,
        instructions: &str,
        query: &str,
        total_window: usize,
        reserved_floor: usize,
        reply_ceiling: usize,
    ) -> usize {
        let input = self.estimate_tokens(instructions) + self.estimate_tokens(query);
        total_window
            .saturating_sub(input)
            .max(reserved_floor)
            .min(reply_ceiling)
    }

    /// [`plan_reply_budget`](Self::plan_reply_budget) with configured limits.
    pub fn plan(&self, instructions: &str, query: &str, budget: &BudgetConfig) -> usize {
        self.plan_reply_budget(
            instructions,
            query,
            budget.total_window,
            budget.reserved_floor,
            budget.reply_ceiling,
        )
    }
}
