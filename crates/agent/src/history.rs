//! ConversationHistoryStore: the bounded, ordered record of dialogue turns.
//!
//! Turns are kept oldest first. After every append the store trims itself
//! FIFO: it drops the oldest turns while the total token estimate exceeds
//! the threshold, then while the turn count exceeds the hard cap. Ordinals
//! are assigned once and never reused, even across [`clear`](ConversationHistoryStore::clear).

use crate::context::TokenCounter;
use redscope_config::HistoryConfig;
use redscope_core::error::HistoryError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// One user query and, once the model has answered, its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    /// Monotonically increasing, starting at 1.
    pub ordinal: u64,
    pub user_query: String,
    /// `None` until the response is recorded.
    pub ai_response: Option<String>,
}

impl DialogueTurn {
    /// The recorded response, or an empty string while pending.
    pub fn response(&self) -> &str {
        self.ai_response.as_deref().unwrap_or("")
    }
}

#[derive(Debug)]
pub struct ConversationHistoryStore {
    turns: VecDeque<DialogueTurn>,
    next_ordinal: u64,
    counter: Arc<TokenCounter>,
    token_threshold: usize,
    max_turns: usize,
}

impl ConversationHistoryStore {
    pub fn new(counter: Arc<TokenCounter>, token_threshold: usize, max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            next_ordinal: 1,
            counter,
            token_threshold,
            max_turns,
        }
    }

    pub fn from_config(counter: Arc<TokenCounter>, config: &HistoryConfig) -> Self {
        Self::new(counter, config.token_threshold, config.max_turns)
    }

    /// Record a new query with no response yet. Returns its ordinal.
    pub fn append(&mut self, user_query: impl Into<String>) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.turns.push_back(DialogueTurn {
            ordinal,
            user_query: user_query.into(),
            ai_response: None,
        });
        self.trim(self.token_threshold, self.max_turns);
        ordinal
    }

    /// Attach the response to a pending turn. A response is recorded at most once.
    ///
    /// A turn already evicted by trimming reports [`HistoryError::UnknownOrdinal`].
    pub fn record_response(
        &mut self,
        ordinal: u64,
        response: impl Into<String>,
    ) -> Result<(), HistoryError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.ordinal == ordinal)
            .ok_or(HistoryError::UnknownOrdinal(ordinal))?;

        if turn.ai_response.is_some() {
            return Err(HistoryError::ResponseAlreadyRecorded(ordinal));
        }
        turn.ai_response = Some(response.into());

        self.trim(self.token_threshold, self.max_turns);
        Ok(())
    }

    /// Append a query together with its response.
    pub fn append_turn(&mut self, user_query: impl Into<String>, response: impl Into<String>) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.turns.push_back(DialogueTurn {
            ordinal,
            user_query: user_query.into(),
            ai_response: Some(response.into()),
        });
        self.trim(self.token_threshold, self.max_turns);
        ordinal
    }

    /// Evict oldest turns until the token total is within `token_threshold`
    /// and the turn count is within `max_turns`. Returns how many were evicted.
    pub fn trim(&mut self, token_threshold: usize, max_turns: usize) -> usize {
        let mut total = self.total_tokens();
        let mut evicted = 0;

        while total > token_threshold {
            let Some(oldest) = self.turns.pop_front() else {
                break;
            };
            total -= self.turn_tokens(&oldest);
            evicted += 1;
        }

        while self.turns.len() > max_turns {
            self.turns.pop_front();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, remaining = self.turns.len(), "Trimmed conversation history");
        }
        evicted
    }

    /// Copy of the retained turns, oldest first.
    pub fn snapshot(&self) -> Vec<DialogueTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &DialogueTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Sum of token estimates over every retained query and response.
    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(|t| self.turn_tokens(t)).sum()
    }

    fn turn_tokens(&self, turn: &DialogueTurn) -> usize {
        self.counter.count(&turn.user_query) + self.counter.count(turn.response())
    }

    /// Plain-text transcript, one block per turn.
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            let _ = writeln!(out, "=== Dialogue {} ===", turn.ordinal);
            let _ = writeln!(out, "User: {}", turn.user_query);
            let _ = writeln!(out, "AI: {}", turn.response());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(threshold: usize, cap: usize) -> ConversationHistoryStore {
        ConversationHistoryStore::new(Arc::new(TokenCounter::heuristic()), threshold, cap)
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    #[test]
    fn ordinals_increase_from_one() {
        let mut history = store(4000, 50);
        assert_eq!(history.append("first"), 1);
        assert_eq!(history.append("second"), 2);
        assert_eq!(history.append_turn("third", "answer"), 3);
    }

    #[test]
    fn record_response_once() {
        let mut history = store(4000, 50);
        let ordinal = history.append("scan 10.0.0.1");
        history.record_response(ordinal, "22/tcp open").unwrap();
        assert_eq!(history.snapshot()[0].ai_response.as_deref(), Some("22/tcp open"));

        assert_eq!(
            history.record_response(ordinal, "again"),
            Err(HistoryError::ResponseAlreadyRecorded(ordinal))
        );
        assert_eq!(history.snapshot()[0].response(), "22/tcp open");
    }

    #[test]
    fn record_response_for_unknown_ordinal() {
        let mut history = store(4000, 50);
        assert_eq!(
            history.record_response(7, "x"),
            Err(HistoryError::UnknownOrdinal(7))
        );
    }

    #[test]
    fn under_limits_nothing_is_evicted() {
        let mut history = store(4000, 50);
        for i in 0..10 {
            history.append_turn(format!("query {i}"), "ok");
        }
        assert_eq!(history.len(), 10);
        assert_eq!(history.trim(4000, 50), 0);
    }

    #[test]
    fn token_threshold_evicts_oldest_first() {
        let mut history = store(4000, 50);
        for _ in 0..5 {
            history.append_turn(words(500), words(500));
        }
        // 5 * 1000 > 4000, so the oldest goes
        let ordinals: Vec<_> = history.turns().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, vec![2, 3, 4, 5]);
        assert!(history.total_tokens() <= 4000);
    }

    #[test]
    fn turn_cap_evicts_oldest_first() {
        let mut history = store(4000, 50);
        for i in 0..60 {
            history.append_turn(format!("q{i}"), "a");
        }
        assert_eq!(history.len(), 50);
        assert_eq!(history.snapshot()[0].ordinal, 11);
        assert_eq!(history.snapshot()[49].ordinal, 60);
    }

    #[test]
    fn trim_keeps_a_contiguous_suffix() {
        let mut history = store(4000, 50);
        for i in 0..30 {
            history.append_turn(words(100 + i * 10), words(50));
        }
        let ordinals: Vec<_> = history.turns().map(|t| t.ordinal).collect();
        assert_eq!(*ordinals.last().unwrap(), 30);
        for pair in ordinals.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
        assert!(history.total_tokens() <= 4000);
    }

    #[test]
    fn single_oversized_turn_empties_history() {
        let mut history = store(100, 50);
        history.append_turn("short", "short");
        history.append_turn(words(200), "");
        assert!(history.is_empty());
    }

    #[test]
    fn recording_a_long_response_triggers_trim() {
        let mut history = store(100, 50);
        history.append_turn(words(40), words(40));
        let ordinal = history.append("next");
        history.record_response(ordinal, words(50)).unwrap();
        let ordinals: Vec<_> = history.turns().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, vec![2]);
    }

    #[test]
    fn clear_keeps_ordinals_moving_forward() {
        let mut history = store(4000, 50);
        history.append("one");
        history.append("two");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.append("three"), 3);
    }

    #[test]
    fn export_text_format() {
        let mut history = store(4000, 50);
        history.append_turn("What is open?", "Port 80");
        history.append("pending");
        assert_eq!(
            history.export_text(),
            "=== Dialogue 1 ===\nUser: What is open?\nAI: Port 80\n\n\
             === Dialogue 2 ===\nUser: pending\nAI: \n\n"
        );
    }

    #[test]
    fn from_config_uses_limits() {
        let config = HistoryConfig {
            token_threshold: 10,
            max_turns: 2,
        };
        let mut history = ConversationHistoryStore::from_config(Arc::new(TokenCounter::heuristic()), &config);
        for _ in 0..3 {
            history.append_turn("a", "b");
        }
        assert_eq!(history.len(), 2);
    }
}
