//! Conversation memory.
//!
//! Holds the ordered question/answer turns of one session. Memory is
//! session-scoped and never persisted. With `max_turns` set, the oldest
//! turns are dropped once the limit is reached.

use std::collections::VecDeque;

use chrono::Utc;

use crate::models::ConversationTurn;

#[derive(Debug, Default)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    max_turns: Option<usize>,
}

impl ConversationMemory {
    /// Unbounded memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory that keeps only the most recent `max_turns` turns.
    /// `Some(0)` keeps nothing.
    pub fn bounded(max_turns: Option<usize>) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    /// Append a completed turn, evicting the oldest when full.
    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.max_turns == Some(0) {
            return;
        }
        self.turns.push_back(ConversationTurn {
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        });
        if let Some(max) = self.max_turns {
            while self.turns.len() > max {
                self.turns.pop_front();
            }
        }
    }

    /// Turns in chronological order.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_preserves_order() {
        let mut m = ConversationMemory::new();
        m.push("q1", "a1");
        m.push("q2", "a2");
        let qs: Vec<&str> = m.turns().map(|t| t.question.as_str()).collect();
        assert_eq!(qs, vec!["q1", "q2"]);
    }

    #[test]
    fn test_bounded_evicts_oldest() {
        let mut m = ConversationMemory::bounded(Some(2));
        for i in 0..5 {
            m.push(format!("q{}", i), format!("a{}", i));
        }
        assert_eq!(m.len(), 2);
        let qs: Vec<&str> = m.turns().map(|t| t.question.as_str()).collect();
        assert_eq!(qs, vec!["q3", "q4"]);
    }

    #[test]
    fn test_zero_bound_keeps_nothing() {
        let mut m = ConversationMemory::bounded(Some(0));
        m.push("q", "a");
        assert!(m.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut m = ConversationMemory::new();
        m.push("q", "a");
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.turns().count(), 0);
    }
}
