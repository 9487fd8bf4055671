//! Conversation context built from history at dispatch time.

use crate::history::HistoryRecord;
use crate::tokens::TokenEstimator;
use llm::ChatMessage;
use tracing::debug;

/// One prior question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub response: String,
}

/// The last successful exchanges of an instance, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    exchanges: Vec<Exchange>,
}

impl ConversationContext {
    /// Take the last `n` successful records from `records` (oldest first).
    pub fn from_records<'a, I>(records: I, n: usize) -> Self
    where
        I: IntoIterator<Item = &'a HistoryRecord>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut exchanges: Vec<Exchange> = records
            .into_iter()
            .rev()
            .filter(|r| r.success)
            .take(n)
            .map(|r| Exchange {
                question: r.question.clone(),
                response: r.response.clone(),
            })
            .collect();
        exchanges.reverse();
        Self { exchanges }
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Estimated tokens of the context plus `question`.
    pub fn estimate(&self, question: &str, estimator: &dyn TokenEstimator) -> u64 {
        self.exchanges
            .iter()
            .map(|e| estimator.estimate(&e.question) + estimator.estimate(&e.response))
            .sum::<u64>()
            + estimator.estimate(question)
    }

    /// Drop the oldest exchanges when the estimate exceeds `max_tokens`,
    /// until it is at most half of it or nothing is left.
    pub fn fit_to_budget(&mut self, question: &str, max_tokens: u32, estimator: &dyn TokenEstimator) {
        let max = u64::from(max_tokens);
        let mut estimate = self.estimate(question, estimator);
        if estimate <= max {
            return;
        }

        let before = self.exchanges.len();
        let target = max / 2;
        let mut drop = 0;
        while estimate > target && drop < self.exchanges.len() {
            let e = &self.exchanges[drop];
            estimate -= estimator.estimate(&e.question) + estimator.estimate(&e.response);
            drop += 1;
        }
        self.exchanges.drain(..drop);

        debug!(dropped = before - self.exchanges.len(), estimate, max_tokens, "Trimmed conversation context");
    }

    /// Messages for the provider: system prompt, prior pairs, then the question.
    pub fn into_messages(self, system_prompt: Option<&str>, question: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.exchanges.len() * 2 + 2);
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        for exchange in self.exchanges {
            messages.push(ChatMessage::user(exchange.question));
            messages.push(ChatMessage::assistant(exchange.response));
        }
        messages.push(ChatMessage::user(question));
        messages
    }
}
