//! Per-chat message log.
//!
//! Append-only: the only mutations are a wholesale replacement by a fetched
//! snapshot and the atomic append of a user/assistant pair committed by the
//! streaming aggregator.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sortedchat_core::types::{ChatId, Message};

/// Committed exchanges remembered per chat for fetch reconciliation.
const RECENT_EXCHANGES: usize = 16;

/// A user message and the assistant reply it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: Message,
    pub assistant: Message,
}

impl Exchange {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self {
            user: Message::user(user_text),
            assistant: Message::assistant(assistant_text),
        }
    }
}

/// Issued when a history fetch starts; hand it back with the fetched snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    chat_id: ChatId,
    commits_at_issue: u64,
}

impl FetchTicket {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }
}

#[derive(Debug, Default)]
struct ChatLog {
    messages: Vec<Message>,
    loaded: bool,
    commits: u64,
    recent: VecDeque<(u64, Exchange)>,
}

#[derive(Debug, Default)]
pub struct HistoryStore {
    logs: Mutex<HashMap<ChatId, ChatLog>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<ChatId, ChatLog>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin_fetch(&self, chat_id: &ChatId) -> FetchTicket {
        let mut logs = self.logs();
        let log = logs.entry(chat_id.clone()).or_default();
        FetchTicket {
            chat_id: chat_id.clone(),
            commits_at_issue: log.commits,
        }
    }

    /// Replace the chat's log with a fetched snapshot and return the result.
    ///
    /// Exchanges committed after the ticket was issued may or may not be part
    /// of the snapshot; each is re-appended only if the snapshot's tail does
    /// not already hold it, so no exchange is ever duplicated.
    pub fn apply_fetch(&self, ticket: FetchTicket, fetched: Vec<Message>) -> Vec<Message> {
        let mut logs = self.logs();
        let log = logs.entry(ticket.chat_id).or_default();

        let late: Vec<&Exchange> = log
            .recent
            .iter()
            .filter(|(seq, _)| *seq >= ticket.commits_at_issue)
            .map(|(_, exchange)| exchange)
            .collect();
        let tail_window = late.len() * 2;

        let mut messages = fetched;
        let tail_start = messages.len().saturating_sub(tail_window);
        for exchange in late {
            if !contains_pair(&messages[tail_start..], exchange) {
                messages.push(exchange.user.clone());
                messages.push(exchange.assistant.clone());
            }
        }

        log.messages = messages;
        log.loaded = true;
        log.messages.clone()
    }

    /// Append a user/assistant pair in one step. Returns the new log length.
    pub fn commit_exchange(&self, chat_id: &ChatId, exchange: Exchange) -> usize {
        let mut logs = self.logs();
        let log = logs.entry(chat_id.clone()).or_default();
        log.messages.push(exchange.user.clone());
        log.messages.push(exchange.assistant.clone());
        log.recent.push_back((log.commits, exchange));
        if log.recent.len() > RECENT_EXCHANGES {
            log.recent.pop_front();
        }
        log.commits += 1;
        log.messages.len()
    }

    pub fn messages(&self, chat_id: &ChatId) -> Vec<Message> {
        self.logs()
            .get(chat_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// True when nothing is known for the chat yet, loaded or not.
    pub fn is_empty(&self, chat_id: &ChatId) -> bool {
        self.logs()
            .get(chat_id)
            .map_or(true, |log| log.messages.is_empty())
    }

    pub fn is_loaded(&self, chat_id: &ChatId) -> bool {
        self.logs().get(chat_id).is_some_and(|log| log.loaded)
    }

    /// Number of exchanges committed locally for the chat.
    pub fn commit_count(&self, chat_id: &ChatId) -> u64 {
        self.logs().get(chat_id).map_or(0, |log| log.commits)
    }
}

fn contains_pair(messages: &[Message], exchange: &Exchange) -> bool {
    messages
        .windows(2)
        .any(|pair| pair[0].same_content(&exchange.user) && pair[1].same_content(&exchange.assistant))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sortedchat_core::types::Role;

    fn chat() -> ChatId {
        ChatId::new("a")
    }

    #[test]
    fn test_unknown_chat_is_empty_and_unloaded() {
        let store = HistoryStore::new();
        assert!(store.is_empty(&chat()));
        assert!(!store.is_loaded(&chat()));
        assert!(store.messages(&chat()).is_empty());
    }

    #[test]
    fn test_commit_appends_pair_in_order() {
        let store = HistoryStore::new();
        let len = store.commit_exchange(&chat(), Exchange::new("Hello", "Hi there"));
        assert_eq!(len, 2);

        let messages = store.messages(&chat());
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert_eq!(store.commit_count(&chat()), 1);
    }

    #[test]
    fn test_fetch_replaces_log() {
        let store = HistoryStore::new();
        let ticket = store.begin_fetch(&chat());
        let result = store.apply_fetch(ticket, vec![Message::user("old"), Message::assistant("reply")]);
        assert_eq!(result.len(), 2);
        assert!(store.is_loaded(&chat()));
        assert!(!store.is_empty(&chat()));
    }

    #[test]
    fn test_commit_before_fetch_issue_is_not_reapplied() {
        let store = HistoryStore::new();
        store.commit_exchange(&chat(), Exchange::new("Hello", "Hi"));
        let ticket = store.begin_fetch(&chat());
        // The service already holds the exchange.
        let result = store.apply_fetch(ticket, vec![Message::user("Hello"), Message::assistant("Hi")]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_commit_during_fetch_missing_from_snapshot_is_kept() {
        let store = HistoryStore::new();
        let ticket = store.begin_fetch(&chat());
        store.commit_exchange(&chat(), Exchange::new("Hello", "Hi"));

        let result = store.apply_fetch(ticket, vec![]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].content, "Hello");
        assert_eq!(result[1].content, "Hi");
    }

    #[test]
    fn test_commit_during_fetch_present_in_snapshot_is_not_duplicated() {
        let store = HistoryStore::new();
        let ticket = store.begin_fetch(&chat());
        store.commit_exchange(&chat(), Exchange::new("Hello", "Hi"));

        let snapshot = vec![
            Message { id: Some("1".into()), ..Message::user("Hello") },
            Message { id: Some("2".into()), ..Message::assistant("Hi") },
        ];
        let result = store.apply_fetch(ticket, snapshot);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn test_identical_older_exchange_outside_tail_does_not_hide_new_commit() {
        let store = HistoryStore::new();
        let ticket = store.begin_fetch(&chat());
        store.commit_exchange(&chat(), Exchange::new("ping", "pong"));

        // Same text exchanged long ago, then something else.
        let snapshot = vec![
            Message::user("ping"),
            Message::assistant("pong"),
            Message::user("other"),
            Message::assistant("thing"),
        ];
        let result = store.apply_fetch(ticket, snapshot);
        assert_eq!(result.len(), 6);
        assert_eq!(result[4].content, "ping");
    }

    #[test]
    fn test_recent_exchanges_are_bounded() {
        let store = HistoryStore::new();
        for i in 0..(RECENT_EXCHANGES + 4) {
            store.commit_exchange(&chat(), Exchange::new(format!("q{}", i), format!("a{}", i)));
        }
        assert_eq!(store.commit_count(&chat()), (RECENT_EXCHANGES + 4) as u64);
        assert_eq!(store.messages(&chat()).len(), (RECENT_EXCHANGES + 4) * 2);
    }

    #[test]
    fn test_ticket_remembers_chat() {
        let store = HistoryStore::new();
        let ticket = store.begin_fetch(&chat());
        assert_eq!(ticket.chat_id(), &chat());
    }
}
