//! Search debouncer.
//!
//! Raw input is published immediately. A query goes out only after the input
//! has been quiet for the debounce window, tagged with a fresh generation;
//! its results are applied only if no newer generation was issued since.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sortedchat_core::events::SessionEvent;
use sortedchat_core::types::Generation;
use sortedchat_transport::ChatTransport;

use crate::view::ViewState;

#[derive(Debug, Default)]
struct SearchState {
    query_text: String,
    /// Bumped on every keystroke; a settle timer only fires for the latest one.
    input_seq: u64,
    generation: Generation,
    /// Debounce timer, present only until it settles.
    pending: Option<JoinHandle<()>>,
}

pub struct SearchDebouncer {
    transport: Arc<dyn ChatTransport>,
    view: Arc<ViewState>,
    debounce: Duration,
    state: Mutex<SearchState>,
}

impl SearchDebouncer {
    pub fn new(transport: Arc<dyn ChatTransport>, view: Arc<ViewState>, debounce: Duration) -> Self {
        Self {
            transport,
            view,
            debounce,
            state: Mutex::new(SearchState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record new raw input and (re)arm the debounce timer.
    ///
    /// Blank input clears the results right away and sends nothing.
    pub fn set_query_text(self: &Arc<Self>, text: &str) {
        let mut state = self.state();
        state.input_seq += 1;
        if let Some(timer) = state.pending.take() {
            timer.abort();
        }
        state.query_text = text.to_string();
        self.view.search_text.set(text.to_string());

        if text.trim().is_empty() {
            state.generation = state.generation.next();
            self.view.search_results.set(Vec::new());
            debug!(generation = %state.generation, "Search cleared");
            return;
        }

        let seq = state.input_seq;
        let this = Arc::clone(self);
        state.pending = Some(tokio::spawn(async move { this.settle(seq).await }));
    }

    async fn settle(&self, seq: u64) {
        tokio::time::sleep(self.debounce).await;

        let (generation, query) = {
            let mut state = self.state();
            if state.input_seq != seq {
                return;
            }
            // Detach: from here on newer input supersedes by generation only.
            state.pending = None;
            state.generation = state.generation.next();
            (state.generation, state.query_text.trim().to_string())
        };
        debug!(%generation, query = %query, "Search query issued");

        let results = match self.transport.search(&query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(%generation, error = %e, "Search failed");
                return;
            }
        };

        let result_count = results.len();
        {
            let state = self.state();
            if state.generation != generation {
                debug!(%generation, current = %state.generation, "Stale search results dropped");
                return;
            }
            self.view.search_results.set(results);
        }
        self.view.emit(SessionEvent::SearchApplied {
            generation,
            result_count,
        });
    }

    /// Empty the input and results, discarding anything in flight. Used when
    /// the search surface opens or closes.
    pub fn reset(&self) {
        let mut state = self.state();
        state.input_seq += 1;
        if let Some(timer) = state.pending.take() {
            timer.abort();
        }
        state.query_text.clear();
        state.generation = state.generation.next();
        self.view.search_text.set(String::new());
        self.view.search_results.set(Vec::new());
    }

    /// Generation of the most recently issued (or cleared) query.
    pub fn generation(&self) -> Generation {
        self.state().generation
    }

    pub fn has_pending_timer(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Cancel the pending debounce timer, if any.
    pub fn shutdown(&self) {
        if let Some(timer) = self.state().pending.take() {
            timer.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
