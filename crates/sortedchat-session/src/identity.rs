//! Chat identity register.
//!
//! Tracks which chat is current and a per-chat epoch. A chat's epoch is
//! bumped every time it becomes current after having been non-current, so any
//! asynchronous result stamped with an older epoch can be recognized as stale
//! and dropped. This is cooperative cancellation: network calls are never
//! aborted, their results are simply ignored on arrival.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sortedchat_core::types::{ChatId, Epoch, ProjectId};

/// A chat known to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub id: ChatId,
    pub project_id: Option<ProjectId>,
    pub name: String,
    pub epoch: Epoch,
}

impl ChatSession {
    fn new(id: ChatId, project_id: Option<ProjectId>, name: String) -> Self {
        Self {
            id,
            project_id,
            name,
            epoch: Epoch::default(),
        }
    }
}

#[derive(Debug, Default)]
struct RegisterState {
    current: Option<ChatId>,
    sessions: HashMap<ChatId, ChatSession>,
}

/// Single owner of `ChatSession`s and of the "current chat" pointer.
#[derive(Debug, Default)]
pub struct ChatIdentityRegister {
    state: Mutex<RegisterState>,
}

impl ChatIdentityRegister {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegisterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a chat, or refresh its name and project if already known.
    pub fn register(&self, id: &ChatId, project_id: Option<&ProjectId>, name: &str) {
        let mut state = self.state();
        match state.sessions.get_mut(id) {
            Some(session) => {
                session.name = name.to_string();
                if project_id.is_some() {
                    session.project_id = project_id.cloned();
                }
            }
            None => {
                state.sessions.insert(
                    id.clone(),
                    ChatSession::new(id.clone(), project_id.cloned(), name.to_string()),
                );
            }
        }
    }

    /// Returns `false` if the chat is unknown.
    pub fn rename(&self, id: &ChatId, name: &str) -> bool {
        match self.state().sessions.get_mut(id) {
            Some(session) => {
                session.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn session(&self, id: &ChatId) -> Option<ChatSession> {
        self.state().sessions.get(id).cloned()
    }

    pub fn current(&self) -> Option<ChatId> {
        self.state().current.clone()
    }

    /// Current chat together with the epoch to stamp on work issued for it.
    pub fn current_stamp(&self) -> Option<(ChatId, Epoch)> {
        let state = self.state();
        let id = state.current.as_ref()?;
        let epoch = state.sessions.get(id).map(|s| s.epoch).unwrap_or_default();
        Some((id.clone(), epoch))
    }

    /// Make `id` the current chat.
    ///
    /// Returns the chat's new epoch when the current chat changed, or `None`
    /// when `id` was already current (nothing to invalidate). Unknown chats
    /// are registered on the fly with an empty name.
    pub fn set_current(&self, id: &ChatId) -> Option<Epoch> {
        let mut state = self.state();
        if state.current.as_ref() == Some(id) {
            return None;
        }
        let session = state
            .sessions
            .entry(id.clone())
            .or_insert_with(|| ChatSession::new(id.clone(), None, String::new()));
        session.epoch = session.epoch.next();
        let epoch = session.epoch;
        let previous = state.current.replace(id.clone());
        tracing::debug!(
            chat_id = %id,
            previous = ?previous.as_ref().map(ChatId::as_str),
            %epoch,
            "Current chat changed"
        );
        Some(epoch)
    }

    /// Make no chat current. Returns the chat that was current.
    pub fn clear_current(&self) -> Option<ChatId> {
        self.state().current.take()
    }

    /// Epoch to stamp on asynchronous work started for `id`.
    pub fn epoch(&self, id: &ChatId) -> Option<Epoch> {
        self.state().sessions.get(id).map(|s| s.epoch)
    }

    /// Whether `(id, epoch)` still designates the current chat.
    pub fn is_current(&self, id: &ChatId, epoch: Epoch) -> bool {
        Self::matches(&self.state(), id, epoch)
    }

    /// Run `f` only if `(id, epoch)` is current, holding the register lock so
    /// no chat switch can interleave between the check and `f`.
    ///
    /// `f` must not call back into the register.
    pub fn with_current<R>(&self, id: &ChatId, epoch: Epoch, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state();
        if Self::matches(&state, id, epoch) {
            Some(f())
        } else {
            None
        }
    }

    /// Like [`with_current`](Self::with_current) but ignores the epoch.
    pub fn with_current_chat<R>(&self, id: &ChatId, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state();
        if state.current.as_ref() == Some(id) {
            Some(f())
        } else {
            None
        }
    }

    fn matches(state: &RegisterState, id: &ChatId, epoch: Epoch) -> bool {
        state.current.as_ref() == Some(id)
            && state.sessions.get(id).map(|s| s.epoch) == Some(epoch)
    }
}

// =============================================================================
// Tests
// =============================================================================
