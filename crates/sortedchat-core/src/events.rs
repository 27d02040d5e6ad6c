use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, Epoch, Generation, ProjectId};

/// Severity of a user-facing notification (toast).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// Events emitted by the orchestration layer after a state change.
///
/// Consumed by the UI (to re-render observed state) and by tests. Stale
/// results never produce an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SessionEvent {
    // =========================================================================
    // Chat identity and history
    // =========================================================================
    /// A chat became current. `epoch` is the value stamped on work issued for it.
    ChatSwitched { chat_id: ChatId, epoch: Epoch },

    /// No chat is current anymore.
    ChatCleared,

    /// The displayed chat's history finished loading.
    HistoryLoaded {
        chat_id: ChatId,
        message_count: usize,
    },

    // =========================================================================
    // Streaming
    // =========================================================================
    /// A user/assistant pair was appended to a chat's history.
    ExchangeCommitted {
        chat_id: ChatId,
        assistant_chars: usize,
    },

    /// A generation stream failed; committed history is untouched.
    StreamFailed { chat_id: ChatId, reason: String },

    /// The service named a chat after its first exchange.
    ChatNamed { chat_id: ChatId, name: String },

    /// A chat list was refreshed (global when `project_id` is `None`).
    ChatListUpdated {
        project_id: Option<ProjectId>,
        count: usize,
    },

    // =========================================================================
    // Documents and embedding jobs
    // =========================================================================
    DocumentsUpdated {
        project_id: ProjectId,
        count: usize,
        has_failed: bool,
    },

    PollingStarted { project_id: ProjectId },

    PollingStopped {
        project_id: ProjectId,
        attempts: u32,
        all_succeeded: bool,
    },

    // =========================================================================
    // Search
    // =========================================================================
    SearchApplied {
        generation: Generation,
        result_count: usize,
    },

    // =========================================================================
    // Notifications
    // =========================================================================
    /// Message meant for a transient user-visible notification.
    Notification {
        level: NotificationLevel,
        message: String,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn notify(level: NotificationLevel, message: impl Into<String>) -> Self {
        SessionEvent::Notification {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}
