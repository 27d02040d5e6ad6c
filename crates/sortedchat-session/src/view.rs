//! UI-observable state.
//!
//! Each value lives in a `watch` channel: the UI reads a snapshot or
//! subscribes to changes, and only the owning component writes it.

use tokio::sync::{broadcast, watch};

use sortedchat_core::events::SessionEvent;
use sortedchat_core::types::{
    ChatId, ChatInfo, DocumentRecord, Message, ModelInfo, Project, ProjectId, SearchResult,
};

const EVENT_CAPACITY: usize = 256;

/// A value the UI can read and subscribe to but not write.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }
}

/// History of the displayed chat. Replaced wholesale on every chat switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryView {
    pub chat_id: Option<ChatId>,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub error: Option<String>,
}

impl HistoryView {
    pub fn loading(chat_id: ChatId) -> Self {
        Self {
            chat_id: Some(chat_id),
            loading: true,
            ..Self::default()
        }
    }

    pub fn loaded(chat_id: ChatId, messages: Vec<Message>) -> Self {
        Self {
            chat_id: Some(chat_id),
            messages,
            ..Self::default()
        }
    }

    pub fn failed(chat_id: ChatId, error: impl Into<String>) -> Self {
        Self {
            chat_id: Some(chat_id),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn shows(&self, chat_id: &ChatId) -> bool {
        self.chat_id.as_ref() == Some(chat_id)
    }
}

/// Everything the UI layer observes.
#[derive(Debug)]
pub struct ViewState {
    pub chat_list: Observable<Vec<ChatInfo>>,
    pub project_chat_list: Observable<Vec<ChatInfo>>,
    pub history: Observable<HistoryView>,
    /// Assistant text received so far for the current chat's in-flight reply.
    pub streaming_text: Observable<String>,
    /// Optimistic echo of the message being sent.
    pub composing_text: Observable<String>,
    pub models: Observable<Vec<ModelInfo>>,
    pub selected_model: Observable<String>,
    pub search_text: Observable<String>,
    pub search_results: Observable<Vec<SearchResult>>,
    pub projects: Observable<Vec<Project>>,
    pub current_project: Observable<Option<ProjectId>>,
    pub documents: Observable<Vec<DocumentRecord>>,
    pub is_error_docs: Observable<bool>,
    pub is_polling: Observable<bool>,
    events: broadcast::Sender<SessionEvent>,
}

impl ViewState {
    pub fn new(default_model: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chat_list: Observable::new(Vec::new()),
            project_chat_list: Observable::new(Vec::new()),
            history: Observable::new(HistoryView::default()),
            streaming_text: Observable::new(String::new()),
            composing_text: Observable::new(String::new()),
            models: Observable::new(Vec::new()),
            selected_model: Observable::new(default_model.to_string()),
            search_text: Observable::new(String::new()),
            search_results: Observable::new(Vec::new()),
            projects: Observable::new(Vec::new()),
            current_project: Observable::new(None),
            documents: Observable::new(Vec::new()),
            is_error_docs: Observable::new(false),
            is_polling: Observable::new(false),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn is_current_project(&self, project_id: &ProjectId) -> bool {
        self.current_project.tx.borrow().as_ref() == Some(project_id)
    }
}
