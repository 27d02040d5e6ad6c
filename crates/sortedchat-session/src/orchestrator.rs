//! Session orchestrator.
//!
//! The single entry point for UI actions. Each action sequences the
//! components explicitly (register, store, aggregator, scheduler, debouncer)
//! instead of relying on chained change listeners.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use sortedchat_core::config::SortedChatConfig;
use sortedchat_core::events::SessionEvent;
use sortedchat_core::types::{ChatId, ChatInfo, DocumentRecord, Epoch, Message, ModelInfo, Project, ProjectId};
use sortedchat_transport::ChatTransport;

use crate::catalog::ChatCatalog;
use crate::embedding::{EmbeddingPollScheduler, PollState, SubmitReceipt};
use crate::error::SessionError;
use crate::history::{FetchTicket, HistoryStore};
use crate::identity::ChatIdentityRegister;
use crate::search::SearchDebouncer;
use crate::streaming::{StreamHandle, StreamingAggregator};
use crate::view::{HistoryView, ViewState};

struct Inner {
    transport: Arc<dyn ChatTransport>,
    register: Arc<ChatIdentityRegister>,
    history: Arc<HistoryStore>,
    view: Arc<ViewState>,
    catalog: Arc<ChatCatalog>,
    aggregator: Arc<StreamingAggregator>,
    embedding: Arc<EmbeddingPollScheduler>,
    search: Arc<SearchDebouncer>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Wire every component around an injected transport.
    pub fn new(config: &SortedChatConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let register = Arc::new(ChatIdentityRegister::new());
        let history = Arc::new(HistoryStore::new());
        let view = Arc::new(ViewState::new(&config.chat.default_model));
        let catalog = Arc::new(ChatCatalog::new(
            Arc::clone(&transport),
            Arc::clone(&register),
            Arc::clone(&view),
        ));
        let aggregator = Arc::new(StreamingAggregator::new(
            Arc::clone(&transport),
            Arc::clone(&register),
            Arc::clone(&history),
            Arc::clone(&catalog),
            Arc::clone(&view),
            config.chat.max_message_chars,
        ));
        let embedding = Arc::new(EmbeddingPollScheduler::new(
            Arc::clone(&transport),
            Arc::clone(&view),
            config.embedding.poll_attempts,
            config.embedding.poll_interval(),
        ));
        let search = Arc::new(SearchDebouncer::new(
            Arc::clone(&transport),
            Arc::clone(&view),
            config.search.debounce(),
        ));

        Self {
            inner: Arc::new(Inner {
                transport,
                register,
                history,
                view,
                catalog,
                aggregator,
                embedding,
                search,
            }),
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.inner.view
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.view.subscribe_events()
    }

    pub fn register(&self) -> &ChatIdentityRegister {
        &self.inner.register
    }

    pub fn current_chat(&self) -> Option<ChatId> {
        self.inner.register.current()
    }

    /// Committed messages of any chat, displayed or not.
    pub fn chat_history(&self, chat_id: &ChatId) -> Vec<Message> {
        self.inner.history.messages(chat_id)
    }

    // =========================================================================
    // Chats
    // =========================================================================

    /// Make `chat_id` current and load its history.
    ///
    /// A no-op when the chat is already current. The previous chat's live
    /// stream and composing text leave the view immediately; its stream keeps
    /// running and commits into its own history when done. If the user
    /// switches again before the fetch returns, the result is dropped.
    pub async fn switch_chat(&self, chat_id: &ChatId) -> Result<(), SessionError> {
        let inner = &self.inner;
        let Some(epoch) = inner
            .aggregator
            .detach_view(|| inner.register.set_current(chat_id))
        else {
            return Ok(());
        };

        inner.register.with_current(chat_id, epoch, || {
            inner.view.history.set(HistoryView::loading(chat_id.clone()));
        });
        info!(chat_id = %chat_id, %epoch, "Chat switched");
        inner.view.emit(SessionEvent::ChatSwitched {
            chat_id: chat_id.clone(),
            epoch,
        });

        let ticket = inner.history.begin_fetch(chat_id);
        match inner.transport.get_history(chat_id).await {
            Ok(messages) => {
                self.finish_fetch(ticket, epoch, messages);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(chat_id = %chat_id, "No history on the service, showing an empty chat");
                self.finish_fetch(ticket, epoch, Vec::new());
                Ok(())
            }
            Err(e) => {
                let applied = inner.register.with_current(chat_id, epoch, || {
                    inner
                        .view
                        .history
                        .set(HistoryView::failed(chat_id.clone(), e.to_string()));
                });
                if applied.is_none() {
                    debug!(chat_id = %chat_id, %epoch, "Stale history fetch failure dropped");
                    return Ok(());
                }
                warn!(chat_id = %chat_id, error = %e, "History fetch failed");
                Err(e.into())
            }
        }
    }

    fn finish_fetch(&self, ticket: FetchTicket, epoch: Epoch, fetched: Vec<Message>) {
        let inner = &self.inner;
        let chat_id = ticket.chat_id().clone();
        let applied = inner.register.with_current(&chat_id, epoch, || {
            let messages = inner.history.apply_fetch(ticket, fetched);
            let count = messages.len();
            inner
                .view
                .history
                .set(HistoryView::loaded(chat_id.clone(), messages));
            count
        });
        match applied {
            Some(message_count) => {
                debug!(chat_id = %chat_id, message_count, "History loaded");
                inner.view.emit(SessionEvent::HistoryLoaded {
                    chat_id,
                    message_count,
                });
            }
            None => debug!(chat_id = %chat_id, %epoch, "Stale history fetch dropped"),
        }
    }

    /// Make no chat current and blank the history view.
    pub fn clear_chat(&self) {
        let inner = &self.inner;
        let previous = inner
            .aggregator
            .detach_view(|| inner.register.clear_current());
        inner.view.history.set(HistoryView::default());
        if let Some(chat_id) = previous {
            info!(chat_id = %chat_id, "Chat cleared");
            inner.view.emit(SessionEvent::ChatCleared);
        }
    }

    /// Create a chat on the service, list it, and make it current.
    pub async fn create_chat(&self, project_id: Option<&ProjectId>) -> Result<ChatId, SessionError> {
        let inner = &self.inner;
        let chat_id = inner.transport.create_chat(project_id).await?;
        inner.register.register(&chat_id, project_id, "");
        info!(chat_id = %chat_id, project_id = ?project_id.map(ProjectId::as_str), "Chat created");

        if let Err(e) = inner.catalog.refresh_chat_list(project_id).await {
            warn!(error = %e, "Chat list refresh after create failed");
        }
        self.switch_chat(&chat_id).await?;
        Ok(chat_id)
    }

    /// Send a message on the current chat.
    ///
    /// Returns once the stream is open; the reply is consumed in the
    /// background and committed to the chat's history when it ends.
    pub async fn send_message(&self, text: &str) -> Result<StreamHandle, SessionError> {
        let inner = &self.inner;
        let project_id = inner
            .register
            .current()
            .and_then(|id| inner.register.session(&id))
            .and_then(|session| session.project_id);
        inner.aggregator.send(text, project_id).await
    }

    /// Recoverable error left by the chat's last failed stream, if any.
    pub fn stream_error(&self, chat_id: &ChatId) -> Option<String> {
        self.inner.aggregator.stream_error(chat_id)
    }

    pub fn is_streaming(&self, chat_id: &ChatId) -> bool {
        self.inner.aggregator.is_streaming(chat_id)
    }

    /// Reply text received so far for the chat's in-flight stream, whether
    /// or not the chat is displayed.
    pub fn pending_reply(&self, chat_id: &ChatId) -> Option<String> {
        self.inner.aggregator.buffered_text(chat_id)
    }

    pub async fn refresh_chat_list(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<ChatInfo>, SessionError> {
        self.inner.catalog.refresh_chat_list(project_id).await
    }

    // =========================================================================
    // Models
    // =========================================================================

    pub async fn refresh_models(&self) -> Result<Vec<ModelInfo>, SessionError> {
        self.inner.catalog.refresh_models().await
    }

    pub fn select_model(&self, model_id: &str) {
        self.inner.catalog.select_model(model_id);
    }

    // =========================================================================
    // Projects and documents
    // =========================================================================

    /// Create a project and make it the current one.
    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
    ) -> Result<ProjectId, SessionError> {
        let inner = &self.inner;
        let project_id = inner.transport.create_project(name, description).await?;
        info!(project_id = %project_id, name, "Project created");
        if let Err(e) = inner.catalog.refresh_projects().await {
            warn!(error = %e, "Project list refresh after create failed");
        }
        self.select_project(&project_id).await?;
        Ok(project_id)
    }

    /// Make `project_id` current, then load its documents and chat list.
    pub async fn select_project(&self, project_id: &ProjectId) -> Result<(), SessionError> {
        let inner = &self.inner;
        inner.view.current_project.set(Some(project_id.clone()));
        inner.embedding.publish(Some(project_id));
        debug!(project_id = %project_id, "Project selected");

        inner.embedding.refresh_documents(project_id).await?;
        inner.catalog.refresh_chat_list(Some(project_id)).await?;
        Ok(())
    }

    pub fn clear_project(&self) {
        let inner = &self.inner;
        inner.view.current_project.set(None);
        inner.catalog.clear_project_chat_list();
        inner.embedding.publish(None);
    }

    pub async fn refresh_projects(&self) -> Result<Vec<Project>, SessionError> {
        self.inner.catalog.refresh_projects().await
    }

    /// Re-fetch the current project's documents.
    pub async fn refresh_documents(&self) -> Result<Vec<DocumentRecord>, SessionError> {
        let project_id = self
            .inner
            .view
            .current_project
            .get()
            .ok_or(SessionError::NoActiveProject)?;
        self.inner.embedding.refresh_documents(&project_id).await
    }

    pub async fn submit_embedding_job(
        &self,
        project_id: &ProjectId,
    ) -> Result<SubmitReceipt, SessionError> {
        self.inner.embedding.submit(project_id).await
    }

    pub async fn retry_embedding(
        &self,
        project_id: &ProjectId,
    ) -> Result<SubmitReceipt, SessionError> {
        self.inner.embedding.retry(project_id).await
    }

    pub fn embedding_state(&self, project_id: &ProjectId) -> PollState {
        self.inner.embedding.state(project_id)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Feed raw search input; the query goes out once typing settles.
    pub fn search(&self, text: &str) {
        self.inner.search.set_query_text(text);
    }

    pub fn open_search(&self) {
        self.inner.search.reset();
    }

    pub fn close_search(&self) {
        self.inner.search.reset();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop poll loops and pending search timers. Streams in flight finish
    /// on their own.
    pub fn shutdown(&self) {
        info!("Shutting down session orchestrator");
        self.inner.embedding.shutdown();
        self.inner.search.shutdown();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sortedchat_transport::{Endpoint, MemoryTransport, StreamMode, TransportError};
    use std::time::Duration;

    fn orchestrator() -> (SessionOrchestrator, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let orchestrator = SessionOrchestrator::new(&SortedChatConfig::default(), transport.clone());
        (orchestrator, transport)
    }

    #[tokio::test]
    async fn test_switch_chat_loads_history() {
        let (orch, transport) = orchestrator();
        let chat = transport.add_chat("a", "Rockets", None);
        transport.set_history(&chat, vec![Message::user("Hi"), Message::assistant("Hello")]);
        let mut events = orch.subscribe();

        orch.switch_chat(&chat).await.unwrap();

        let view = orch.view().history.get();
        assert!(view.shows(&chat));
        assert!(!view.loading);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ChatSwitched { chat_id: chat.clone(), epoch: Epoch(1) }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::HistoryLoaded { chat_id: chat, message_count: 2 }
        );
    }

    #[tokio::test]
    async fn test_switch_to_current_chat_is_noop() {
        let (orch, transport) = orchestrator();
        let chat = transport.add_chat("a", "", None);
        orch.switch_chat(&chat).await.unwrap();
        orch.switch_chat(&chat).await.unwrap();
        assert_eq!(transport.call_count(Endpoint::GetHistory), 1);
    }

    #[tokio::test]
    async fn test_missing_history_is_empty_view() {
        let (orch, _) = orchestrator();
        let chat = ChatId::new("ghost");
        orch.switch_chat(&chat).await.unwrap();

        let view = orch.view().history.get();
        assert!(view.shows(&chat));
        assert!(view.messages.is_empty());
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_history_failure_sets_view_error() {
        let (orch, transport) = orchestrator();
        let chat = transport.add_chat("a", "", None);
        transport.fail_next(Endpoint::GetHistory, TransportError::Network("offline".to_string()));

        let err = orch.switch_chat(&chat).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        let view = orch.view().history.get();
        assert!(view.error.unwrap().contains("offline"));
        assert!(!view.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fetch_is_dropped() {
        let (orch, transport) = orchestrator();
        let a = transport.add_chat("a", "", None);
        let b = transport.add_chat("b", "", None);
        transport.set_history(&a, vec![Message::user("from a"), Message::assistant("ok")]);
        transport.set_delay(Endpoint::GetHistory, Duration::from_millis(100));

        let slow = {
            let orch = orch.clone();
            let a = a.clone();
            tokio::spawn(async move { orch.switch_chat(&a).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        orch.switch_chat(&b).await.unwrap();
        slow.await.unwrap().unwrap();

        let view = orch.view().history.get();
        assert!(view.shows(&b));
        assert!(view.messages.is_empty());
    }

    #[tokio::test]
    async fn test_clear_chat_resets_view() {
        let (orch, transport) = orchestrator();
        let chat = transport.add_chat("a", "", None);
        orch.switch_chat(&chat).await.unwrap();

        orch.clear_chat();
        assert!(orch.current_chat().is_none());
        assert_eq!(orch.view().history.get(), HistoryView::default());
        assert!(matches!(
            orch.send_message("Hello").await.unwrap_err(),
            SessionError::NoActiveSession
        ));
    }

    #[tokio::test]
    async fn test_create_chat_lists_and_selects_it() {
        let (orch, _) = orchestrator();
        let chat = orch.create_chat(None).await.unwrap();

        assert_eq!(orch.current_chat(), Some(chat.clone()));
        assert_eq!(orch.view().chat_list.get()[0].chat_id, chat);
        assert!(orch.view().history.get().shows(&chat));
    }

    #[tokio::test]
    async fn test_send_forwards_chat_project() {
        let (orch, transport) = orchestrator();
        transport.set_stream_mode(StreamMode::Manual);
        let project = transport.add_project("p", "Research");
        orch.select_project(&project).await.unwrap();
        orch.create_chat(Some(&project)).await.unwrap();

        let handle = orch.send_message("Hello").await.unwrap();
        let feed = transport.take_stream().unwrap();
        assert_eq!(feed.request().project_id, Some(project.clone()));
        feed.finish();
        handle.outcome().await.unwrap();
        assert_eq!(orch.view().project_chat_list.get().len(), 1);
    }

    #[tokio::test]
    async fn test_committed_exchange_reaches_displayed_history() {
        let (orch, transport) = orchestrator();
        let chat = transport.add_chat("a", "", None);
        orch.switch_chat(&chat).await.unwrap();

        orch.send_message("Hello").await.unwrap().outcome().await.unwrap();
        let view = orch.view().history.get();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].content, "You said: Hello");
        assert_eq!(orch.chat_history(&chat).len(), 2);
    }

    #[tokio::test]
    async fn test_create_project_selects_it() {
        let (orch, transport) = orchestrator();
        let project = orch.create_project("Research", "papers").await.unwrap();

        assert_eq!(orch.view().current_project.get(), Some(project.clone()));
        assert_eq!(orch.view().projects.get()[0].id, project);
        assert_eq!(transport.call_count(Endpoint::ListDocuments), 1);
        assert_eq!(transport.call_count(Endpoint::ListChats), 1);
    }

    #[tokio::test]
    async fn test_clear_project_blanks_project_state() {
        let (orch, transport) = orchestrator();
        let project = transport.add_project("p", "Research");
        transport.add_chat("a", "", Some(&project));
        orch.select_project(&project).await.unwrap();
        assert_eq!(orch.view().project_chat_list.get().len(), 1);

        orch.clear_project();
        assert!(orch.view().current_project.get().is_none());
        assert!(orch.view().project_chat_list.get().is_empty());
        assert!(matches!(
            orch.refresh_documents().await.unwrap_err(),
            SessionError::NoActiveProject
        ));
    }

    #[tokio::test]
    async fn test_models_flow_into_stream_requests() {
        let (orch, transport) = orchestrator();
        transport.set_stream_mode(StreamMode::Manual);
        let chat = transport.add_chat("a", "", None);
        orch.switch_chat(&chat).await.unwrap();
        assert_eq!(orch.refresh_models().await.unwrap().len(), 1);
        orch.select_model("o3");

        let handle = orch.send_message("Hello").await.unwrap();
        let feed = transport.take_stream().unwrap();
        assert_eq!(feed.request().model, "o3");
        feed.finish();
        handle.outcome().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_and_close_search_reset_state() {
        let (orch, transport) = orchestrator();
        let chat = transport.add_chat("a", "", None);
        transport.set_history(&chat, vec![Message::user("elon"), Message::assistant("x")]);

        orch.open_search();
        orch.search("elon");
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(orch.view().search_results.get().len(), 1);

        orch.close_search();
        assert!(orch.view().search_text.get().is_empty());
        assert!(orch.view().search_results.get().is_empty());
    }
}
