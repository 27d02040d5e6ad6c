//! Streaming aggregator: one in-flight generation per chat.
//!
//! `send` stamps a buffer with the current (chat, epoch), opens the stream
//! and hands chunk consumption to a background task. Chunks always extend the
//! buffer, but they reach the live view only while the buffer's stamp is
//! still current. On completion the user/assistant pair is committed to that
//! chat's history exactly once, whether or not the chat is still displayed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sortedchat_core::events::SessionEvent;
use sortedchat_core::types::{ChatId, Epoch, ProjectId};
use sortedchat_transport::{ChatTransport, ChunkStream, StreamRequest};

use crate::catalog::ChatCatalog;
use crate::error::SessionError;
use crate::history::{Exchange, HistoryStore};
use crate::identity::ChatIdentityRegister;
use crate::view::ViewState;

/// Transient accumulation of one generation. Dropped on completion or error.
#[derive(Debug, Clone)]
struct StreamingBuffer {
    request_id: Uuid,
    epoch: Epoch,
    accumulated_text: String,
}

#[derive(Debug, Default)]
struct AggregatorState {
    buffers: HashMap<ChatId, StreamingBuffer>,
    errors: HashMap<ChatId, String>,
    /// Chats whose naming request was already fired.
    named: HashSet<ChatId>,
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Committed {
        chat_id: ChatId,
        assistant_text: String,
        /// Name assigned by the service if this was the chat's first exchange.
        chat_name: Option<String>,
    },
    Failed {
        chat_id: ChatId,
        reason: String,
    },
}

/// Handle on a generation whose chunks are consumed in the background.
#[derive(Debug)]
pub struct StreamHandle {
    pub chat_id: ChatId,
    pub epoch: Epoch,
    join: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    /// Wait until the stream completed or failed.
    pub async fn outcome(self) -> Result<StreamOutcome, SessionError> {
        Ok(self.join.await?)
    }
}

pub struct StreamingAggregator {
    transport: Arc<dyn ChatTransport>,
    register: Arc<ChatIdentityRegister>,
    history: Arc<HistoryStore>,
    catalog: Arc<ChatCatalog>,
    view: Arc<ViewState>,
    max_message_chars: usize,
    state: Mutex<AggregatorState>,
}

impl StreamingAggregator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        register: Arc<ChatIdentityRegister>,
        history: Arc<HistoryStore>,
        catalog: Arc<ChatCatalog>,
        view: Arc<ViewState>,
        max_message_chars: usize,
    ) -> Self {
        Self {
            transport,
            register,
            history,
            catalog,
            view,
            max_message_chars,
            state: Mutex::new(AggregatorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `text` to the current chat and start consuming the reply.
    ///
    /// Returns once the stream is open. A second send on a chat whose reply
    /// is still streaming is rejected with `StreamInFlight`.
    pub async fn send(
        self: &Arc<Self>,
        text: &str,
        project_id: Option<ProjectId>,
    ) -> Result<StreamHandle, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if text.chars().count() > self.max_message_chars {
            return Err(SessionError::MessageTooLong(self.max_message_chars));
        }

        let (chat_id, epoch) = self
            .register
            .current_stamp()
            .ok_or(SessionError::NoActiveSession)?;
        let request_id = Uuid::new_v4();
        // Naming eligibility is decided now, not when the reply completes.
        let first_exchange_candidate = {
            let mut state = self.state();
            if state.buffers.contains_key(&chat_id) {
                return Err(SessionError::StreamInFlight(chat_id));
            }
            let first = self.history.is_empty(&chat_id);
            state.buffers.insert(
                chat_id.clone(),
                StreamingBuffer {
                    request_id,
                    epoch,
                    accumulated_text: String::new(),
                },
            );
            state.errors.remove(&chat_id);
            self.register.with_current(&chat_id, epoch, || {
                self.view.composing_text.set(text.to_string());
                self.view.streaming_text.set(String::new());
            });
            first
        };

        let request = StreamRequest {
            text: text.to_string(),
            chat_id: chat_id.clone(),
            model: self.view.selected_model.get(),
            project_id,
        };
        info!(%request_id, chat_id = %chat_id, %epoch, model = %request.model, "Opening generation stream");

        let stream = match self.transport.stream_chat(request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(&chat_id, epoch, &e.to_string());
                return Err(e.into());
            }
        };

        let this = Arc::clone(self);
        let task_chat = chat_id.clone();
        let text = text.to_string();
        let join = tokio::spawn(async move {
            this.drive(task_chat, epoch, text, first_exchange_candidate, stream)
                .await
        });

        Ok(StreamHandle {
            chat_id,
            epoch,
            join,
        })
    }

    async fn drive(
        &self,
        chat_id: ChatId,
        epoch: Epoch,
        text: String,
        first_exchange_candidate: bool,
        mut stream: ChunkStream,
    ) -> StreamOutcome {
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => self.apply_chunk(&chat_id, epoch, &chunk.text),
                Err(e) => {
                    let reason = e.to_string();
                    self.fail(&chat_id, epoch, &reason);
                    return StreamOutcome::Failed { chat_id, reason };
                }
            }
        }
        self.complete(chat_id, epoch, text, first_exchange_candidate)
            .await
    }

    fn apply_chunk(&self, chat_id: &ChatId, epoch: Epoch, text: &str) {
        let mut state = self.state();
        let Some(buffer) = state.buffers.get_mut(chat_id) else {
            return;
        };
        buffer.accumulated_text.push_str(text);
        let published = self.register.with_current(chat_id, epoch, || {
            self.view.streaming_text.set(buffer.accumulated_text.clone());
        });
        if published.is_none() {
            debug!(chat_id = %chat_id, %epoch, "Chunk for non-current chat kept out of the live view");
        }
    }

    async fn complete(
        &self,
        chat_id: ChatId,
        epoch: Epoch,
        text: String,
        first_exchange_candidate: bool,
    ) -> StreamOutcome {
        let assistant_text = {
            let mut state = self.state();
            let buffer = state.buffers.remove(&chat_id);
            let assistant_text = buffer.map(|b| b.accumulated_text).unwrap_or_default();
            self.history
                .commit_exchange(&chat_id, Exchange::new(text.as_str(), assistant_text.as_str()));
            self.register.with_current(&chat_id, epoch, || {
                self.view.streaming_text.set(String::new());
                self.view.composing_text.set(String::new());
            });
            self.register.with_current_chat(&chat_id, || {
                self.view.history.update(|view| {
                    if view.shows(&chat_id) && !view.loading {
                        view.messages = self.history.messages(&chat_id);
                    }
                });
            });
            assistant_text
        };

        info!(chat_id = %chat_id, chars = assistant_text.len(), "Exchange committed");
        self.view.emit(SessionEvent::ExchangeCommitted {
            chat_id: chat_id.clone(),
            assistant_chars: assistant_text.len(),
        });

        let should_name = first_exchange_candidate && self.state().named.insert(chat_id.clone());
        let chat_name = if should_name {
            self.name_chat(&chat_id, &text).await
        } else {
            None
        };

        StreamOutcome::Committed {
            chat_id,
            assistant_text,
            chat_name,
        }
    }

    fn fail(&self, chat_id: &ChatId, epoch: Epoch, reason: &str) {
        {
            let mut state = self.state();
            state.buffers.remove(chat_id);
            state.errors.insert(chat_id.clone(), reason.to_string());
            self.register.with_current(chat_id, epoch, || {
                self.view.streaming_text.set(String::new());
                self.view.composing_text.set(String::new());
            });
        }
        warn!(chat_id = %chat_id, %epoch, reason, "Generation stream failed");
        self.view.emit(SessionEvent::StreamFailed {
            chat_id: chat_id.clone(),
            reason: reason.to_string(),
        });
    }

    async fn name_chat(&self, chat_id: &ChatId, first_message: &str) -> Option<String> {
        match self.transport.generate_chat_name(chat_id, first_message).await {
            Ok(name) => {
                self.register.rename(chat_id, &name);
                info!(chat_id = %chat_id, name = %name, "Chat named");
                self.view.emit(SessionEvent::ChatNamed {
                    chat_id: chat_id.clone(),
                    name: name.clone(),
                });
                if let Err(e) = self.catalog.refresh_chat_list(None).await {
                    warn!(error = %e, "Chat list refresh after naming failed");
                }
                Some(name)
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Chat naming failed");
                None
            }
        }
    }

    /// Run a chat switch and, if it happened, clear the live stream and
    /// composing text. Both happen under the aggregator lock so no chunk or
    /// send can interleave. Buffers keep accumulating so their exchanges can
    /// still be committed.
    pub fn detach_view<R>(&self, switch: impl FnOnce() -> Option<R>) -> Option<R> {
        let _state = self.state();
        let switched = switch()?;
        self.view.streaming_text.set(String::new());
        self.view.composing_text.set(String::new());
        Some(switched)
    }

    pub fn is_streaming(&self, chat_id: &ChatId) -> bool {
        self.state().buffers.contains_key(chat_id)
    }

    /// Text accumulated so far for the chat's in-flight reply.
    pub fn buffered_text(&self, chat_id: &ChatId) -> Option<String> {
        self.state()
            .buffers
            .get(chat_id)
            .map(|b| b.accumulated_text.clone())
    }

    /// Recoverable error left by the chat's last failed stream.
    pub fn stream_error(&self, chat_id: &ChatId) -> Option<String> {
        self.state().errors.get(chat_id).cloned()
    }

    pub fn clear_error(&self, chat_id: &ChatId) {
        self.state().errors.remove(chat_id);
    }

    /// Request id of the chat's in-flight generation, for log correlation.
    pub fn request_id(&self, chat_id: &ChatId) -> Option<Uuid> {
        self.state().buffers.get(chat_id).map(|b| b.request_id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sortedchat_core::types::Role;
    use sortedchat_transport::{Endpoint, MemoryTransport, StreamMode, TransportError};

    struct Fixture {
        transport: Arc<MemoryTransport>,
        register: Arc<ChatIdentityRegister>,
        history: Arc<HistoryStore>,
        view: Arc<ViewState>,
        aggregator: Arc<StreamingAggregator>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MemoryTransport::new());
        let register = Arc::new(ChatIdentityRegister::new());
        let history = Arc::new(HistoryStore::new());
        let view = Arc::new(ViewState::new("gpt-4.1"));
        let catalog = Arc::new(ChatCatalog::new(
            transport.clone(),
            Arc::clone(&register),
            Arc::clone(&view),
        ));
        let aggregator = Arc::new(StreamingAggregator::new(
            transport.clone(),
            Arc::clone(&register),
            Arc::clone(&history),
            catalog,
            Arc::clone(&view),
            100,
        ));
        Fixture {
            transport,
            register,
            history,
            view,
            aggregator,
        }
    }

    fn select(f: &Fixture, chat: &str) -> ChatId {
        let id = f.transport.add_chat(chat, "", None);
        f.register.set_current(&id);
        id
    }

    #[tokio::test]
    async fn test_send_without_current_chat_fails() {
        let f = fixture();
        let err = f.aggregator.send("Hello", None).await.unwrap_err();
        assert!(matches!(err, SessionError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_send_validates_message() {
        let f = fixture();
        select(&f, "a");
        assert!(matches!(
            f.aggregator.send("   ", None).await.unwrap_err(),
            SessionError::EmptyMessage
        ));
        let long = "x".repeat(101);
        assert!(matches!(
            f.aggregator.send(&long, None).await.unwrap_err(),
            SessionError::MessageTooLong(100)
        ));
        assert_eq!(f.transport.call_count(Endpoint::StreamChat), 0);
    }

    #[tokio::test]
    async fn test_echo_send_commits_pair() {
        let f = fixture();
        let chat = select(&f, "a");

        let handle = f.aggregator.send("Hello", None).await.unwrap();
        let outcome = handle.outcome().await.unwrap();

        match outcome {
            StreamOutcome::Committed { assistant_text, .. } => {
                assert_eq!(assistant_text, "You said: Hello");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let messages = f.history.messages(&chat);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "You said: Hello");
        assert!(f.view.streaming_text.get().is_empty());
        assert!(f.view.composing_text.get().is_empty());
        assert!(!f.aggregator.is_streaming(&chat));
    }

    #[tokio::test]
    async fn test_optimistic_echo_and_live_chunks() {
        let f = fixture();
        f.transport.set_stream_mode(StreamMode::Manual);
        let chat = select(&f, "a");

        let handle = f.aggregator.send("Hello", None).await.unwrap();
        assert_eq!(f.view.composing_text.get(), "Hello");
        assert!(f.aggregator.is_streaming(&chat));
        assert!(f.aggregator.request_id(&chat).is_some());

        let mut feed = f.transport.take_stream().unwrap();
        assert_eq!(feed.request().model, "gpt-4.1");
        let mut live = f.view.streaming_text.subscribe();
        feed.chunk("Hi ");
        live.changed().await.unwrap();
        assert_eq!(*live.borrow_and_update(), "Hi ");
        feed.chunk("there");
        live.changed().await.unwrap();
        assert_eq!(*live.borrow_and_update(), "Hi there");
        feed.finish();

        handle.outcome().await.unwrap();
        assert_eq!(f.history.messages(&chat)[1].content, "Hi there");
    }

    #[tokio::test]
    async fn test_second_send_while_streaming_is_rejected() {
        let f = fixture();
        f.transport.set_stream_mode(StreamMode::Manual);
        let chat = select(&f, "a");

        let handle = f.aggregator.send("one", None).await.unwrap();
        let err = f.aggregator.send("two", None).await.unwrap_err();
        assert!(matches!(err, SessionError::StreamInFlight(ref id) if *id == chat));
        assert_eq!(f.transport.call_count(Endpoint::StreamChat), 1);
        assert_eq!(f.view.composing_text.get(), "one");

        f.transport.take_stream().unwrap().finish();
        handle.outcome().await.unwrap();
        assert_eq!(f.history.messages(&chat).len(), 2);
    }

    #[tokio::test]
    async fn test_stream_error_leaves_history_and_sets_flag() {
        let f = fixture();
        f.transport.set_stream_mode(StreamMode::Manual);
        let chat = select(&f, "a");
        f.history.commit_exchange(&chat, Exchange::new("earlier", "reply"));

        let handle = f.aggregator.send("Hello", None).await.unwrap();
        let mut feed = f.transport.take_stream().unwrap();
        feed.chunk("partial");
        feed.fail("connection reset");

        let outcome = handle.outcome().await.unwrap();
        assert!(matches!(outcome, StreamOutcome::Failed { .. }));
        assert_eq!(f.history.messages(&chat).len(), 2);
        assert!(f.aggregator.stream_error(&chat).unwrap().contains("connection reset"));
        assert!(f.view.streaming_text.get().is_empty());
        assert!(f.view.composing_text.get().is_empty());
        assert!(!f.aggregator.is_streaming(&chat));
    }

    #[tokio::test]
    async fn test_open_failure_clears_buffer() {
        let f = fixture();
        let chat = select(&f, "a");
        f.transport
            .fail_next(Endpoint::StreamChat, TransportError::Network("offline".to_string()));

        let err = f.aggregator.send("Hello", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!f.aggregator.is_streaming(&chat));
        assert!(f.aggregator.stream_error(&chat).is_some());
        assert!(f.view.composing_text.get().is_empty());

        // A later send clears the error flag and goes through.
        f.aggregator.send("Hello", None).await.unwrap().outcome().await.unwrap();
        assert!(f.aggregator.stream_error(&chat).is_none());
    }

    #[tokio::test]
    async fn test_first_exchange_names_chat_once() {
        let f = fixture();
        let chat = select(&f, "a");

        let first = f.aggregator.send("rockets and orbits", None).await.unwrap();
        match first.outcome().await.unwrap() {
            StreamOutcome::Committed { chat_name, .. } => {
                assert_eq!(chat_name.as_deref(), Some("rockets and orbits"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let second = f.aggregator.send("more please", None).await.unwrap();
        second.outcome().await.unwrap();

        assert_eq!(f.transport.call_count(Endpoint::GenerateChatName), 1);
        assert_eq!(f.register.session(&chat).unwrap().name, "rockets and orbits");
        assert_eq!(f.view.chat_list.get()[0].name, "rockets and orbits");
    }

    #[tokio::test]
    async fn test_no_naming_when_history_not_empty_at_send() {
        let f = fixture();
        let chat = select(&f, "a");
        f.history.commit_exchange(&chat, Exchange::new("old", "reply"));

        f.aggregator.send("Hello", None).await.unwrap().outcome().await.unwrap();
        assert_eq!(f.transport.call_count(Endpoint::GenerateChatName), 0);
    }

    #[tokio::test]
    async fn test_naming_failure_is_not_retried() {
        let f = fixture();
        select(&f, "a");
        f.transport.fail_next(
            Endpoint::GenerateChatName,
            TransportError::Network("down".to_string()),
        );

        let outcome = f.aggregator.send("Hello", None).await.unwrap().outcome().await.unwrap();
        assert!(matches!(outcome, StreamOutcome::Committed { chat_name: None, .. }));
        f.aggregator.send("again", None).await.unwrap().outcome().await.unwrap();
        assert_eq!(f.transport.call_count(Endpoint::GenerateChatName), 1);
    }

    #[tokio::test]
    async fn test_failed_first_send_keeps_naming_candidate() {
        let f = fixture();
        f.transport.set_stream_mode(StreamMode::Manual);
        select(&f, "a");

        let handle = f.aggregator.send("Hello", None).await.unwrap();
        f.transport.take_stream().unwrap().fail("boom");
        handle.outcome().await.unwrap();

        f.transport.set_stream_mode(StreamMode::Echo);
        f.aggregator.send("Hello again", None).await.unwrap().outcome().await.unwrap();
        assert_eq!(f.transport.call_count(Endpoint::GenerateChatName), 1);
    }

    #[tokio::test]
    async fn test_chunks_after_switch_stay_out_of_view_but_commit() {
        let f = fixture();
        f.transport.set_stream_mode(StreamMode::Manual);
        let a = select(&f, "a");

        let handle = f.aggregator.send("Hello", None).await.unwrap();
        let mut feed = f.transport.take_stream().unwrap();

        let b = f.transport.add_chat("b", "", None);
        assert!(f.aggregator.detach_view(|| f.register.set_current(&b)).is_some());

        feed.chunk("secret");
        feed.finish();
        handle.outcome().await.unwrap();

        assert!(f.view.streaming_text.get().is_empty());
        assert!(f.view.composing_text.get().is_empty());
        assert_eq!(f.history.messages(&a)[1].content, "secret");
        assert!(f.history.messages(&b).is_empty());
    }

    #[tokio::test]
    async fn test_project_and_model_forwarded() {
        let f = fixture();
        f.transport.set_stream_mode(StreamMode::Manual);
        select(&f, "a");
        f.view.selected_model.set("claude-sonnet".to_string());

        let handle = f
            .aggregator
            .send("Hello", Some(ProjectId::new("p")))
            .await
            .unwrap();
        let feed = f.transport.take_stream().unwrap();
        assert_eq!(feed.request().model, "claude-sonnet");
        assert_eq!(feed.request().project_id, Some(ProjectId::new("p")));
        feed.finish();
        handle.outcome().await.unwrap();
    }
}
