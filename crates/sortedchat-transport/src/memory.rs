//! In-process `ChatTransport` with scripted behavior.
//!
//! Keeps chats, histories, projects and documents in memory the way the
//! remote service would, and lets callers inject failures, latency and
//! manually driven generation streams.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use uuid::Uuid;

use sortedchat_core::types::{
    ChatId, ChatInfo, DocumentRecord, Message, ModelInfo, Project, ProjectId, Role, SearchResult,
};

use crate::client::{ChatChunk, ChatTransport, ChunkStream, StreamRequest};
use crate::error::TransportError;

/// Service call, used to count calls and to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CreateChat,
    StreamChat,
    GetHistory,
    ListChats,
    GenerateChatName,
    SubmitEmbeddingJob,
    ListDocuments,
    Search,
    ListModels,
    CreateProject,
    ListProjects,
}

/// How `stream_chat` produces chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Reply immediately with `You said: <text>`, one chunk per word.
    #[default]
    Echo,
    /// Hand the stream to the caller as a `StreamFeed` (see `take_stream`).
    Manual,
}

/// Snapshot of per-endpoint call counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts(HashMap<Endpoint, u32>);

impl CallCounts {
    pub fn get(&self, endpoint: Endpoint) -> u32 {
        self.0.get(&endpoint).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct StoredChat {
    info: ChatInfo,
    project_id: Option<ProjectId>,
}

#[derive(Default)]
struct MemoryState {
    chats: Vec<StoredChat>,
    histories: HashMap<ChatId, Vec<Message>>,
    projects: Vec<Project>,
    models: Vec<ModelInfo>,
    /// Successive `list_documents` answers; the last snapshot repeats.
    documents: HashMap<ProjectId, VecDeque<Vec<DocumentRecord>>>,
    stream_mode: StreamMode,
    feeds: VecDeque<StreamFeed>,
    failures: HashMap<Endpoint, VecDeque<TransportError>>,
    delays: HashMap<Endpoint, Duration>,
    calls: HashMap<Endpoint, u32>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn persist_exchange(state: &Mutex<MemoryState>, chat_id: &ChatId, user: &str, assistant: &str) {
    let mut state = lock(state);
    let history = state.histories.entry(chat_id.clone()).or_default();
    history.push(Message::user(user));
    history.push(Message::assistant(assistant));
}

// =============================================================================
// StreamFeed
// =============================================================================

/// Server side of a manually driven generation stream.
pub struct StreamFeed {
    request: StreamRequest,
    tx: mpsc::UnboundedSender<Result<ChatChunk, TransportError>>,
    sent: String,
    state: Arc<Mutex<MemoryState>>,
}

impl StreamFeed {
    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    /// Deliver one chunk to the client.
    pub fn chunk(&mut self, text: &str) {
        self.sent.push_str(text);
        let _ = self.tx.send(Ok(ChatChunk::new(text)));
    }

    /// Persist the exchange server-side, then end the stream.
    pub fn finish(self) {
        persist_exchange(
            &self.state,
            &self.request.chat_id,
            &self.request.text,
            &self.sent,
        );
    }

    /// Terminate the stream with an error. Nothing is persisted.
    pub fn fail(self, reason: &str) {
        let _ = self.tx.send(Err(TransportError::Stream(reason.to_string())));
    }
}

// =============================================================================
// MemoryTransport
// =============================================================================

/// Scripted in-memory chat service.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let state = MemoryState {
            models: vec![ModelInfo {
                id: "gpt-4.1".to_string(),
                label: "GPT-4.1".to_string(),
                provider: "openai".to_string(),
            }],
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    // ---- Seeding ----

    pub fn add_chat(&self, chat_id: &str, name: &str, project_id: Option<&ProjectId>) -> ChatId {
        let chat_id = ChatId::new(chat_id);
        let mut state = lock(&self.state);
        state.chats.push(StoredChat {
            info: ChatInfo {
                chat_id: chat_id.clone(),
                name: name.to_string(),
            },
            project_id: project_id.cloned(),
        });
        state.histories.entry(chat_id.clone()).or_default();
        chat_id
    }

    pub fn set_history(&self, chat_id: &ChatId, messages: Vec<Message>) {
        lock(&self.state)
            .histories
            .insert(chat_id.clone(), messages);
    }

    pub fn add_project(&self, project_id: &str, name: &str) -> ProjectId {
        let id = ProjectId::new(project_id);
        lock(&self.state).projects.push(Project {
            id: id.clone(),
            name: name.to_string(),
            description: String::new(),
        });
        id
    }

    pub fn add_model(&self, model: ModelInfo) {
        lock(&self.state).models.push(model);
    }

    /// Queue the next answer of `list_documents` for a project.
    pub fn push_documents(&self, project_id: &ProjectId, snapshot: Vec<DocumentRecord>) {
        lock(&self.state)
            .documents
            .entry(project_id.clone())
            .or_default()
            .push_back(snapshot);
    }

    // ---- Behavior ----

    pub fn set_stream_mode(&self, mode: StreamMode) {
        lock(&self.state).stream_mode = mode;
    }

    /// Oldest stream opened in `StreamMode::Manual` that was not taken yet.
    pub fn take_stream(&self) -> Option<StreamFeed> {
        lock(&self.state).feeds.pop_front()
    }

    /// Make the next call to `endpoint` fail with `err`.
    pub fn fail_next(&self, endpoint: Endpoint, err: TransportError) {
        lock(&self.state)
            .failures
            .entry(endpoint)
            .or_default()
            .push_back(err);
    }

    /// Delay every call to `endpoint` before it answers.
    pub fn set_delay(&self, endpoint: Endpoint, delay: Duration) {
        lock(&self.state).delays.insert(endpoint, delay);
    }

    // ---- Inspection ----

    pub fn calls(&self) -> CallCounts {
        CallCounts(lock(&self.state).calls.clone())
    }

    pub fn call_count(&self, endpoint: Endpoint) -> u32 {
        self.calls().get(endpoint)
    }

    /// History as persisted on the service side.
    pub fn stored_history(&self, chat_id: &ChatId) -> Vec<Message> {
        lock(&self.state)
            .histories
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn chat_name(&self, chat_id: &ChatId) -> Option<String> {
        lock(&self.state)
            .chats
            .iter()
            .find(|c| &c.info.chat_id == chat_id)
            .map(|c| c.info.name.clone())
    }

    /// Count the call, wait for the configured delay, then pop an injected failure.
    async fn enter(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        let delay = {
            let mut state = lock(&self.state);
            *state.calls.entry(endpoint).or_insert(0) += 1;
            state.delays.get(&endpoint).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = lock(&self.state)
            .failures
            .get_mut(&endpoint)
            .and_then(|queue| queue.pop_front());
        match failure {
            Some(err) => {
                debug!(?endpoint, error = %err, "Injected transport failure");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn create_chat(&self, project_id: Option<&ProjectId>) -> Result<ChatId, TransportError> {
        self.enter(Endpoint::CreateChat).await?;
        let chat_id = Uuid::new_v4().to_string();
        Ok(self.add_chat(&chat_id, "", project_id))
    }

    async fn stream_chat(&self, request: StreamRequest) -> Result<ChunkStream, TransportError> {
        self.enter(Endpoint::StreamChat).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mode = lock(&self.state).stream_mode;
        match mode {
            StreamMode::Echo => {
                let reply = format!("You said: {}", request.text);
                persist_exchange(&self.state, &request.chat_id, &request.text, &reply);
                for word in reply.split_inclusive(' ') {
                    let _ = tx.send(Ok(ChatChunk::new(word)));
                }
            }
            StreamMode::Manual => {
                let feed = StreamFeed {
                    request,
                    tx,
                    sent: String::new(),
                    state: Arc::clone(&self.state),
                };
                lock(&self.state).feeds.push_back(feed);
            }
        }
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn get_history(&self, chat_id: &ChatId) -> Result<Vec<Message>, TransportError> {
        self.enter(Endpoint::GetHistory).await?;
        lock(&self.state)
            .histories
            .get(chat_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("chat {}", chat_id)))
    }

    async fn list_chats(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<ChatInfo>, TransportError> {
        self.enter(Endpoint::ListChats).await?;
        let state = lock(&self.state);
        Ok(state
            .chats
            .iter()
            .filter(|c| project_id.is_none() || c.project_id.as_ref() == project_id)
            .map(|c| c.info.clone())
            .collect())
    }

    async fn generate_chat_name(
        &self,
        chat_id: &ChatId,
        first_message: &str,
    ) -> Result<String, TransportError> {
        self.enter(Endpoint::GenerateChatName).await?;
        let name: String = first_message
            .split_whitespace()
            .take(5)
            .collect::<Vec<_>>()
            .join(" ");
        let mut state = lock(&self.state);
        let chat = state
            .chats
            .iter_mut()
            .find(|c| &c.info.chat_id == chat_id)
            .ok_or_else(|| TransportError::NotFound(format!("chat {}", chat_id)))?;
        chat.info.name = name.clone();
        Ok(name)
    }

    async fn submit_embedding_job(&self, project_id: &ProjectId) -> Result<String, TransportError> {
        self.enter(Endpoint::SubmitEmbeddingJob).await?;
        Ok(format!("Embedding job queued for project {}", project_id))
    }

    async fn list_documents(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<DocumentRecord>, TransportError> {
        self.enter(Endpoint::ListDocuments).await?;
        let mut state = lock(&self.state);
        let Some(queue) = state.documents.get_mut(project_id) else {
            return Ok(Vec::new());
        };
        let snapshot = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(snapshot.unwrap_or_default())
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, TransportError> {
        self.enter(Endpoint::Search).await?;
        let needle = query.to_lowercase();
        let state = lock(&self.state);
        let mut results = Vec::new();
        for chat in &state.chats {
            let Some(history) = state.histories.get(&chat.info.chat_id) else {
                continue;
            };
            for message in history.iter().filter(|m| m.role == Role::User) {
                if message.content.to_lowercase().contains(&needle) {
                    results.push(SearchResult {
                        chat_id: chat.info.chat_id.clone(),
                        chat_name: chat.info.name.clone(),
                        matched_text: message.content.clone(),
                    });
                }
            }
        }
        Ok(results)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, TransportError> {
        self.enter(Endpoint::ListModels).await?;
        Ok(lock(&self.state).models.clone())
    }

    async fn create_project(
        &self,
        name: &str,
        description: &str,
    ) -> Result<ProjectId, TransportError> {
        self.enter(Endpoint::CreateProject).await?;
        let id = ProjectId::new(Uuid::new_v4().to_string());
        lock(&self.state).projects.push(Project {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(id)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TransportError> {
        self.enter(Endpoint::ListProjects).await?;
        Ok(lock(&self.state).projects.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
