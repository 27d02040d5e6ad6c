//! The abstract contract the orchestration layer requires from the chat service.

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use sortedchat_core::types::{
    ChatId, ChatInfo, DocumentRecord, Message, ModelInfo, Project, ProjectId, SearchResult,
};

use crate::error::TransportError;

/// One incremental piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub text: String,
}

impl ChatChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Parameters of a server-streaming generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub text: String,
    pub chat_id: ChatId,
    pub model: String,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

/// Chunks in delivery order. The stream ends after the last chunk or after
/// yielding a single `Err`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, TransportError>> + Send>>;

/// Thin interface over the remote chat, embedding and search service.
///
/// Implementations hold no orchestration state. They are injected into the
/// session layer as `Arc<dyn ChatTransport>` so several independent sessions
/// or test doubles can coexist.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn create_chat(&self, project_id: Option<&ProjectId>) -> Result<ChatId, TransportError>;

    /// Open a generation stream. Failures to open are reported here; failures
    /// after opening arrive as an `Err` item on the stream.
    async fn stream_chat(&self, request: StreamRequest) -> Result<ChunkStream, TransportError>;

    async fn get_history(&self, chat_id: &ChatId) -> Result<Vec<Message>, TransportError>;

    async fn list_chats(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<ChatInfo>, TransportError>;

    async fn generate_chat_name(
        &self,
        chat_id: &ChatId,
        first_message: &str,
    ) -> Result<String, TransportError>;

    /// Enqueue an indexing job; returns the service's acknowledgement message.
    async fn submit_embedding_job(&self, project_id: &ProjectId) -> Result<String, TransportError>;

    async fn list_documents(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<DocumentRecord>, TransportError>;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, TransportError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, TransportError>;

    async fn create_project(
        &self,
        name: &str,
        description: &str,
    ) -> Result<ProjectId, TransportError>;

    async fn list_projects(&self) -> Result<Vec<Project>, TransportError>;
}
