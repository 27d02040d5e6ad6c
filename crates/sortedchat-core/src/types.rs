use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a chat, assigned by the remote chat service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a project (a group of chats sharing uploaded documents).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Staleness counters
// =============================================================================

/// Per-chat counter stamped on asynchronous work issued for that chat.
///
/// A result whose epoch differs from the chat's current epoch is stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Search query counter; bumped on every debounce settle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single entry of a chat history. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id; `None` for messages committed locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Two messages carry the same exchange content, ignoring server ids.
    pub fn same_content(&self, other: &Message) -> bool {
        self.role == other.role && self.content == other.content
    }
}

// =============================================================================
// Catalog entries returned by the chat service
// =============================================================================

/// Chat list entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub chat_id: ChatId,
    pub name: String,
}

/// A generation model the service can stream from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
    pub provider: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One hit of a full-text search over chat history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chat_id: ChatId,
    pub chat_name: String,
    pub matched_text: String,
}

// =============================================================================
// Documents
// =============================================================================

/// Lifecycle stage of a document's search-index preparation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Queued,
    Embedding,
    Failed,
    Success,
}

impl EmbeddingStatus {
    /// Decode the numeric status used on the wire (0..=3).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(EmbeddingStatus::Queued),
            1 => Some(EmbeddingStatus::Embedding),
            2 => Some(EmbeddingStatus::Failed),
            3 => Some(EmbeddingStatus::Success),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            EmbeddingStatus::Queued => 0,
            EmbeddingStatus::Embedding => 1,
            EmbeddingStatus::Failed => 2,
            EmbeddingStatus::Success => 3,
        }
    }

    /// Only `Success` ends polling early; `Failed` documents wait for a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EmbeddingStatus::Success)
    }

    /// Status line shown next to a document.
    pub fn label(&self) -> &'static str {
        match self {
            EmbeddingStatus::Queued => "Currently in queue",
            EmbeddingStatus::Embedding => "Embedding in progress",
            EmbeddingStatus::Failed => "Indexing failed, Regenerate embeddings",
            EmbeddingStatus::Success => "",
        }
    }
}

/// An uploaded document as reported by the document service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub file_name: String,
    pub embedding_status: EmbeddingStatus,
}

impl DocumentRecord {
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        embedding_status: EmbeddingStatus,
    ) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            embedding_status,
        }
    }
}

/// True iff at least one document failed to index.
pub fn has_failed_documents(documents: &[DocumentRecord]) -> bool {
    documents
        .iter()
        .any(|d| d.embedding_status == EmbeddingStatus::Failed)
}

/// True iff every document reached a terminal status (vacuously true when empty).
pub fn all_documents_terminal(documents: &[DocumentRecord]) -> bool {
    documents.iter().all(|d| d.embedding_status.is_terminal())
}

// =============================================================================
// Tests
// =============================================================================
