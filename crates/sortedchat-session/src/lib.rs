//! Client-side orchestration of chat sessions against a remote generation service.
//!
//! Aggregates streamed response chunks into a live view, commits each
//! finished exchange to history exactly once, keeps per-chat identity
//! consistent across rapid chat switches, polls background embedding jobs
//! and debounces chat search. All asynchronous results are stamped with an
//! epoch or generation at issuance and dropped on arrival if stale.

pub mod catalog;
pub mod embedding;
pub mod error;
pub mod history;
pub mod identity;
pub mod orchestrator;
pub mod search;
pub mod streaming;
pub mod view;

pub use catalog::ChatCatalog;
pub use embedding::{EmbeddingJob, EmbeddingPollScheduler, PollHandle, PollState, PollSummary, SubmitReceipt};
pub use error::SessionError;
pub use history::{Exchange, FetchTicket, HistoryStore};
pub use identity::{ChatIdentityRegister, ChatSession};
pub use orchestrator::SessionOrchestrator;
pub use search::SearchDebouncer;
pub use streaming::{StreamHandle, StreamOutcome, StreamingAggregator};
pub use view::{HistoryView, Observable, ViewState};
