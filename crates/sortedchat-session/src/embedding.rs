//! Embedding poll scheduler.
//!
//! One state machine per project: `Idle -> Polling -> Idle`. Submitting a job
//! always enqueues it remotely, but a poll loop is only started from `Idle`,
//! so a project never has two loops ticking at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sortedchat_core::events::{NotificationLevel, SessionEvent};
use sortedchat_core::types::{
    all_documents_terminal, has_failed_documents, DocumentRecord, ProjectId,
};
use sortedchat_transport::ChatTransport;

use crate::error::SessionError;
use crate::view::ViewState;

/// Polling state of one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollState {
    #[default]
    Idle,
    Polling { attempts_remaining: u32 },
}

impl PollState {
    pub fn is_polling(&self) -> bool {
        matches!(self, PollState::Polling { .. })
    }
}

/// Snapshot of a project's embedding job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingJob {
    pub project_id: ProjectId,
    pub attempts_remaining: u32,
    pub polling_active: bool,
}

/// Result of a finished poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub project_id: ProjectId,
    pub attempts: u32,
    pub all_succeeded: bool,
    pub has_failed: bool,
}

/// Handle on a running poll loop.
#[derive(Debug)]
pub struct PollHandle {
    pub project_id: ProjectId,
    join: JoinHandle<PollSummary>,
}

impl PollHandle {
    pub async fn finished(self) -> Result<PollSummary, SessionError> {
        Ok(self.join.await?)
    }
}

/// Answer to a job submission.
#[derive(Debug)]
pub struct SubmitReceipt {
    /// Acknowledgement message from the service.
    pub message: String,
    /// `None` when a loop was already polling the project.
    pub poll: Option<PollHandle>,
}

#[derive(Debug, Default)]
struct ProjectBoard {
    state: PollState,
    documents: Vec<DocumentRecord>,
    is_error_docs: bool,
}

pub struct EmbeddingPollScheduler {
    transport: Arc<dyn ChatTransport>,
    view: Arc<ViewState>,
    max_attempts: u32,
    interval: Duration,
    boards: Mutex<HashMap<ProjectId, ProjectBoard>>,
    shutting_down: AtomicBool,
    shutdown: Notify,
}

impl EmbeddingPollScheduler {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        view: Arc<ViewState>,
        max_attempts: u32,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            view,
            max_attempts,
            interval,
            boards: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    fn boards(&self) -> MutexGuard<'_, HashMap<ProjectId, ProjectBoard>> {
        self.boards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an embedding job and start polling unless a loop is already
    /// active for the project.
    pub async fn submit(
        self: &Arc<Self>,
        project_id: &ProjectId,
    ) -> Result<SubmitReceipt, SessionError> {
        let message = match self.transport.submit_embedding_job(project_id).await {
            Ok(message) => message,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Embedding job submission failed");
                self.view.emit(SessionEvent::notify(
                    NotificationLevel::Error,
                    format!("Failed to submit embedding job: {}", e),
                ));
                return Err(SessionError::JobSubmission(e.to_string()));
            }
        };
        info!(project_id = %project_id, "Embedding job submitted");
        self.view
            .emit(SessionEvent::notify(NotificationLevel::Success, message.clone()));

        let poll = self.start_polling(project_id);
        Ok(SubmitReceipt { message, poll })
    }

    /// Clear the failed flag, then submit again.
    ///
    /// If the submission is rejected the flag is recomputed from the last
    /// known documents.
    pub async fn retry(
        self: &Arc<Self>,
        project_id: &ProjectId,
    ) -> Result<SubmitReceipt, SessionError> {
        {
            let mut boards = self.boards();
            let board = boards.entry(project_id.clone()).or_default();
            board.is_error_docs = false;
            if self.view.is_current_project(project_id) {
                self.view.is_error_docs.set(false);
            }
        }
        let result = self.submit(project_id).await;
        if result.is_err() {
            let mut boards = self.boards();
            let board = boards.entry(project_id.clone()).or_default();
            board.is_error_docs = has_failed_documents(&board.documents);
            if self.view.is_current_project(project_id) {
                self.view.is_error_docs.set(board.is_error_docs);
            }
        }
        result
    }

    fn start_polling(self: &Arc<Self>, project_id: &ProjectId) -> Option<PollHandle> {
        {
            let mut boards = self.boards();
            let board = boards.entry(project_id.clone()).or_default();
            if board.state.is_polling() {
                debug!(project_id = %project_id, "Poll loop already active, not starting another");
                return None;
            }
            board.state = PollState::Polling {
                attempts_remaining: self.max_attempts,
            };
            if self.view.is_current_project(project_id) {
                self.view.is_polling.set(true);
            }
        }
        info!(project_id = %project_id, attempts = self.max_attempts, "Polling started");
        self.view.emit(SessionEvent::PollingStarted {
            project_id: project_id.clone(),
        });

        let this = Arc::clone(self);
        let task_project = project_id.clone();
        let join = tokio::spawn(async move { this.run(task_project).await });
        Some(PollHandle {
            project_id: project_id.clone(),
            join,
        })
    }

    async fn run(&self, project_id: ProjectId) -> PollSummary {
        let mut attempts = 0;
        let mut all_succeeded = false;

        while attempts < self.max_attempts {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            attempts += 1;
            match self.transport.list_documents(&project_id).await {
                Ok(documents) => {
                    all_succeeded = all_documents_terminal(&documents);
                    self.apply_documents(&project_id, documents);
                }
                Err(e) => {
                    all_succeeded = false;
                    warn!(project_id = %project_id, attempt = attempts, error = %e, "Document status fetch failed");
                }
            }
            self.set_remaining(&project_id, self.max_attempts - attempts);
            if all_succeeded || attempts == self.max_attempts {
                break;
            }

            let shutdown = self.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut shutdown => break,
            }
        }

        self.finish(project_id, attempts, all_succeeded)
    }

    fn set_remaining(&self, project_id: &ProjectId, attempts_remaining: u32) {
        if let Some(board) = self.boards().get_mut(project_id) {
            board.state = PollState::Polling { attempts_remaining };
        }
    }

    fn finish(&self, project_id: ProjectId, attempts: u32, all_succeeded: bool) -> PollSummary {
        let has_failed = {
            let mut boards = self.boards();
            let board = boards.entry(project_id.clone()).or_default();
            board.state = PollState::Idle;
            if self.view.is_current_project(&project_id) {
                self.view.is_polling.set(false);
            }
            board.is_error_docs
        };
        info!(project_id = %project_id, attempts, all_succeeded, has_failed, "Polling stopped");
        self.view.emit(SessionEvent::PollingStopped {
            project_id: project_id.clone(),
            attempts,
            all_succeeded,
        });
        PollSummary {
            project_id,
            attempts,
            all_succeeded,
            has_failed,
        }
    }

    /// Store a fresh document list and recompute `is_error_docs`.
    fn apply_documents(&self, project_id: &ProjectId, documents: Vec<DocumentRecord>) {
        let count = documents.len();
        let has_failed = has_failed_documents(&documents);
        {
            let mut boards = self.boards();
            let board = boards.entry(project_id.clone()).or_default();
            board.is_error_docs = has_failed;
            board.documents = documents;
            if self.view.is_current_project(project_id) {
                self.view.documents.set(board.documents.clone());
                self.view.is_error_docs.set(has_failed);
            }
        }
        debug!(project_id = %project_id, count, has_failed, "Documents updated");
        self.view.emit(SessionEvent::DocumentsUpdated {
            project_id: project_id.clone(),
            count,
            has_failed,
        });
    }

    /// Fetch the project's documents once, outside of any poll loop.
    pub async fn refresh_documents(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<DocumentRecord>, SessionError> {
        let documents = self.transport.list_documents(project_id).await?;
        self.apply_documents(project_id, documents.clone());
        Ok(documents)
    }

    /// Copy a project's board into the view, or blank it when `None`.
    pub fn publish(&self, project_id: Option<&ProjectId>) {
        let boards = self.boards();
        match project_id.and_then(|id| boards.get(id)) {
            Some(board) => {
                self.view.documents.set(board.documents.clone());
                self.view.is_error_docs.set(board.is_error_docs);
                self.view.is_polling.set(board.state.is_polling());
            }
            None => {
                self.view.documents.set(Vec::new());
                self.view.is_error_docs.set(false);
                self.view.is_polling.set(false);
            }
        }
    }

    pub fn state(&self, project_id: &ProjectId) -> PollState {
        self.boards()
            .get(project_id)
            .map(|b| b.state)
            .unwrap_or_default()
    }

    pub fn job(&self, project_id: &ProjectId) -> Option<EmbeddingJob> {
        self.boards().get(project_id).map(|board| {
            let attempts_remaining = match board.state {
                PollState::Polling { attempts_remaining } => attempts_remaining,
                PollState::Idle => 0,
            };
            EmbeddingJob {
                project_id: project_id.clone(),
                attempts_remaining,
                polling_active: board.state.is_polling(),
            }
        })
    }

    pub fn is_error_docs(&self, project_id: &ProjectId) -> bool {
        self.boards()
            .get(project_id)
            .is_some_and(|b| b.is_error_docs)
    }

    /// Stop every poll loop at its next suspension point.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

// =============================================================================
// Tests
// =============================================================================
