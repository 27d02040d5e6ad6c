//! Chat, project and model lists fetched from the service.

use std::sync::Arc;

use tracing::{debug, info};

use sortedchat_core::events::SessionEvent;
use sortedchat_core::types::{ChatInfo, ModelInfo, Project, ProjectId};
use sortedchat_transport::ChatTransport;

use crate::error::SessionError;
use crate::identity::ChatIdentityRegister;
use crate::view::ViewState;

pub struct ChatCatalog {
    transport: Arc<dyn ChatTransport>,
    register: Arc<ChatIdentityRegister>,
    view: Arc<ViewState>,
}

impl ChatCatalog {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        register: Arc<ChatIdentityRegister>,
        view: Arc<ViewState>,
    ) -> Self {
        Self {
            transport,
            register,
            view,
        }
    }

    /// Fetch a chat list. With a project it fills the project chat list,
    /// without one the global chat list.
    pub async fn refresh_chat_list(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<ChatInfo>, SessionError> {
        let chats = self.transport.list_chats(project_id).await?;
        for chat in &chats {
            self.register.register(&chat.chat_id, project_id, &chat.name);
        }
        match project_id {
            Some(_) => self.view.project_chat_list.set(chats.clone()),
            None => self.view.chat_list.set(chats.clone()),
        }
        debug!(project_id = ?project_id.map(ProjectId::as_str), count = chats.len(), "Chat list refreshed");
        self.view.emit(SessionEvent::ChatListUpdated {
            project_id: project_id.cloned(),
            count: chats.len(),
        });
        Ok(chats)
    }

    pub async fn refresh_models(&self) -> Result<Vec<ModelInfo>, SessionError> {
        let models = self.transport.list_models().await?;
        self.view.models.set(models.clone());
        Ok(models)
    }

    /// Model stamped on subsequent generation requests.
    pub fn select_model(&self, model_id: &str) {
        info!(model = model_id, "Model selected");
        self.view.selected_model.set(model_id.to_string());
    }

    pub async fn refresh_projects(&self) -> Result<Vec<Project>, SessionError> {
        let projects = self.transport.list_projects().await?;
        self.view.projects.set(projects.clone());
        Ok(projects)
    }

    pub fn clear_project_chat_list(&self) {
        self.view.project_chat_list.set(Vec::new());
    }
}
