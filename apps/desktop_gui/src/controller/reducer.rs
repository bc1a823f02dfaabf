//! UI state and its transitions. Rendering reads this state; every change
//! goes through the methods here so the flow can be tested without a window.

use client_core::{
    roles::{NewRole, RoleSet, DEFAULT_CUSTOM_ICON},
    settings::LlmConfig,
    view::ResultsLayout,
    ReviewSnapshot,
};
use shared::{
    domain::{ConversationId, ReviewStage, RoleId},
    protocol::ConversationSummary,
};

use crate::{
    backend_bridge::commands::BackendCommand,
    controller::events::{UiError, UiErrorContext, UiEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Council,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouncilView {
    Landing,
    Results,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRoleDraft {
    pub name: String,
    pub description: String,
    pub icon: String,
}

impl Default for AddRoleDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            icon: DEFAULT_CUSTOM_ICON.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDraft {
    pub config: LlmConfig,
    pub show_key: bool,
}

pub struct AppState {
    pub tab: Tab,
    pub view: CouncilView,
    pub content: String,
    pub roles: RoleSet,
    pub loading: bool,
    pub active_stage: Option<ReviewStage>,
    pub review: Option<ReviewSnapshot>,
    pub review_title: Option<String>,
    pub conversation_id: Option<ConversationId>,
    pub rankings_expanded: bool,
    pub history: Vec<ConversationSummary>,
    pub saved_llm_config: Option<LlmConfig>,
    pub add_role: Option<AddRoleDraft>,
    pub add_role_error: Option<String>,
    pub settings: Option<SettingsDraft>,
    pub error: Option<UiError>,
    pub status: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            tab: Tab::Council,
            view: CouncilView::Landing,
            content: String::new(),
            roles: RoleSet::with_builtins(),
            loading: false,
            active_stage: None,
            review: None,
            review_title: None,
            conversation_id: None,
            rankings_expanded: false,
            history: Vec::new(),
            saved_llm_config: None,
            add_role: None,
            add_role_error: None,
            settings: None,
            error: None,
            status: String::new(),
        }
    }
}

impl AppState {
    pub fn can_submit(&self) -> bool {
        !self.loading && !self.content.trim().is_empty()
    }

    pub fn results_layout(&self) -> Option<ResultsLayout> {
        let review = self.review.as_ref()?;
        let mut layout = ResultsLayout::from_snapshot(review, &self.roles);
        layout.set_rankings_expanded(self.rankings_expanded);
        Some(layout)
    }

    pub fn select_tab(&mut self, tab: Tab) {
        self.tab = tab;
        if tab == Tab::Council && self.review.is_none() {
            self.view = CouncilView::Landing;
        }
    }

    /// Starts a review. Returns the command to queue, or `None` when the form
    /// cannot be submitted.
    pub fn submit(&mut self) -> Option<BackendCommand> {
        if !self.can_submit() {
            return None;
        }
        self.loading = true;
        self.active_stage = None;
        self.review = None;
        self.review_title = None;
        self.conversation_id = None;
        self.rankings_expanded = false;
        self.error = None;
        self.status = "Council reviewing...".to_string();
        Some(BackendCommand::SubmitReview {
            content: self.content.clone(),
            roles: self.roles.clone(),
        })
    }

    pub fn new_review(&mut self) {
        self.review = None;
        self.review_title = None;
        self.conversation_id = None;
        self.rankings_expanded = false;
        self.view = CouncilView::Landing;
    }

    pub fn open_add_role(&mut self) {
        self.add_role = Some(AddRoleDraft::default());
        self.add_role_error = None;
    }

    pub fn close_add_role(&mut self) {
        self.add_role = None;
        self.add_role_error = None;
    }

    /// Adds the drafted role. The dialog stays open when validation fails.
    pub fn confirm_add_role(&mut self) -> bool {
        let Some(draft) = self.add_role.clone() else {
            return false;
        };
        let role = NewRole::new(draft.name, draft.description).with_icon(draft.icon);
        match self.roles.add_custom(role) {
            Ok(_) => {
                self.close_add_role();
                true
            }
            Err(err) => {
                self.add_role_error = Some(err.to_string());
                false
            }
        }
    }

    pub fn remove_role(&mut self, id: &RoleId) -> bool {
        self.roles.remove(id)
    }

    /// Opens the settings dialog with the cached config and asks for a fresh
    /// read of the stored one.
    pub fn open_settings(&mut self) -> BackendCommand {
        self.settings = Some(SettingsDraft {
            config: self.saved_llm_config.clone().unwrap_or_default(),
            show_key: false,
        });
        BackendCommand::LoadSettings
    }

    pub fn close_settings(&mut self) {
        self.settings = None;
    }

    pub fn save_settings(&mut self) -> Option<BackendCommand> {
        let draft = self.settings.take()?;
        Some(BackendCommand::SaveSettings(draft.config))
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Info(message) => self.status = message,
            UiEvent::SettingsLoaded(config) => {
                let cached = self.saved_llm_config.clone().unwrap_or_default();
                // Drafts the user already edited are left alone.
                if let Some(draft) = self.settings.as_mut().filter(|draft| draft.config == cached) {
                    draft.config = config.clone().unwrap_or_default();
                }
                self.saved_llm_config = config;
            }
            UiEvent::SettingsSaved(config) => {
                self.status = format!("Saved AI settings: {} / {}", config.provider, config.model);
                self.saved_llm_config = Some(config);
            }
            UiEvent::HistoryLoaded(conversations) => self.history = conversations,
            UiEvent::ReviewStarted(conversation_id) => {
                self.conversation_id = Some(conversation_id);
                self.status = "Council convened".to_string();
            }
            UiEvent::StageStarted(stage) => {
                self.active_stage = Some(stage);
                self.status = format!("Stage {}: {}...", stage.number(), stage.label());
            }
            UiEvent::ReviewUpdated(review) => {
                self.review = Some(review);
            }
            UiEvent::TitleUpdated(title) => self.review_title = Some(title),
            UiEvent::ReviewCompleted(review) => {
                self.review = Some(review);
                self.loading = false;
                self.active_stage = None;
                self.view = CouncilView::Results;
                self.status = "Review complete".to_string();
            }
            UiEvent::ReviewFailed(message) => {
                self.loading = false;
                self.active_stage = None;
                self.error = Some(UiError::from_message(
                    UiErrorContext::SubmitReview,
                    format!("council error: {message}"),
                ));
            }
            UiEvent::ReviewInterrupted(review) => {
                self.loading = false;
                self.active_stage = None;
                if !review.is_empty() {
                    self.review = Some(review);
                }
                self.error = Some(UiError::from_message(
                    UiErrorContext::SubmitReview,
                    "the council stopped responding before the review finished",
                ));
            }
            UiEvent::ConversationOpened(opened) => {
                // Conversations without an answer yet stay in the history list.
                if let Some(review) = opened.review {
                    self.review = Some(review);
                    self.review_title = Some(opened.conversation.title.clone());
                    self.conversation_id = Some(opened.conversation.id.clone());
                    self.rankings_expanded = false;
                    self.view = CouncilView::Results;
                    self.tab = Tab::Council;
                }
            }
            UiEvent::PdfExported(path) => {
                self.status = format!("Saved {}", path.display());
            }
            UiEvent::Error(error) => {
                if error.context() == UiErrorContext::SubmitReview {
                    self.loading = false;
                    self.active_stage = None;
                }
                self.error = Some(error);
            }
        }
    }
}
