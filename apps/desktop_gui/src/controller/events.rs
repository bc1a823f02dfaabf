//! Backend-to-UI events and error modeling for the desktop controller.

use std::path::PathBuf;

use client_core::{
    settings::LlmConfig, ClientEvent, OpenedConversation, ReviewSnapshot,
};
use shared::{
    domain::{ConversationId, ReviewStage},
    protocol::ConversationSummary,
};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Info(String),
    SettingsLoaded(Option<LlmConfig>),
    SettingsSaved(LlmConfig),
    HistoryLoaded(Vec<ConversationSummary>),
    ReviewStarted(ConversationId),
    StageStarted(ReviewStage),
    ReviewUpdated(ReviewSnapshot),
    TitleUpdated(String),
    ReviewCompleted(ReviewSnapshot),
    ReviewFailed(String),
    ReviewInterrupted(ReviewSnapshot),
    ConversationOpened(OpenedConversation),
    PdfExported(PathBuf),
    Error(UiError),
}

impl UiEvent {
    /// Maps a client broadcast into a UI event. Progress events of other
    /// conversations are never produced since reviews do not overlap.
    pub fn from_client(event: ClientEvent) -> Self {
        match event {
            ClientEvent::ConversationsListed(conversations) => Self::HistoryLoaded(conversations),
            ClientEvent::ConversationOpened(opened) => Self::ConversationOpened(opened),
            ClientEvent::ReviewStarted { conversation_id } => Self::ReviewStarted(conversation_id),
            ClientEvent::StageStarted { stage, .. } => Self::StageStarted(stage),
            ClientEvent::ReviewUpdated { review, .. } => Self::ReviewUpdated(review),
            ClientEvent::TitleUpdated { title, .. } => Self::TitleUpdated(title),
            ClientEvent::ReviewCompleted { review, .. } => Self::ReviewCompleted(review),
            ClientEvent::ReviewFailed { message, .. } => Self::ReviewFailed(message),
            ClientEvent::ReviewInterrupted { review, .. } => Self::ReviewInterrupted(review),
            ClientEvent::Error(message) => {
                Self::Error(UiError::from_message(UiErrorContext::General, message))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Transport,
    Validation,
    Backend,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    SubmitReview,
    LoadHistory,
    OpenConversation,
    Settings,
    Export,
    General,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let message_lower = message.to_ascii_lowercase();
        let category = if message_lower.contains("error sending request")
            || message_lower.contains("connection")
            || message_lower.contains("timed out")
            || message_lower.contains("dns")
            || message_lower.contains("disconnected")
        {
            UiErrorCategory::Transport
        } else if message_lower.contains("invalid input")
            || message_lower.contains("must not be empty")
            || message_lower.contains("need a name")
        {
            UiErrorCategory::Validation
        } else if message_lower.contains("failed with http") || message_lower.contains("council") {
            UiErrorCategory::Backend
        } else {
            UiErrorCategory::Unknown
        };

        Self {
            category,
            context,
            message,
        }
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Text for the error banner.
    pub fn banner_text(&self) -> String {
        match self.category {
            UiErrorCategory::Transport => {
                "Could not reach the council backend; check that it is running and retry."
                    .to_string()
            }
            UiErrorCategory::Validation => self.message.clone(),
            UiErrorCategory::Backend | UiErrorCategory::Unknown => match self.context {
                UiErrorContext::SubmitReview => {
                    "Something went wrong while the council was reviewing. Please try again."
                        .to_string()
                }
                UiErrorContext::LoadHistory => "Could not load review history.".to_string(),
                UiErrorContext::OpenConversation => "Could not open that review.".to_string(),
                UiErrorContext::Export => "Could not export the review as PDF.".to_string(),
                UiErrorContext::Settings => "Could not save AI settings.".to_string(),
                UiErrorContext::BackendStartup | UiErrorContext::General => self.message.clone(),
            },
        }
    }
}
