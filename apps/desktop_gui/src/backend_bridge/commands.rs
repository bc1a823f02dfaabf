//! Backend commands queued from UI to backend worker.

use client_core::{roles::RoleSet, settings::LlmConfig};
use shared::domain::ConversationId;

#[derive(Debug)]
pub enum BackendCommand {
    LoadSettings,
    SaveSettings(LlmConfig),
    RefreshHistory,
    SubmitReview { content: String, roles: RoleSet },
    OpenConversation(ConversationId),
    ExportPdf(ConversationId),
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadSettings => "load_settings",
            Self::SaveSettings(_) => "save_settings",
            Self::RefreshHistory => "refresh_history",
            Self::SubmitReview { .. } => "submit_review",
            Self::OpenConversation(_) => "open_conversation",
            Self::ExportPdf(_) => "export_pdf",
        }
    }
}
