use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::CONTENT_DISPOSITION, Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationId, ReviewStage},
    error::ApiError,
    protocol::{
        Conversation, ConversationSummary, HealthStatus, ReviewRequest, ReviewResponse,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub mod config;
pub mod error;
pub mod request;
pub mod review;
pub mod roles;
pub mod settings;
pub mod sse;
pub mod view;

pub use config::ClientSettings;
pub use error::ClientError;
pub use review::{ReviewAccumulator, ReviewOutcome, ReviewSnapshot, ReviewTransition};
pub use sse::{LineFraming, ReviewStream};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationsListed(Vec<ConversationSummary>),
    ConversationOpened(OpenedConversation),
    ReviewStarted {
        conversation_id: ConversationId,
    },
    StageStarted {
        conversation_id: ConversationId,
        stage: ReviewStage,
    },
    ReviewUpdated {
        conversation_id: ConversationId,
        stage: ReviewStage,
        review: ReviewSnapshot,
    },
    TitleUpdated {
        conversation_id: ConversationId,
        title: String,
    },
    ReviewCompleted {
        conversation_id: ConversationId,
        review: ReviewSnapshot,
    },
    ReviewFailed {
        conversation_id: ConversationId,
        message: String,
    },
    ReviewInterrupted {
        conversation_id: ConversationId,
        review: ReviewSnapshot,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenedConversation {
    pub conversation: Conversation,
    /// First stored review, present once the conversation has an answer.
    pub review: Option<ReviewSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRun {
    pub conversation_id: ConversationId,
    pub title: Option<String>,
    pub outcome: ReviewOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfExport {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait CouncilHandle: Send + Sync {
    async fn health(&self) -> Result<HealthStatus>;
    async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn open_conversation(&self, conversation_id: &ConversationId)
        -> Result<OpenedConversation>;
    async fn submit_review(&self, request: ReviewRequest) -> Result<ReviewRun>;
    async fn export_pdf(&self, conversation_id: &ConversationId) -> Result<PdfExport>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

pub struct CouncilClient {
    http: Client,
    api_base: String,
    framing: LineFraming,
    events: broadcast::Sender<ClientEvent>,
}

impl CouncilClient {
    pub fn new(api_base: impl Into<String>) -> Arc<Self> {
        Self::with_framing(api_base, LineFraming::default())
    }

    pub fn from_settings(settings: &ClientSettings) -> Arc<Self> {
        Self::with_framing(settings.resolved_api_base(), settings.stream_framing)
    }

    pub fn with_framing(api_base: impl Into<String>, framing: LineFraming) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let api_base = api_base.into().trim_end_matches('/').to_string();
        info!(api_base = %api_base, framing = %framing, "council client configured");
        Arc::new(Self {
            http: Client::new(),
            api_base,
            framing,
            events,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn framing(&self) -> LineFraming {
        self.framing
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn conversation_url(&self, conversation_id: &ConversationId, suffix: &str) -> String {
        self.url(&format!("/api/conversations/{conversation_id}{suffix}"))
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.http.get(self.url("/api/health")).send().await?;
        decode_json(ensure_success(response, "health check").await?, "health check").await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self
            .http
            .get(self.url("/api/conversations"))
            .send()
            .await
            .context("failed to list conversations")?;
        decode_json(
            ensure_success(response, "list conversations").await?,
            "list conversations",
        )
        .await
    }

    pub async fn create_conversation(&self) -> Result<Conversation> {
        let response = self
            .http
            .post(self.url("/api/conversations"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("failed to create conversation")?;
        let conversation: Conversation = decode_json(
            ensure_success(response, "create conversation").await?,
            "create conversation",
        )
        .await?;
        debug!(conversation_id = %conversation.id, "created conversation");
        Ok(conversation)
    }

    pub async fn get_conversation(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        let response = self
            .http
            .get(self.conversation_url(conversation_id, ""))
            .send()
            .await
            .with_context(|| format!("failed to get conversation {conversation_id}"))?;
        decode_json(
            ensure_success(response, "get conversation").await?,
            "get conversation",
        )
        .await
    }

    /// Non-streaming variant: waits for all three stages.
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        request: &ReviewRequest,
    ) -> Result<ReviewResponse> {
        let response = self
            .http
            .post(self.conversation_url(conversation_id, "/message"))
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to send message to {conversation_id}"))?;
        decode_json(ensure_success(response, "send message").await?, "send message").await
    }

    /// Opens the event stream of a review. Fails before any event on a non-2xx status.
    pub async fn send_message_stream(
        &self,
        conversation_id: &ConversationId,
        request: &ReviewRequest,
    ) -> Result<ReviewStream> {
        let response = self
            .http
            .post(self.conversation_url(conversation_id, "/message/stream"))
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to start review stream for {conversation_id}"))?;
        let response = ensure_success(response, "send message").await?;
        Ok(ReviewStream::from_response(response, self.framing))
    }

    pub async fn export_pdf(&self, conversation_id: &ConversationId) -> Result<PdfExport> {
        let response = self
            .http
            .post(self.conversation_url(conversation_id, "/export/pdf"))
            .send()
            .await
            .with_context(|| format!("failed to export conversation {conversation_id}"))?;
        let response = ensure_success(response, "export pdf").await?;
        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| format!("council-review-{conversation_id}.pdf"));
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ClientError::Decode {
                operation: "export pdf",
                detail: err.to_string(),
            })?
            .to_vec();
        info!(conversation_id = %conversation_id, filename = %filename, size_bytes = bytes.len(), "exported review pdf");
        Ok(PdfExport { filename, bytes })
    }

    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conversations = self.list_conversations().await?;
        self.publish(ClientEvent::ConversationsListed(conversations.clone()));
        Ok(conversations)
    }

    pub async fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<OpenedConversation> {
        let conversation = self.get_conversation(conversation_id).await?;
        let review = ReviewSnapshot::from_conversation(&conversation);
        let opened = OpenedConversation {
            conversation,
            review,
        };
        self.publish(ClientEvent::ConversationOpened(opened.clone()));
        Ok(opened)
    }

    /// Creates a conversation and streams one review into it.
    pub async fn submit_review(&self, request: ReviewRequest) -> Result<ReviewRun> {
        if request.content.trim().is_empty() {
            return Err(ClientError::Validation("review content must not be empty".into()).into());
        }
        let conversation = self.create_conversation().await?;
        self.run_review(&conversation.id, &request).await
    }

    /// Streams a review for an existing conversation, publishing every change.
    pub async fn run_review(
        &self,
        conversation_id: &ConversationId,
        request: &ReviewRequest,
    ) -> Result<ReviewRun> {
        info!(
            conversation_id = %conversation_id,
            custom_roles = request.custom_roles.len(),
            has_llm_config = request.llm_config.is_some(),
            "submitting council review"
        );
        let mut stream = self.send_message_stream(conversation_id, request).await?;
        self.publish(ClientEvent::ReviewStarted {
            conversation_id: conversation_id.clone(),
        });

        let mut accumulator = ReviewAccumulator::new();
        while let Some(event) = stream.next_event().await {
            match accumulator.apply(event) {
                ReviewTransition::StageStarted(stage) => {
                    debug!(conversation_id = %conversation_id, stage = stage.number(), "stage started");
                    self.publish(ClientEvent::StageStarted {
                        conversation_id: conversation_id.clone(),
                        stage,
                    });
                }
                ReviewTransition::StageUpdated(stage) => {
                    info!(conversation_id = %conversation_id, stage = stage.number(), "stage results received");
                    self.publish(ClientEvent::ReviewUpdated {
                        conversation_id: conversation_id.clone(),
                        stage,
                        review: accumulator.snapshot().clone(),
                    });
                }
                ReviewTransition::TitleUpdated(title) => {
                    self.publish(ClientEvent::TitleUpdated {
                        conversation_id: conversation_id.clone(),
                        title,
                    });
                }
                ReviewTransition::Completed => {
                    info!(conversation_id = %conversation_id, "council review complete");
                    self.publish(ClientEvent::ReviewCompleted {
                        conversation_id: conversation_id.clone(),
                        review: accumulator.snapshot().clone(),
                    });
                    if let Err(err) = self.refresh_conversations().await {
                        warn!(error = %err, "failed to refresh conversations after review");
                        self.publish(ClientEvent::Error(format!(
                            "failed to refresh review history: {err:#}"
                        )));
                    }
                    break;
                }
                ReviewTransition::Failed(message) => {
                    error!(conversation_id = %conversation_id, message = %message, "council review failed");
                    self.publish(ClientEvent::ReviewFailed {
                        conversation_id: conversation_id.clone(),
                        message,
                    });
                    break;
                }
                ReviewTransition::Ignored => {}
            }
        }

        let title = accumulator.title().map(str::to_string);
        let outcome = accumulator.finish();
        if let ReviewOutcome::Interrupted(review) = &outcome {
            warn!(
                conversation_id = %conversation_id,
                latest_stage = review.latest_stage().map(ReviewStage::number),
                "review stream ended without a completion event"
            );
            self.publish(ClientEvent::ReviewInterrupted {
                conversation_id: conversation_id.clone(),
                review: review.clone(),
            });
        }

        Ok(ReviewRun {
            conversation_id: conversation_id.clone(),
            title,
            outcome,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl CouncilHandle for Arc<CouncilClient> {
    async fn health(&self) -> Result<HealthStatus> {
        CouncilClient::health(self).await
    }

    async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        CouncilClient::refresh_conversations(self).await
    }

    async fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<OpenedConversation> {
        CouncilClient::open_conversation(self, conversation_id).await
    }

    async fn submit_review(&self, request: ReviewRequest) -> Result<ReviewRun> {
        CouncilClient::submit_review(self, request).await
    }

    async fn export_pdf(&self, conversation_id: &ConversationId) -> Result<PdfExport> {
        CouncilClient::export_pdf(self, conversation_id).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        CouncilClient::subscribe_events(self)
    }
}

async fn ensure_success(response: Response, operation: &'static str) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let api_error = ApiError::from_response(status.as_u16(), &body);
    warn!(operation, status = status.as_u16(), code = ?api_error.code, detail = %api_error.message, "backend request failed");
    Err(ClientError::RequestFailed {
        operation,
        status: status.as_u16(),
        detail: api_error.message,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response, operation: &'static str) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|err| {
            ClientError::Decode {
                operation,
                detail: err.to_string(),
            }
            .into()
        })
}

/// Filename from a `Content-Disposition` header, reduced to its final path
/// component. Hidden or relative names are rejected.
fn attachment_filename(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let raw = part.trim().strip_prefix("filename=")?.trim_matches('"');
        let name = raw.rsplit(['/', '\\']).next()?.trim();
        if name.is_empty() || name.starts_with('.') {
            return None;
        }
        Some(name.to_string())
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
