use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationId, ReviewStage, RoleId};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

fn default_title() -> String {
    DEFAULT_CONVERSATION_TITLE.to_string()
}

/// Parses backend timestamps. The backend writes naive UTC ISO-8601
/// (`2024-05-01T09:30:00.123456`), older records may carry an offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub created_at: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        stage1: Option<Vec<Stage1Response>>,
        #[serde(default)]
        stage2: Option<Vec<Stage2Ranking>>,
        #[serde(default)]
        stage3: Option<Stage3Result>,
    },
}

impl Message {
    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }
}

/// One reviewer persona's independent critique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage1Response {
    pub model: String,
    pub response: String,
}

/// One persona's ranking of the anonymised stage 1 critiques.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage2Ranking {
    #[serde(alias = "model")]
    pub ranker: String,
    pub ranking: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parsed_ranking: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stage2Metadata {
    #[serde(default)]
    pub label_to_model: BTreeMap<String, String>,
    #[serde(default)]
    pub aggregate_rankings: Vec<AggregateRanking>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRanking {
    pub model: String,
    pub average_rank: f64,
    #[serde(default)]
    pub rankings_count: u32,
}

/// The chairman's synthesized verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Stage3Wire")]
pub struct Stage3Result {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// Some stored conversations carry stage 3 as a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Stage3Wire {
    Text(String),
    Full {
        response: String,
        #[serde(default)]
        model: Option<String>,
    },
}

impl From<Stage3Wire> for Stage3Result {
    fn from(value: Stage3Wire) -> Self {
        match value {
            Stage3Wire::Text(response) => Self {
                response,
                model: None,
            },
            Stage3Wire::Full { response, model } => Self { response, model },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleUpdate {
    pub title: String,
}

/// One `data: ` record of the review event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Stage1Start,
    Stage1Complete {
        data: Vec<Stage1Response>,
    },
    Stage2Start,
    Stage2Complete {
        data: Vec<Stage2Ranking>,
        #[serde(default)]
        metadata: Option<Stage2Metadata>,
    },
    Stage3Start,
    Stage3Complete {
        data: Stage3Result,
    },
    TitleComplete {
        data: TitleUpdate,
    },
    Complete,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stage1Start => "stage1_start",
            Self::Stage1Complete { .. } => "stage1_complete",
            Self::Stage2Start => "stage2_start",
            Self::Stage2Complete { .. } => "stage2_complete",
            Self::Stage3Start => "stage3_start",
            Self::Stage3Complete { .. } => "stage3_complete",
            Self::TitleComplete { .. } => "title_complete",
            Self::Complete => "complete",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    pub fn started_stage(&self) -> Option<ReviewStage> {
        match self {
            Self::Stage1Start => Some(ReviewStage::Stage1),
            Self::Stage2Start => Some(ReviewStage::Stage2),
            Self::Stage3Start => Some(ReviewStage::Stage3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRolePayload {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfigPayload {
    pub provider: String,
    pub model: String,
    pub api_key: String,
}

/// Body of both message endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub content: String,
    #[serde(default)]
    pub custom_roles: Vec<CustomRolePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmConfigPayload>,
}

/// Response of the non-streaming message endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResponse {
    #[serde(default)]
    pub stage1: Vec<Stage1Response>,
    #[serde(default)]
    pub stage2: Vec<Stage2Ranking>,
    pub stage3: Stage3Result,
    #[serde(default)]
    pub metadata: Option<Stage2Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}
