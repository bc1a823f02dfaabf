//! Accumulates the three review stages out of stream events.

use shared::{
    domain::ReviewStage,
    protocol::{
        Conversation, Message, ReviewResponse, Stage1Response, Stage2Metadata, Stage2Ranking,
        Stage3Result, StreamEvent,
    },
};
use tracing::{debug, warn};

pub const UNKNOWN_REVIEW_ERROR: &str = "the council could not complete this review";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReviewSnapshot {
    pub stage1: Option<Vec<Stage1Response>>,
    pub stage2: Option<Vec<Stage2Ranking>>,
    pub stage2_metadata: Option<Stage2Metadata>,
    pub stage3: Option<Stage3Result>,
}

impl ReviewSnapshot {
    pub fn is_empty(&self) -> bool {
        self.stage1.is_none() && self.stage2.is_none() && self.stage3.is_none()
    }

    /// Highest stage whose results are present.
    pub fn latest_stage(&self) -> Option<ReviewStage> {
        if self.stage3.is_some() {
            Some(ReviewStage::Stage3)
        } else if self.stage2.is_some() {
            Some(ReviewStage::Stage2)
        } else if self.stage1.is_some() {
            Some(ReviewStage::Stage1)
        } else {
            None
        }
    }

    pub fn is_filled(&self, stage: ReviewStage) -> bool {
        match stage {
            ReviewStage::Stage1 => self.stage1.is_some(),
            ReviewStage::Stage2 => self.stage2.is_some(),
            ReviewStage::Stage3 => self.stage3.is_some(),
        }
    }

    pub fn from_message(message: &Message) -> Option<Self> {
        match message {
            Message::Assistant {
                stage1,
                stage2,
                stage3,
            } => Some(Self {
                stage1: stage1.clone(),
                stage2: stage2.clone(),
                stage2_metadata: None,
                stage3: stage3.clone(),
            }),
            Message::User { .. } => None,
        }
    }

    /// The review stored in a conversation: its first assistant message,
    /// provided the conversation holds at least a question and an answer.
    pub fn from_conversation(conversation: &Conversation) -> Option<Self> {
        if conversation.messages.len() < 2 {
            return None;
        }
        conversation.messages.iter().find_map(Self::from_message)
    }
}

impl From<ReviewResponse> for ReviewSnapshot {
    fn from(response: ReviewResponse) -> Self {
        Self {
            stage1: Some(response.stage1),
            stage2: Some(response.stage2),
            stage2_metadata: response.metadata,
            stage3: Some(response.stage3),
        }
    }
}

/// What applying one event did to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewTransition {
    StageStarted(ReviewStage),
    StageUpdated(ReviewStage),
    TitleUpdated(String),
    Completed,
    Failed(String),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    Completed(ReviewSnapshot),
    Failed {
        message: String,
        partial: ReviewSnapshot,
    },
    /// The body ended without a `complete` or `error` event.
    Interrupted(ReviewSnapshot),
}

impl ReviewOutcome {
    pub fn snapshot(&self) -> &ReviewSnapshot {
        match self {
            Self::Completed(snapshot) | Self::Interrupted(snapshot) => snapshot,
            Self::Failed { partial, .. } => partial,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Terminal {
    Completed,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct ReviewAccumulator {
    snapshot: ReviewSnapshot,
    title: Option<String>,
    terminal: Option<Terminal>,
}

impl ReviewAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &ReviewSnapshot {
        &self.snapshot
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn apply(&mut self, event: StreamEvent) -> ReviewTransition {
        if self.terminal.is_some() {
            debug!(event_type = event.kind(), "ignoring event after review finished");
            return ReviewTransition::Ignored;
        }

        match event {
            StreamEvent::Stage1Start | StreamEvent::Stage2Start | StreamEvent::Stage3Start => {
                let Some(stage) = event.started_stage() else {
                    return ReviewTransition::Ignored;
                };
                if self.snapshot.is_filled(stage) {
                    warn!(stage = stage.number(), "stage started after its results arrived");
                    return ReviewTransition::Ignored;
                }
                ReviewTransition::StageStarted(stage)
            }
            StreamEvent::Stage1Complete { data } => {
                if !self.accepts(ReviewStage::Stage1) {
                    return ReviewTransition::Ignored;
                }
                self.snapshot.stage1 = Some(data);
                ReviewTransition::StageUpdated(ReviewStage::Stage1)
            }
            StreamEvent::Stage2Complete { data, metadata } => {
                if !self.accepts(ReviewStage::Stage2) {
                    return ReviewTransition::Ignored;
                }
                self.snapshot.stage2 = Some(data);
                self.snapshot.stage2_metadata = metadata;
                ReviewTransition::StageUpdated(ReviewStage::Stage2)
            }
            StreamEvent::Stage3Complete { data } => {
                if !self.accepts(ReviewStage::Stage3) {
                    return ReviewTransition::Ignored;
                }
                self.snapshot.stage3 = Some(data);
                ReviewTransition::StageUpdated(ReviewStage::Stage3)
            }
            StreamEvent::TitleComplete { data } => {
                self.title = Some(data.title.clone());
                ReviewTransition::TitleUpdated(data.title)
            }
            StreamEvent::Complete => {
                self.terminal = Some(Terminal::Completed);
                ReviewTransition::Completed
            }
            StreamEvent::Error { message } => {
                let message = message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_REVIEW_ERROR.to_string());
                self.terminal = Some(Terminal::Failed(message.clone()));
                ReviewTransition::Failed(message)
            }
            StreamEvent::Unknown => ReviewTransition::Ignored,
        }
    }

    // Slots fill in order and only once.
    fn accepts(&self, stage: ReviewStage) -> bool {
        let previous_filled = match stage {
            ReviewStage::Stage1 => true,
            ReviewStage::Stage2 => self.snapshot.stage1.is_some(),
            ReviewStage::Stage3 => self.snapshot.stage2.is_some(),
        };
        if self.snapshot.is_filled(stage) {
            warn!(stage = stage.number(), "duplicate stage result ignored");
            return false;
        }
        if !previous_filled {
            warn!(stage = stage.number(), "out-of-order stage result ignored");
            return false;
        }
        true
    }

    pub fn finish(self) -> ReviewOutcome {
        match self.terminal {
            Some(Terminal::Completed) => ReviewOutcome::Completed(self.snapshot),
            Some(Terminal::Failed(message)) => ReviewOutcome::Failed {
                message,
                partial: self.snapshot,
            },
            None => ReviewOutcome::Interrupted(self.snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::protocol::TitleUpdate;

    use super::*;

    fn stage1() -> StreamEvent {
        StreamEvent::Stage1Complete {
            data: vec![Stage1Response {
                model: "academic".to_string(),
                response: "Reference NMC standard 4.2".to_string(),
            }],
        }
    }

    fn stage2() -> StreamEvent {
        StreamEvent::Stage2Complete {
            data: vec![Stage2Ranking {
                ranker: "academic".to_string(),
                ranking: "1. Response A".to_string(),
                parsed_ranking: vec!["Response A".to_string()],
            }],
            metadata: None,
        }
    }

    fn stage3() -> StreamEvent {
        StreamEvent::Stage3Complete {
            data: Stage3Result {
                response: "Approve with edits".to_string(),
                model: None,
            },
        }
    }

    #[test]
    fn in_order_stream_fills_all_three_slots() {
        let mut accumulator = ReviewAccumulator::new();
        let transitions: Vec<ReviewTransition> = [stage1(), stage2(), stage3(), StreamEvent::Complete]
            .into_iter()
            .map(|event| accumulator.apply(event))
            .collect();

        assert_eq!(
            transitions,
            vec![
                ReviewTransition::StageUpdated(ReviewStage::Stage1),
                ReviewTransition::StageUpdated(ReviewStage::Stage2),
                ReviewTransition::StageUpdated(ReviewStage::Stage3),
                ReviewTransition::Completed,
            ]
        );
        let outcome = accumulator.finish();
        assert!(outcome.is_completed());
        assert_eq!(outcome.snapshot().latest_stage(), Some(ReviewStage::Stage3));
    }

    #[test]
    fn out_of_order_stage_is_ignored() {
        let mut accumulator = ReviewAccumulator::new();
        assert_eq!(accumulator.apply(stage2()), ReviewTransition::Ignored);
        assert_eq!(accumulator.apply(stage3()), ReviewTransition::Ignored);
        assert!(accumulator.snapshot().is_empty());
    }

    #[test]
    fn repeated_stage_does_not_overwrite_earlier_result() {
        let mut accumulator = ReviewAccumulator::new();
        accumulator.apply(stage1());
        let replacement = StreamEvent::Stage1Complete { data: Vec::new() };
        assert_eq!(accumulator.apply(replacement), ReviewTransition::Ignored);
        assert_eq!(accumulator.snapshot().stage1.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn error_event_finishes_with_partial_results() {
        let mut accumulator = ReviewAccumulator::new();
        accumulator.apply(stage1());
        let transition = accumulator.apply(StreamEvent::Error {
            message: Some("provider quota exceeded".to_string()),
        });
        assert_eq!(
            transition,
            ReviewTransition::Failed("provider quota exceeded".to_string())
        );
        assert_eq!(accumulator.apply(stage2()), ReviewTransition::Ignored);

        match accumulator.finish() {
            ReviewOutcome::Failed { message, partial } => {
                assert_eq!(message, "provider quota exceeded");
                assert!(partial.stage1.is_some());
                assert!(partial.stage2.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn error_without_message_uses_generic_text() {
        let mut accumulator = ReviewAccumulator::new();
        assert_eq!(
            accumulator.apply(StreamEvent::Error { message: None }),
            ReviewTransition::Failed(UNKNOWN_REVIEW_ERROR.to_string())
        );
    }

    #[test]
    fn missing_terminal_event_is_interrupted() {
        let mut accumulator = ReviewAccumulator::new();
        accumulator.apply(stage1());
        assert!(matches!(
            accumulator.finish(),
            ReviewOutcome::Interrupted(snapshot) if snapshot.stage1.is_some()
        ));
    }

    #[test]
    fn start_events_and_title_are_progress_only() {
        let mut accumulator = ReviewAccumulator::new();
        assert_eq!(
            accumulator.apply(StreamEvent::Stage1Start),
            ReviewTransition::StageStarted(ReviewStage::Stage1)
        );
        assert_eq!(
            accumulator.apply(StreamEvent::TitleComplete {
                data: TitleUpdate {
                    title: "Insulin administration".to_string()
                }
            }),
            ReviewTransition::TitleUpdated("Insulin administration".to_string())
        );
        assert_eq!(accumulator.apply(StreamEvent::Unknown), ReviewTransition::Ignored);
        assert!(accumulator.snapshot().is_empty());
        assert_eq!(accumulator.title(), Some("Insulin administration"));
    }

    #[test]
    fn conversation_review_needs_question_and_answer() {
        let conversation: Conversation = serde_json::from_str(
            r#"{"id":"c1","created_at":"2024-05-01T09:30:00","messages":[
                {"role":"user","content":"Explain insulin administration"},
                {"role":"assistant","stage1":[{"model":"academic","response":"ok"}],"stage3":"Approve"}
            ]}"#,
        )
        .expect("conversation");
        let snapshot = ReviewSnapshot::from_conversation(&conversation).expect("review");
        assert_eq!(snapshot.stage3.map(|s| s.response).as_deref(), Some("Approve"));

        let mut only_question = conversation.clone();
        only_question.messages.truncate(1);
        assert!(ReviewSnapshot::from_conversation(&only_question).is_none());
    }
}
