//! Presentation models shared by the terminal and desktop front ends.

use std::fmt::Write as _;

use shared::protocol::{parse_timestamp, AggregateRanking, ConversationSummary};

use crate::{review::ReviewSnapshot, roles::RoleSet};

pub const SYNTHESIS_HEADING: &str = "Head of Nursing Education";
pub const PERSPECTIVES_HEADING: &str = "Individual Perspectives";
pub const RANKINGS_HEADING: &str = "📊 View Peer Rankings";
pub const UNTITLED_REVIEW: &str = "Untitled Review";
const HISTORY_DATE_FORMAT: &str = "%-d %b %Y, %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCard {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultsSection {
    Synthesis(ResultCard),
    Perspectives(Vec<ResultCard>),
    Rankings {
        cards: Vec<ResultCard>,
        aggregate: Vec<AggregateRanking>,
        expanded: bool,
    },
}

/// Result sections in display order: synthesis, perspectives, peer rankings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultsLayout {
    pub sections: Vec<ResultsSection>,
}

impl ResultsLayout {
    pub fn from_snapshot(snapshot: &ReviewSnapshot, roles: &RoleSet) -> Self {
        let mut sections = Vec::new();

        if let Some(stage3) = &snapshot.stage3 {
            sections.push(ResultsSection::Synthesis(ResultCard {
                heading: SYNTHESIS_HEADING.to_string(),
                body: stage3.response.clone(),
            }));
        }

        if let Some(stage1) = snapshot.stage1.as_ref().filter(|items| !items.is_empty()) {
            sections.push(ResultsSection::Perspectives(
                stage1
                    .iter()
                    .map(|item| ResultCard {
                        heading: roles.display_name(&item.model),
                        body: item.response.clone(),
                    })
                    .collect(),
            ));
        }

        if let Some(stage2) = snapshot.stage2.as_ref().filter(|items| !items.is_empty()) {
            sections.push(ResultsSection::Rankings {
                cards: stage2
                    .iter()
                    .map(|item| ResultCard {
                        heading: roles.display_name(&item.ranker),
                        body: item.ranking.clone(),
                    })
                    .collect(),
                aggregate: snapshot
                    .stage2_metadata
                    .as_ref()
                    .map(|metadata| metadata.aggregate_rankings.clone())
                    .unwrap_or_default(),
                expanded: false,
            });
        }

        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn synthesis(&self) -> Option<&ResultCard> {
        self.sections.iter().find_map(|section| match section {
            ResultsSection::Synthesis(card) => Some(card),
            _ => None,
        })
    }

    pub fn perspectives(&self) -> &[ResultCard] {
        self.sections
            .iter()
            .find_map(|section| match section {
                ResultsSection::Perspectives(cards) => Some(cards.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Ranking cards currently visible; empty while the section is collapsed.
    pub fn visible_rankings(&self) -> &[ResultCard] {
        self.sections
            .iter()
            .find_map(|section| match section {
                ResultsSection::Rankings {
                    cards,
                    expanded: true,
                    ..
                } => Some(cards.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn rankings_expanded(&self) -> bool {
        self.sections.iter().any(|section| {
            matches!(
                section,
                ResultsSection::Rankings { expanded: true, .. }
            )
        })
    }

    pub fn set_rankings_expanded(&mut self, value: bool) {
        for section in &mut self.sections {
            if let ResultsSection::Rankings { expanded, .. } = section {
                *expanded = value;
            }
        }
    }

    pub fn expand_rankings(&mut self) {
        self.set_rankings_expanded(true);
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match section {
                ResultsSection::Synthesis(card) => {
                    let _ = writeln!(out, "== {} (Synthesis) ==", card.heading);
                    let _ = writeln!(out, "{}\n", card.body.trim_end());
                }
                ResultsSection::Perspectives(cards) => {
                    let _ = writeln!(out, "== {PERSPECTIVES_HEADING} ==");
                    for card in cards {
                        let _ = writeln!(out, "--- {} ---", card.heading);
                        let _ = writeln!(out, "{}\n", card.body.trim_end());
                    }
                }
                ResultsSection::Rankings {
                    cards,
                    aggregate,
                    expanded,
                } => {
                    if !*expanded {
                        let _ = writeln!(
                            out,
                            "▸ {RANKINGS_HEADING} ({} hidden, use --show-rankings)",
                            cards.len()
                        );
                        continue;
                    }
                    let _ = writeln!(out, "▾ {RANKINGS_HEADING}");
                    for card in cards {
                        let _ = writeln!(out, "--- {} ---", card.heading);
                        let _ = writeln!(out, "{}\n", card.body.trim_end());
                    }
                    if !aggregate.is_empty() {
                        let _ = writeln!(out, "Aggregate ranking:");
                        for (position, entry) in aggregate.iter().enumerate() {
                            let _ = writeln!(
                                out,
                                "  {}. {} (average rank {:.2}, {} votes)",
                                position + 1,
                                entry.model,
                                entry.average_rank,
                                entry.rankings_count
                            );
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub title: String,
    pub date: String,
    pub message_count: usize,
}

impl HistoryEntry {
    pub fn from_summary(summary: &ConversationSummary) -> Self {
        let title = if summary.title.trim().is_empty() {
            UNTITLED_REVIEW.to_string()
        } else {
            summary.title.clone()
        };
        Self {
            id: summary.id.to_string(),
            title,
            date: format_history_date(&summary.created_at),
            message_count: summary.message_count,
        }
    }

    pub fn meta_line(&self) -> String {
        format!("{} • {} messages", self.date, self.message_count)
    }
}

/// `2026-10-17T14:05:09.1` renders as `17 Oct 2026, 14:05`. Unparseable input is shown as-is.
pub fn format_history_date(raw: &str) -> String {
    parse_timestamp(raw)
        .map(|timestamp| timestamp.format(HISTORY_DATE_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}
