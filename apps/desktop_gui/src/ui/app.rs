use client_core::{
    roles::CUSTOM_ROLE_ICONS,
    settings::{provider, PROVIDERS},
    view::{HistoryEntry, ResultCard, ResultsSection, PERSPECTIVES_HEADING, RANKINGS_HEADING},
};
use crossbeam_channel::{Receiver, Sender};
use eframe::egui;
use shared::domain::{ConversationId, Role, RoleId};

use crate::{
    backend_bridge::commands::BackendCommand,
    controller::{
        events::{UiError, UiErrorContext, UiEvent},
        orchestration::dispatch_backend_command,
        reducer::{AppState, CouncilView, Tab},
    },
};

const ACCENT: egui::Color32 = egui::Color32::from_rgb(14, 116, 144);
const CARD_FILL: egui::Color32 = egui::Color32::from_rgb(40, 44, 52);
const SYNTHESIS_FILL: egui::Color32 = egui::Color32::from_rgb(22, 63, 74);

pub struct CouncilApp {
    cmd_tx: Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,
    state: AppState,
}

impl CouncilApp {
    pub fn new(cmd_tx: Sender<BackendCommand>, ui_rx: Receiver<UiEvent>) -> Self {
        Self {
            cmd_tx,
            ui_rx,
            state: AppState::default(),
        }
    }

    fn process_ui_events(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            self.state.apply(event);
        }
    }

    fn dispatch(&mut self, cmd: BackendCommand, context: UiErrorContext) {
        if let Some(status) = dispatch_backend_command(&self.cmd_tx, cmd) {
            self.state
                .apply(UiEvent::Error(UiError::from_message(context, status)));
        }
    }

    fn submit(&mut self) {
        if let Some(cmd) = self.state.submit() {
            self.dispatch(cmd, UiErrorContext::SubmitReview);
        }
    }

    fn show_navbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("navbar")
            .frame(
                egui::Frame::NONE
                    .fill(ctx.style().visuals.panel_fill)
                    .inner_margin(egui::Margin::symmetric(12, 8)),
            )
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(
                        egui::RichText::new("🩺 Nursing Council")
                            .strong()
                            .size(18.0)
                            .color(ACCENT),
                    );
                    ui.add_space(16.0);
                    if ui
                        .selectable_label(self.state.tab == Tab::Council, "Council")
                        .clicked()
                    {
                        self.state.select_tab(Tab::Council);
                    }
                    if ui
                        .selectable_label(self.state.tab == Tab::History, "History")
                        .clicked()
                    {
                        self.state.select_tab(Tab::History);
                        self.dispatch(BackendCommand::RefreshHistory, UiErrorContext::LoadHistory);
                    }
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui
                            .button("⚙")
                            .on_hover_text("AI provider settings")
                            .clicked()
                        {
                            let cmd = self.state.open_settings();
                            self.dispatch(cmd, UiErrorContext::Settings);
                        }
                    });
                });
            });
    }

    fn show_status_strip(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_strip").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if self.state.loading {
                    ui.spinner();
                }
                ui.small(&self.state.status);
            });
        });
    }

    fn show_error_banner(&mut self, ui: &mut egui::Ui) {
        let Some(error) = self.state.error.clone() else {
            return;
        };
        egui::Frame::NONE
            .fill(egui::Color32::from_rgb(111, 53, 53))
            .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(175, 96, 96)))
            .corner_radius(8.0)
            .inner_margin(egui::Margin::symmetric(10, 8))
            .show(ui, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label(egui::RichText::new(error.banner_text()).color(egui::Color32::WHITE))
                        .on_hover_text(error.message());
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("Dismiss").clicked() {
                            self.state.dismiss_error();
                        }
                    });
                });
            });
        ui.add_space(8.0);
    }

    fn show_landing(&mut self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.heading("Nursing Council Review");
            ui.label(
                egui::RichText::new(
                    "Submit teaching material and the council will critique it, rank each other, \
                     and synthesize a final recommendation.",
                )
                .weak(),
            );
        });
        ui.add_space(12.0);

        ui.add_enabled(
            !self.state.loading,
            egui::TextEdit::multiline(&mut self.state.content)
                .hint_text("Paste a lesson plan, handout, or question for review...")
                .desired_rows(10)
                .desired_width(f32::INFINITY),
        );
        ui.add_space(8.0);

        ui.horizontal(|ui| {
            let label = if self.state.loading {
                "Council Reviewing..."
            } else {
                "Submit for Review"
            };
            if ui
                .add_enabled(self.state.can_submit(), egui::Button::new(label).fill(ACCENT))
                .clicked()
            {
                self.submit();
            }
            if let Some(stage) = self.state.active_stage {
                ui.spinner();
                ui.label(format!("Stage {}/3: {}", stage.number(), stage.label()));
            }
        });
        ui.add_space(16.0);

        self.show_role_grid(ui);

        if self.state.loading {
            if let Some(layout) = self.state.results_layout() {
                ui.add_space(16.0);
                ui.separator();
                self.show_sections(ui, &layout.sections);
            }
        }
    }

    fn show_role_grid(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("The Council").strong());
        ui.add_space(4.0);

        let mut removed: Option<RoleId> = None;
        ui.horizontal_wrapped(|ui| {
            for role in self.state.roles.roles() {
                let color = role_color(role);
                egui::Frame::NONE
                    .fill(CARD_FILL)
                    .stroke(egui::Stroke::new(1.0, color))
                    .corner_radius(8.0)
                    .inner_margin(egui::Margin::symmetric(10, 8))
                    .show(ui, |ui| {
                        ui.set_width(200.0);
                        ui.horizontal(|ui| {
                            ui.label(egui::RichText::new(&role.icon).size(20.0));
                            ui.label(egui::RichText::new(&role.name).strong().color(color));
                            if role.is_custom {
                                ui.with_layout(
                                    egui::Layout::right_to_left(egui::Align::Center),
                                    |ui| {
                                        let remove = ui.add_enabled(
                                            !self.state.loading,
                                            egui::Button::new("✕").small(),
                                        );
                                        if remove.on_hover_text("Remove role").clicked() {
                                            removed = Some(role.id.clone());
                                        }
                                    },
                                );
                            }
                        });
                        ui.small(&role.description);
                    });
            }

            if ui
                .add_enabled(!self.state.loading, egui::Button::new("+ Add Role"))
                .clicked()
            {
                self.state.open_add_role();
            }
        });

        if let Some(id) = removed {
            self.state.remove_role(&id);
        }
    }

    fn show_results(&mut self, ui: &mut egui::Ui) {
        let Some(layout) = self.state.results_layout() else {
            self.state.new_review();
            return;
        };

        ui.horizontal(|ui| {
            ui.heading(
                self.state
                    .review_title
                    .as_deref()
                    .unwrap_or("Council Review"),
            );
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let export_target = self.state.conversation_id.clone();
                if ui
                    .add_enabled(export_target.is_some(), egui::Button::new("Export PDF"))
                    .clicked()
                {
                    if let Some(conversation_id) = export_target {
                        self.state.status = "Exporting PDF...".to_string();
                        self.dispatch(
                            BackendCommand::ExportPdf(conversation_id),
                            UiErrorContext::Export,
                        );
                    }
                }
                if ui.button("New Review").clicked() {
                    self.state.new_review();
                }
            });
        });
        ui.add_space(8.0);

        self.show_sections(ui, &layout.sections);
    }

    fn show_sections(&mut self, ui: &mut egui::Ui, sections: &[ResultsSection]) {
        for section in sections {
            match section {
                ResultsSection::Synthesis(card) => {
                    show_card(ui, card, SYNTHESIS_FILL, Some("Final synthesis"));
                }
                ResultsSection::Perspectives(cards) => {
                    ui.add_space(8.0);
                    ui.label(egui::RichText::new(PERSPECTIVES_HEADING).strong().size(16.0));
                    for card in cards {
                        show_card(ui, card, CARD_FILL, None);
                    }
                }
                ResultsSection::Rankings {
                    cards,
                    aggregate,
                    expanded,
                } => {
                    ui.add_space(8.0);
                    let arrow = if *expanded { "▾" } else { "▸" };
                    if ui
                        .button(format!("{arrow} {RANKINGS_HEADING} ({})", cards.len()))
                        .clicked()
                    {
                        self.state.rankings_expanded = !expanded;
                    }
                    if !expanded {
                        continue;
                    }
                    for card in cards {
                        show_card(ui, card, CARD_FILL, None);
                    }
                    if !aggregate.is_empty() {
                        ui.add_space(4.0);
                        ui.label(egui::RichText::new("Aggregate ranking").strong());
                        egui::Grid::new("aggregate_rankings")
                            .striped(true)
                            .show(ui, |ui| {
                                for (position, entry) in aggregate.iter().enumerate() {
                                    ui.label(format!("{}.", position + 1));
                                    ui.label(self.state.roles.display_name(&entry.model));
                                    ui.label(format!("avg {:.2}", entry.average_rank));
                                    ui.label(format!("{} votes", entry.rankings_count));
                                    ui.end_row();
                                }
                            });
                    }
                }
            }
        }
    }

    fn show_history(&mut self, ui: &mut egui::Ui) {
        ui.heading("Review History");
        ui.add_space(8.0);

        if self.state.history.is_empty() {
            ui.label(egui::RichText::new("No reviews yet.").weak());
            return;
        }

        let entries: Vec<HistoryEntry> = self
            .state
            .history
            .iter()
            .map(HistoryEntry::from_summary)
            .collect();
        let mut opened: Option<ConversationId> = None;
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for entry in &entries {
                    let response = egui::Frame::NONE
                        .fill(CARD_FILL)
                        .corner_radius(6.0)
                        .inner_margin(egui::Margin::symmetric(10, 8))
                        .show(ui, |ui| {
                            ui.set_width(ui.available_width());
                            ui.label(egui::RichText::new(&entry.title).strong());
                            ui.small(entry.meta_line());
                        })
                        .response
                        .interact(egui::Sense::click())
                        .on_hover_cursor(egui::CursorIcon::PointingHand);
                    if response.clicked() {
                        opened = Some(ConversationId::from(entry.id.clone()));
                    }
                    ui.add_space(4.0);
                }
            });

        if let Some(conversation_id) = opened {
            self.state.status = "Opening review...".to_string();
            self.dispatch(
                BackendCommand::OpenConversation(conversation_id),
                UiErrorContext::OpenConversation,
            );
        }
    }

    fn show_add_role_window(&mut self, ctx: &egui::Context) {
        let Some(mut draft) = self.state.add_role.clone() else {
            return;
        };
        let mut open = true;
        let mut confirm = false;
        let mut cancel = false;

        egui::Window::new("Add Custom Role")
            .open(&mut open)
            .resizable(false)
            .collapsible(false)
            .show(ctx, |ui| {
                ui.label("Icon");
                ui.horizontal_wrapped(|ui| {
                    for icon in CUSTOM_ROLE_ICONS {
                        ui.selectable_value(
                            &mut draft.icon,
                            icon.to_string(),
                            egui::RichText::new(icon).size(18.0),
                        );
                    }
                });
                ui.add_space(6.0);
                ui.label("Name");
                ui.add(
                    egui::TextEdit::singleline(&mut draft.name)
                        .hint_text("e.g. The Policy Expert"),
                );
                ui.label("Focus");
                ui.add(
                    egui::TextEdit::multiline(&mut draft.description)
                        .hint_text("What should this role look for?")
                        .desired_rows(3),
                );
                if let Some(message) = &self.state.add_role_error {
                    ui.colored_label(egui::Color32::from_rgb(220, 120, 120), message);
                }
                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    let complete =
                        !draft.name.trim().is_empty() && !draft.description.trim().is_empty();
                    if ui.add_enabled(complete, egui::Button::new("Add")).clicked() {
                        confirm = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                });
            });

        self.state.add_role = Some(draft);
        if confirm {
            self.state.confirm_add_role();
        } else if cancel || !open {
            self.state.close_add_role();
        }
    }

    fn show_settings_window(&mut self, ctx: &egui::Context) {
        let Some(mut draft) = self.state.settings.clone() else {
            return;
        };
        let mut open = true;
        let mut save = false;
        let mut cancel = false;

        egui::Window::new("AI Settings")
            .open(&mut open)
            .resizable(false)
            .collapsible(false)
            .show(ctx, |ui| {
                let mut provider_id = draft.config.provider.clone();
                let current = provider(&provider_id)
                    .map(|info| info.name)
                    .unwrap_or(provider_id.as_str())
                    .to_string();
                ui.label("Provider");
                egui::ComboBox::from_id_salt("llm_provider")
                    .selected_text(current)
                    .show_ui(ui, |ui| {
                        for info in PROVIDERS.iter() {
                            ui.selectable_value(&mut provider_id, info.id.to_string(), info.name);
                        }
                    });
                draft.config.select_provider(&provider_id);

                ui.label("Model");
                let models = draft
                    .config
                    .provider_info()
                    .map(|info| info.models)
                    .unwrap_or_default();
                egui::ComboBox::from_id_salt("llm_model")
                    .selected_text(draft.config.model.clone())
                    .show_ui(ui, |ui| {
                        for model in models {
                            ui.selectable_value(&mut draft.config.model, model.to_string(), *model);
                        }
                    });

                ui.label("API key");
                let hint = draft
                    .config
                    .provider_info()
                    .map(|info| info.key_hint)
                    .unwrap_or_default();
                ui.horizontal(|ui| {
                    ui.add(
                        egui::TextEdit::singleline(&mut draft.config.api_key)
                            .password(!draft.show_key)
                            .hint_text(hint),
                    );
                    ui.checkbox(&mut draft.show_key, "Show");
                });
                ui.small(format!("Saved key: {}", draft.config.masked_key()));
                ui.small("Keys are stored on this computer only.");

                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    if ui.button("Save").clicked() {
                        save = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                });
            });

        self.state.settings = Some(draft);
        if save {
            if let Some(cmd) = self.state.save_settings() {
                self.dispatch(cmd, UiErrorContext::Settings);
            }
        } else if cancel || !open {
            self.state.close_settings();
        }
    }
}

impl eframe::App for CouncilApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_ui_events();

        self.show_navbar(ctx);
        self.show_status_strip(ctx);
        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_error_banner(ui);
            match self.state.tab {
                Tab::History => self.show_history(ui),
                Tab::Council => {
                    egui::ScrollArea::vertical()
                        .auto_shrink([false, false])
                        .show(ui, |ui| match self.state.view {
                            CouncilView::Landing => self.show_landing(ui),
                            CouncilView::Results => self.show_results(ui),
                        });
                }
            }
        });
        self.show_add_role_window(ctx);
        self.show_settings_window(ctx);

        if self.state.loading {
            ctx.request_repaint_after(std::time::Duration::from_millis(16));
        } else {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}

fn show_card(ui: &mut egui::Ui, card: &ResultCard, fill: egui::Color32, badge: Option<&str>) {
    egui::Frame::NONE
        .fill(fill)
        .corner_radius(8.0)
        .inner_margin(egui::Margin::symmetric(12, 10))
        .show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.horizontal(|ui| {
                ui.label(egui::RichText::new(&card.heading).strong().size(15.0));
                if let Some(badge) = badge {
                    ui.label(egui::RichText::new(badge).small().weak());
                }
            });
            ui.add_space(4.0);
            ui.label(&card.body);
        });
    ui.add_space(6.0);
}

fn role_color(role: &Role) -> egui::Color32 {
    egui::Color32::from_hex(&role.color).unwrap_or(ACCENT)
}
