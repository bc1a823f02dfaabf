//! Runtime bridge between UI command queue and backend event intake.

use std::{path::PathBuf, sync::Arc, thread};

use anyhow::{Context, Result};
use client_core::{
    config::ClientSettings, request::build_review_request, settings::SettingsStore, ClientEvent,
    CouncilClient, CouncilHandle,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::broadcast::{self, error::RecvError};
use storage::{KeyValueStore, LocalStorage, MemoryStorage};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

#[derive(Clone)]
struct Backend {
    client: Arc<dyn CouncilHandle>,
    settings: SettingsStore,
    export_dir: PathBuf,
    ui_tx: Sender<UiEvent>,
}

pub fn launch(settings: ClientSettings, cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("backend worker startup failure: failed to build runtime: {err}"),
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let store = open_store(&settings).await;
            let client = CouncilClient::from_settings(&settings);
            let backend = Backend {
                client: Arc::new(client),
                settings: SettingsStore::new(store),
                export_dir: dirs::download_dir()
                    .or_else(|| std::env::current_dir().ok())
                    .unwrap_or_default(),
                ui_tx: ui_tx.clone(),
            };

            tokio::spawn(forward_client_events(
                backend.client.subscribe_events(),
                ui_tx.clone(),
            ));

            let _ = ui_tx.try_send(UiEvent::Info(format!(
                "Connected to {}",
                settings.resolved_api_base()
            )));
            for cmd in [BackendCommand::LoadSettings, BackendCommand::RefreshHistory] {
                tokio::spawn(backend.clone().handle(cmd));
            }

            // Blocking receive; spawned commands run on the worker threads.
            while let Ok(cmd) = cmd_rx.recv() {
                tracing::debug!(command = cmd.name(), "backend command received");
                tokio::spawn(backend.clone().handle(cmd));
            }
            tracing::info!("ui command queue closed; backend worker exiting");
        });
    });
}

/// Relays client broadcasts to the UI until either side closes.
async fn forward_client_events(mut events: broadcast::Receiver<ClientEvent>, ui_tx: Sender<UiEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if !forward_to_ui(&ui_tx, UiEvent::from_client(event)).await {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "ui event forwarder lagged behind client events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("client event forwarder stopped");
}

/// Queues an event for the UI thread. A full queue is waited on off the
/// async workers. Returns `false` once the UI has gone away.
async fn forward_to_ui(ui_tx: &Sender<UiEvent>, event: UiEvent) -> bool {
    match ui_tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            let ui_tx = ui_tx.clone();
            matches!(
                tokio::task::spawn_blocking(move || ui_tx.send(event)).await,
                Ok(Ok(()))
            )
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

async fn open_store(settings: &ClientSettings) -> Arc<dyn KeyValueStore> {
    match LocalStorage::new(&settings.storage_url).await {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            tracing::warn!(error = %err, "local storage unavailable; settings kept in memory");
            Arc::new(MemoryStorage::new())
        }
    }
}

impl Backend {
    async fn send(&self, event: UiEvent) {
        forward_to_ui(&self.ui_tx, event).await;
    }

    async fn fail(&self, context: UiErrorContext, err: anyhow::Error) {
        tracing::warn!(?context, error = %format!("{err:#}"), "backend command failed");
        self.send(UiEvent::Error(UiError::from_message(context, format!("{err:#}"))))
            .await;
    }

    async fn handle(self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::LoadSettings => match self.settings.saved().await {
                Ok(config) => self.send(UiEvent::SettingsLoaded(config)).await,
                Err(err) => self.fail(UiErrorContext::Settings, err).await,
            },
            BackendCommand::SaveSettings(config) => match self.settings.save(&config).await {
                Ok(()) => self.send(UiEvent::SettingsSaved(config)).await,
                Err(err) => self.fail(UiErrorContext::Settings, err).await,
            },
            BackendCommand::RefreshHistory => {
                // The listing arrives through the client's event broadcast.
                if let Err(err) = self.client.refresh_conversations().await {
                    self.fail(UiErrorContext::LoadHistory, err).await;
                }
            }
            BackendCommand::SubmitReview { content, roles } => {
                if let Err(err) = self.submit(content, roles).await {
                    self.fail(UiErrorContext::SubmitReview, err).await;
                }
            }
            BackendCommand::OpenConversation(conversation_id) => {
                if let Err(err) = self.client.open_conversation(&conversation_id).await {
                    self.fail(UiErrorContext::OpenConversation, err).await;
                }
            }
            BackendCommand::ExportPdf(conversation_id) => match self.export(conversation_id).await {
                Ok(path) => self.send(UiEvent::PdfExported(path)).await,
                Err(err) => self.fail(UiErrorContext::Export, err).await,
            },
        }
    }

    async fn submit(&self, content: String, roles: client_core::roles::RoleSet) -> Result<()> {
        let llm_config = self.settings.saved().await?;
        let request = build_review_request(&content, &roles, llm_config.as_ref())?;
        // Progress and the outcome are published as client events.
        self.client.submit_review(request).await?;
        Ok(())
    }

    async fn export(&self, conversation_id: shared::domain::ConversationId) -> Result<PathBuf> {
        let export = self.client.export_pdf(&conversation_id).await?;
        let path = self.export_dir.join(&export.filename);
        tokio::fs::write(&path, &export.bytes)
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use client_core::ReviewSnapshot;
    use crossbeam_channel::bounded;

    use super::*;

    fn title(text: &str) -> ClientEvent {
        ClientEvent::TitleUpdated {
            conversation_id: "c1".into(),
            title: text.to_string(),
        }
    }

    #[tokio::test]
    async fn forwarder_keeps_running_after_lagging() {
        let (client_tx, events) = broadcast::channel(2);
        let (ui_tx, ui_rx) = bounded(16);
        for index in 0..4 {
            client_tx.send(title(&format!("t{index}"))).expect("broadcast");
        }

        let forwarder = tokio::spawn(forward_client_events(events, ui_tx));
        client_tx
            .send(ClientEvent::ReviewCompleted {
                conversation_id: "c1".into(),
                review: ReviewSnapshot::default(),
            })
            .expect("broadcast");
        drop(client_tx);
        forwarder.await.expect("forwarder");

        let received: Vec<UiEvent> = ui_rx.try_iter().collect();
        assert!(matches!(received.last(), Some(UiEvent::ReviewCompleted(_))));
        assert!(!received
            .iter()
            .any(|event| matches!(event, UiEvent::TitleUpdated(text) if text == "t0")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_ui_queue_is_waited_on_until_drained() {
        let (ui_tx, ui_rx) = bounded(1);
        ui_tx.try_send(UiEvent::Info("first".into())).expect("fill");
        let drain = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            ui_rx.iter().take(2).count()
        });

        assert!(forward_to_ui(&ui_tx, UiEvent::Info("second".into())).await);
        assert_eq!(drain.join().expect("drain thread"), 2);
    }

    #[tokio::test]
    async fn closed_ui_queue_stops_forwarding() {
        let (ui_tx, ui_rx) = bounded(1);
        drop(ui_rx);
        assert!(!forward_to_ui(&ui_tx, UiEvent::Info("late".into())).await);
    }
}
