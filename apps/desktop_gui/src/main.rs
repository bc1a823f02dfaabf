mod backend_bridge;
mod controller;
mod ui;

use clap::Parser;
use client_core::{config::load_settings, LineFraming};
use crossbeam_channel::bounded;
use eframe::egui;

use crate::{
    backend_bridge::{commands::BackendCommand, runtime},
    controller::events::UiEvent,
    ui::CouncilApp,
};

#[derive(Parser, Debug)]
#[command(name = "council-desktop", about = "Nursing Council desktop client")]
struct GuiArgs {
    /// Backend origin, e.g. http://localhost:8001
    #[arg(long)]
    api_base: Option<String>,
    /// URL the web front end is served from; used to derive the backend origin
    #[arg(long)]
    page_url: Option<String>,
    #[arg(long)]
    storage_url: Option<String>,
    #[arg(long)]
    framing: Option<LineFraming>,
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = GuiArgs::parse();
    let mut settings = load_settings();
    if let Some(api_base) = args.api_base {
        settings.api_base = Some(api_base);
    }
    if let Some(page_url) = args.page_url {
        settings.page_url = Some(page_url);
    }
    if let Some(storage_url) = args.storage_url {
        settings.storage_url = storage_url;
    }
    if let Some(framing) = args.framing {
        settings.stream_framing = framing;
    }
    tracing::info!(api_base = %settings.resolved_api_base(), "starting desktop client");

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(64);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(1024);
    runtime::launch(settings, cmd_rx, ui_tx);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Nursing Council")
            .with_inner_size([1100.0, 780.0])
            .with_min_inner_size([720.0, 520.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Nursing Council",
        options,
        Box::new(|_cc| Ok(Box::new(CouncilApp::new(cmd_tx, ui_rx)))),
    )
}
