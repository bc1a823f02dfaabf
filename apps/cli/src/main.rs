use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    config::{load_settings, ClientSettings},
    request::build_review_request,
    roles::{NewRole, RoleSet},
    settings::{LlmConfig, SettingsStore, PROVIDERS},
    view::{HistoryEntry, ResultsLayout},
    ClientError, ClientEvent, CouncilClient, LineFraming, ReviewOutcome, ReviewSnapshot,
};
use shared::domain::ConversationId;
use storage::{KeyValueStore, LocalStorage, MemoryStorage};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "council", about = "Submit teaching content to the nursing education council")]
struct Cli {
    /// Backend origin, e.g. http://localhost:8001
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// URL the web front end is served from; used to derive the backend origin
    #[arg(long, global = true)]
    page_url: Option<String>,
    #[arg(long, global = true)]
    storage_url: Option<String>,
    /// Stream line framing: buffered or per_chunk
    #[arg(long, global = true)]
    framing: Option<LineFraming>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a council review over some content
    Review(ReviewArgs),
    /// List past reviews
    History,
    /// Show the review stored in a conversation
    Show {
        id: String,
        #[arg(long)]
        show_rankings: bool,
        /// Print the raw conversation JSON
        #[arg(long)]
        json: bool,
    },
    /// List the built-in council roles
    Roles,
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Download a conversation as a PDF report
    Export {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check that the backend is reachable
    Health,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    content: Option<String>,
    /// Read the content from a file instead
    #[arg(long, conflicts_with = "content")]
    file: Option<PathBuf>,
    /// Extra reviewer: "Name|Focus description" or "Name|Focus description|icon"
    #[arg(long = "role")]
    roles: Vec<String>,
    #[arg(long)]
    show_rankings: bool,
    /// Wait for the finished review instead of streaming stage progress
    #[arg(long)]
    no_stream: bool,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print connection settings and the saved LLM provider
    Show,
    /// Save LLM provider settings
    Set {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Forget the saved LLM provider settings
    Clear,
    /// List supported providers and models
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let settings = apply_overrides(load_settings(), &cli);
    let client = CouncilClient::from_settings(&settings);

    match cli.command {
        Command::Review(args) => review(&client, &settings, args).await,
        Command::History => history(&client).await,
        Command::Show {
            id,
            show_rankings,
            json,
        } => show(&client, &id, show_rankings, json).await,
        Command::Roles => {
            print_roles(&RoleSet::with_builtins());
            Ok(())
        }
        Command::Settings(command) => settings_command(&settings, command).await,
        Command::Export { id, out } => export(&client, &id, out).await,
        Command::Health => health(&client, &settings).await,
    }
}

async fn health(client: &CouncilClient, settings: &ClientSettings) -> Result<()> {
    let health = client.health().await?;
    println!(
        "{} {} ({})",
        client.api_base(),
        health.status,
        health.service.unwrap_or_else(|| "unknown service".to_string())
    );
    let storage = LocalStorage::new(&settings.storage_url).await?;
    storage.health_check().await?;
    println!("{} ok", settings.storage_url);
    Ok(())
}

fn apply_overrides(mut settings: ClientSettings, cli: &Cli) -> ClientSettings {
    if let Some(api_base) = &cli.api_base {
        settings.api_base = Some(api_base.clone());
    }
    if let Some(page_url) = &cli.page_url {
        settings.page_url = Some(page_url.clone());
    }
    if let Some(storage_url) = &cli.storage_url {
        settings.storage_url = storage_url.clone();
    }
    if let Some(framing) = cli.framing {
        settings.stream_framing = framing;
    }
    settings
}

async fn open_store(settings: &ClientSettings) -> Arc<dyn KeyValueStore> {
    match LocalStorage::new(&settings.storage_url).await {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            warn!(error = %err, "local storage unavailable; settings will not persist");
            Arc::new(MemoryStorage::new())
        }
    }
}

fn parse_role(raw: &str) -> Result<NewRole> {
    let mut parts = raw.splitn(3, '|').map(str::trim);
    let name = parts.next().unwrap_or_default();
    let description = parts
        .next()
        .ok_or_else(|| anyhow!("role '{raw}' needs the form \"Name|Focus description\""))?;
    let role = NewRole::new(name, description);
    Ok(match parts.next().filter(|icon| !icon.is_empty()) {
        Some(icon) => role.with_icon(icon),
        None => role,
    })
}

async fn review(client: &Arc<CouncilClient>, settings: &ClientSettings, args: ReviewArgs) -> Result<()> {
    let content = match (&args.content, &args.file) {
        (_, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?,
        (Some(content), None) => content.clone(),
        (None, None) => bail!("pass the content to review or --file PATH"),
    };

    let mut roles = RoleSet::with_builtins();
    for raw in &args.roles {
        roles.add_custom(parse_role(raw)?)?;
    }

    let store = open_store(settings).await;
    let llm_config = SettingsStore::new(store).saved().await?;
    let request = build_review_request(&content, &roles, llm_config.as_ref())?;

    if args.no_stream {
        let conversation = client.create_conversation().await?;
        println!("Waiting for the council ({} reviewers)...", roles.len());
        let response = client.send_message(&conversation.id, &request).await?;
        let layout =
            results_layout(&ReviewSnapshot::from(response), &roles, args.show_rankings);
        println!("Conversation: {}\n", conversation.id);
        print!("{}", layout.render_text());
        return Ok(());
    }

    println!("Convening the council ({} reviewers)...", roles.len());
    let mut events = client.subscribe_events();
    let mut run = tokio::spawn({
        let client = Arc::clone(client);
        async move { client.submit_review(request).await }
    });

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Ok(event) = events.recv() => print_progress(&event),
        }
    };
    while let Ok(event) = events.try_recv() {
        print_progress(&event);
    }
    let run = result.context("review task failed")??;

    let layout = results_layout(run.outcome.snapshot(), &roles, args.show_rankings);

    match &run.outcome {
        ReviewOutcome::Completed(_) => {
            println!();
            println!("✅ Review Complete: {}", run.title.as_deref().unwrap_or("Council Feedback"));
            println!("Conversation: {}\n", run.conversation_id);
            print!("{}", layout.render_text());
            Ok(())
        }
        ReviewOutcome::Failed { message, .. } => {
            if !layout.is_empty() {
                print!("{}", layout.render_text());
            }
            Err(anyhow!("the council reported an error: {message}"))
        }
        ReviewOutcome::Interrupted(_) => {
            if !layout.is_empty() {
                print!("{}", layout.render_text());
            }
            Err(anyhow!(
                "the review stream ended before the council finished (conversation {})",
                run.conversation_id
            ))
        }
    }
}

fn results_layout(review: &ReviewSnapshot, roles: &RoleSet, show_rankings: bool) -> ResultsLayout {
    let mut layout = ResultsLayout::from_snapshot(review, roles);
    if show_rankings {
        layout.expand_rankings();
    }
    layout
}

fn print_progress(event: &ClientEvent) {
    match event {
        ClientEvent::StageStarted { stage, .. } => {
            println!("  ⏳ stage {}: {}...", stage.number(), stage.label());
        }
        ClientEvent::ReviewUpdated { stage, .. } => {
            println!("  ✔ stage {} complete", stage.number());
        }
        ClientEvent::TitleUpdated { title, .. } => println!("  📝 {title}"),
        _ => {}
    }
}

async fn history(client: &CouncilClient) -> Result<()> {
    let conversations = client.list_conversations().await?;
    if conversations.is_empty() {
        println!("📋 No reviews yet. Submit your first content for review!");
        return Ok(());
    }
    for summary in &conversations {
        let entry = HistoryEntry::from_summary(summary);
        println!("{}  {}\n    {}", entry.id, entry.title, entry.meta_line());
    }
    Ok(())
}

async fn show(client: &CouncilClient, id: &str, show_rankings: bool, json: bool) -> Result<()> {
    let opened = match client.open_conversation(&ConversationId::from(id)).await {
        Ok(opened) => opened,
        Err(err)
            if err
                .downcast_ref::<ClientError>()
                .is_some_and(ClientError::is_not_found) =>
        {
            bail!("no review with id '{id}'; see `council history`")
        }
        Err(err) => return Err(err),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&opened.conversation)?);
        return Ok(());
    }
    println!("{}\n", opened.conversation.title);
    let Some(review) = opened.review else {
        println!("This conversation has no council review yet.");
        return Ok(());
    };
    let layout = results_layout(&review, &RoleSet::with_builtins(), show_rankings);
    print!("{}", layout.render_text());
    Ok(())
}

fn print_roles(roles: &RoleSet) {
    for role in roles.roles() {
        println!("{} {} [{}]\n    {}", role.icon, role.name, role.id, role.description);
    }
}

async fn settings_command(settings: &ClientSettings, command: SettingsCommand) -> Result<()> {
    let store = SettingsStore::new(open_store(settings).await);
    match command {
        SettingsCommand::Show => {
            println!("api base:        {}", settings.resolved_api_base());
            println!("local storage:   {}", settings.storage_url);
            println!("stream framing:  {}", settings.stream_framing);
            match store.saved().await? {
                Some(config) => {
                    println!("provider:        {}", config.provider);
                    println!("model:           {}", config.model);
                    println!("api key:         {}", config.masked_key());
                }
                None => println!("provider:        backend default"),
            }
        }
        SettingsCommand::Set {
            provider,
            model,
            api_key,
        } => {
            let mut config = store.load_for_dialog().await?;
            if let Some(provider) = provider {
                if client_core::settings::provider(&provider).is_none() {
                    bail!("unknown provider '{provider}'; see `council settings providers`");
                }
                config.select_provider(&provider);
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(api_key) = api_key {
                config.api_key = api_key;
            }
            store.save(&config).await?;
            println!("Saved {} / {} ({})", config.provider, config.model, config.masked_key());
        }
        SettingsCommand::Clear => {
            if store.clear().await? {
                println!("Cleared saved LLM settings.");
            } else {
                println!("No LLM settings were saved.");
            }
        }
        SettingsCommand::Providers => {
            let default = LlmConfig::default();
            for provider in PROVIDERS {
                let marker = if provider.id == default.provider { " (default)" } else { "" };
                println!("{} [{}]{marker}", provider.name, provider.id);
                for model in provider.models {
                    println!("    {model}");
                }
                println!("    key: {}", provider.key_hint);
            }
        }
    }
    Ok(())
}

async fn export(client: &CouncilClient, id: &str, out: Option<PathBuf>) -> Result<()> {
    let export = client.export_pdf(&ConversationId::from(id)).await?;
    let path = out.unwrap_or_else(|| PathBuf::from(&export.filename));
    fs::write(&path, &export.bytes)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    println!("Saved {} ({} bytes)", path.display(), export.bytes.len());
    Ok(())
}
