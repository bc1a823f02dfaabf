use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use url::Url;

use crate::sse::LineFraming;

pub const DEFAULT_API_BASE: &str = "http://localhost:8001";
pub const CONFIG_FILE_NAME: &str = "council.toml";
const BACKEND_PORT: &str = "8001";
const DEV_FRONTEND_PORT: &str = "5173";
const CODESPACES_SUFFIX: &str = ".app.github.dev";
const SAME_ORIGIN_DOMAINS: [&str; 2] = ["azurecontainerapps.io", "hf.space"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Explicit backend origin. Takes precedence over `page_url`.
    pub api_base: Option<String>,
    /// Where the front end is served from, used to derive the backend origin.
    pub page_url: Option<String>,
    pub storage_url: String,
    pub stream_framing: LineFraming,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: None,
            page_url: None,
            storage_url: default_storage_url(),
            stream_framing: LineFraming::default(),
        }
    }
}

impl ClientSettings {
    pub fn resolved_api_base(&self) -> String {
        if let Some(api_base) = self.api_base.as_deref().filter(|v| !v.trim().is_empty()) {
            return api_base.trim().trim_end_matches('/').to_string();
        }
        match self.page_url.as_deref() {
            Some(page_url) => api_base_for_page(page_url),
            None => DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Loads `council.toml` from the working directory, then applies environment overrides.
pub fn load_settings() -> ClientSettings {
    load_settings_with_file(Path::new(CONFIG_FILE_NAME))
}

pub fn load_settings_with_file(path: &Path) -> ClientSettings {
    let file_contents = match fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no client config file");
            None
        }
    };
    load_settings_from(file_contents.as_deref(), |name| std::env::var(name).ok())
}

pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Some(raw) = file_contents {
        match toml::from_str::<HashMap<String, String>>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.get("api_base") {
                    settings.api_base = Some(v.clone());
                }
                if let Some(v) = file_cfg.get("page_url") {
                    settings.page_url = Some(v.clone());
                }
                if let Some(v) = file_cfg.get("storage_url") {
                    settings.storage_url = v.clone();
                }
                if let Some(v) = file_cfg.get("stream_framing") {
                    apply_framing(&mut settings, v);
                }
            }
            Err(err) => warn!(error = %err, "ignoring unreadable {CONFIG_FILE_NAME}"),
        }
    }

    if let Some(v) = env("COUNCIL_API_BASE") {
        settings.api_base = Some(v);
    }
    if let Some(v) = env("APP__API_BASE") {
        settings.api_base = Some(v);
    }

    if let Some(v) = env("COUNCIL_PAGE_URL") {
        settings.page_url = Some(v);
    }

    if let Some(v) = env("COUNCIL_STORAGE_URL") {
        settings.storage_url = v;
    }
    if let Some(v) = env("APP__STORAGE_URL") {
        settings.storage_url = v;
    }

    if let Some(v) = env("COUNCIL_STREAM_FRAMING") {
        apply_framing(&mut settings, &v);
    }

    settings
}

fn apply_framing(settings: &mut ClientSettings, raw: &str) {
    match raw.parse::<LineFraming>() {
        Ok(framing) => settings.stream_framing = framing,
        Err(err) => warn!(error = %err, "keeping stream framing {}", settings.stream_framing),
    }
}

/// SQLite file under the platform data directory, or in-memory when none exists.
pub fn default_storage_url() -> String {
    match dirs::data_local_dir() {
        Some(dir) => storage::database_url_for_path(
            &dir.join("nursing-council").join("local_storage.db"),
        ),
        None => storage::MEMORY_DATABASE_URL.to_string(),
    }
}

/// Derives the backend origin from the URL the front end is served at.
pub fn api_base_for_page(page_url: &str) -> String {
    let api_base = match Url::parse(page_url.trim()) {
        Ok(page) => api_base_for_parsed_page(&page),
        Err(err) => {
            warn!(page_url, error = %err, "unparseable page url; using local backend");
            None
        }
    }
    .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    debug!(page_url, api_base = %api_base, "resolved backend origin");
    api_base
}

fn api_base_for_parsed_page(page: &Url) -> Option<String> {
    let host = page.host_str()?;
    let authority = match page.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    if host.contains(CODESPACES_SUFFIX) {
        return Some(format!("https://{}", codespaces_backend_host(host)));
    }

    if authority.contains(&format!(":{DEV_FRONTEND_PORT}"))
        || authority.contains(&format!("-{DEV_FRONTEND_PORT}"))
    {
        return Some(format!(
            "{}://{}",
            page.scheme(),
            authority.replace(DEV_FRONTEND_PORT, BACKEND_PORT)
        ));
    }

    if SAME_ORIGIN_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    {
        return Some(page.origin().ascii_serialization());
    }

    None
}

// `<name>-<port>.app.github.dev` becomes `<name>-8001.app.github.dev`.
fn codespaces_backend_host(host: &str) -> String {
    let Some(prefix) = host.strip_suffix(CODESPACES_SUFFIX) else {
        return host.to_string();
    };
    match prefix.rsplit_once('-') {
        Some((name, port))
            if !name.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            format!("{name}-{BACKEND_PORT}{CODESPACES_SUFFIX}")
        }
        _ => host.to_string(),
    }
}

/// Writes a settings file with the given values, creating parent directories.
pub fn write_settings_file(path: &Path, settings: &ClientSettings) -> Result<()> {
    let mut values = HashMap::new();
    if let Some(api_base) = &settings.api_base {
        values.insert("api_base", api_base.clone());
    }
    if let Some(page_url) = &settings.page_url {
        values.insert("page_url", page_url.clone());
    }
    values.insert("storage_url", settings.storage_url.clone());
    values.insert("stream_framing", settings.stream_framing.to_string());

    let raw = toml::to_string(&values).context("failed to encode client settings")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    fs::write(path, raw).with_context(|| format!("failed to write '{}'", path.display()))
}
