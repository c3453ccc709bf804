//! Optional settings file loading. Search order: ./rdrdigest.toml, then
//! $XDG_CONFIG_HOME/rdrdigest/config.toml (or ~/.config/rdrdigest/config.toml).
//!
//! Settings tune how pages are fetched and validated; which pages to fetch lives in the
//! YAML page-set configuration (see [crate::config]).

use serde::Deserialize;
use std::path::PathBuf;

/// Settings file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Settings {
    /// HTTP User-Agent for the plain-HTTP fallback.
    pub user_agent: Option<String>,
    /// Per-page navigation / request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Maximum concurrent browser navigations (default 16).
    pub concurrency: Option<usize>,
    /// Re-fetch pages whose navigation was redirected with plain HTTP (default true).
    pub fallback_on_redirect: Option<bool>,
    /// Mis-nesting parse errors tolerated before HTML counts as invalid (default 1).
    pub max_html_errors: Option<usize>,
    /// Chrome/Chromium binary. If not set, chromiumoxide looks it up.
    pub chrome_executable: Option<PathBuf>,
    /// Include a visible table-of-contents page in the EPUB (default true).
    pub toc_page: Option<bool>,
    /// Include toc.ncx for older readers (default true).
    pub ncx: Option<bool>,
    /// SMTP relay used for device delivery (default smtp.gmail.com).
    pub smtp_host: Option<String>,
}

/// Search order: (1) ./rdrdigest.toml, (2) $XDG_CONFIG_HOME/rdrdigest/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_settings() -> Result<Option<Settings>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("rdrdigest.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("rdrdigest").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read settings {}: {}", path.display(), e))?;
            let settings: Settings = toml::from_str(&s)
                .map_err(|e| format!("Invalid settings {}: {}", path.display(), e))?;
            return Ok(Some(settings));
        }
    }
    Ok(None)
}
