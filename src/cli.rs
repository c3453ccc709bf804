//! CLI parsing and orchestration. Resolves pages and destinations from args and the page-set
//! configuration, runs the digest pipeline, and maps errors to exit codes.

use crate::article::ExtractionError;
use crate::config::{self, ConfigurationError, Configuration, PageSpec};
use crate::delivery::{DeliveryError, SmtpDelivery, DEFAULT_SMTP_HOST};
use crate::fetch::{
    BrowserOptions, BrowserPool, FetchError, FetchOptions, HttpClient, PageFetcher,
    DEFAULT_CONCURRENCY,
};
use crate::html::{HtmlValidator, DEFAULT_MAX_SEVERE_ERRORS};
use crate::pipeline::{run_digest, Destination, PipelineError};
use crate::reader::{BuildError, ReaderFileBuilder, ReaderFileError};
use crate::settings::{load_settings, Settings};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./ctr-config.yaml";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Commit(#[from] ReaderFileError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Configuration(_) => 1,
            CliRunError::Fetch(_) | CliRunError::Extraction(_) => 2,
            CliRunError::Build(_) | CliRunError::Commit(_) => 3,
            CliRunError::Delivery(_) => 4,
        }
    }
}

impl From<PipelineError> for CliRunError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Fetch(e) => CliRunError::Fetch(e),
            PipelineError::Extraction(e) => CliRunError::Extraction(e),
            PipelineError::Build(e) => CliRunError::Build(e),
            PipelineError::Commit(e) => CliRunError::Commit(e),
            PipelineError::Delivery(e) => CliRunError::Delivery(e),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rdrdigest")]
#[command(about = "Bundle web pages into one EPUB digest, optionally mailed to a reader device")]
#[command(
    after_help = "Settings keys (user_agent, timeout_secs, concurrency, fallback_on_redirect, max_html_errors, chrome_executable, toc_page, ncx, smtp_host) are read from ./rdrdigest.toml or ~/.config/rdrdigest/config.toml."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress progress output (errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print verbose error chain.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an EPUB from a single URL or from a configuration file.
    Create {
        /// Page URL. Ignored when --config is given.
        url: Option<String>,

        /// Output path. Default: ./content-to-reader-{timestamp}.epub. `output` in the configuration wins.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Page-set configuration file (.yaml).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write an example configuration file.
    GetConfig {
        /// Output filename or path. A .yaml extension is enforced.
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

/// Enforce the `.epub` extension: added when missing, lowercased when `.EPUB`, anything
/// else rejected.
pub fn sanitize_output_path(output: &str) -> Result<PathBuf, ConfigurationError> {
    let path = Path::new(output.trim());
    if path.file_name().is_none() {
        return Err(ConfigurationError::InvalidOutput {
            output: output.to_string(),
            reason: "expected a file name".to_string(),
        });
    }
    match path.extension().map(|e| e.to_string_lossy().to_lowercase()) {
        None => Ok(path.with_extension("epub")),
        Some(ext) if ext == "epub" => Ok(path.with_extension("epub")),
        Some(_) => Err(ConfigurationError::InvalidOutput {
            output: output.to_string(),
            reason: "Only `.epub` extension is accepted. Check your 'output' path.".to_string(),
        }),
    }
}

fn default_output_path(now_millis: i64) -> PathBuf {
    PathBuf::from(format!("./content-to-reader-{}.epub", now_millis))
}

/// Parent must exist and the file must not, so a run never ends with nowhere to save.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    if path.exists() {
        return Err(CliRunError::InvalidInput(format!(
            "Cannot write output: {}: file already exists.",
            path.display()
        )));
    }
    Ok(())
}

/// Pages and destination for one `create` run. The configuration, when present, decides the
/// pages; its `output` wins over `-o`.
fn resolve_job(
    url: Option<&str>,
    output: Option<&Path>,
    config: Option<Configuration>,
    now_millis: i64,
) -> Result<(Vec<PageSpec>, Destination), CliRunError> {
    match config {
        Some(config) => {
            let chosen = config
                .output
                .clone()
                .or_else(|| output.map(|p| p.to_string_lossy().into_owned()));
            let output = chosen.as_deref().map(sanitize_output_path).transpose()?;
            Ok((
                config.pages,
                Destination {
                    output,
                    to_device: config.to_device,
                },
            ))
        }
        None => {
            let url = url.map(str::trim).filter(|u| !u.is_empty()).ok_or_else(|| {
                CliRunError::InvalidInput(
                    "No pages provided. Use a configuration file or pass a single URL as the first argument."
                        .to_string(),
                )
            })?;
            let output = match output {
                Some(p) => sanitize_output_path(&p.to_string_lossy())?,
                None => default_output_path(now_millis),
            };
            Ok((
                vec![PageSpec::Url(url.to_string())],
                Destination {
                    output: Some(output),
                    to_device: None,
                },
            ))
        }
    }
}

fn progress_bar(total: usize) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total as u64);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.set_message("Fetching pages");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub async fn run(args: &Args) -> Result<(), CliRunError> {
    match &args.command {
        Command::GetConfig { path } => get_config(path, args.quiet),
        Command::Create {
            url,
            output,
            config,
        } => create(url.as_deref(), output.as_deref(), config.as_deref(), args.quiet).await,
    }
}

fn get_config(path: &Path, quiet: bool) -> Result<(), CliRunError> {
    let written = config::write_example_config(path).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Cannot write example configuration {}: {}",
            path.display(),
            e
        ))
    })?;
    if !quiet {
        eprintln!("Config file created: {}", written.display());
        eprintln!(
            "Edit it, then run 'rdrdigest create -c {}'",
            written.display()
        );
    }
    Ok(())
}

async fn create(
    url: Option<&str>,
    output: Option<&Path>,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<(), CliRunError> {
    let settings: Settings = load_settings()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();

    let config = config_path.map(config::parse_file).transpose()?;
    if config.is_some() && url.is_some() {
        tracing::warn!("Both a URL and --config given; using the pages from the configuration");
    }
    let (pages, destination) =
        resolve_job(url, output, config, chrono::Utc::now().timestamp_millis())?;
    if let Some(path) = &destination.output {
        validate_output_path(path)?;
    }

    let validator =
        HtmlValidator::new(settings.max_html_errors.unwrap_or(DEFAULT_MAX_SEVERE_ERRORS));
    let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

    let mut client_builder = HttpClient::builder().timeout_secs(timeout.as_secs());
    if let Some(ua) = settings.user_agent.clone() {
        client_builder = client_builder.user_agent(ua);
    }
    let client = client_builder.build().map_err(FetchError::Client)?;

    let browser = BrowserPool::launch(&BrowserOptions {
        timeout,
        chrome_executable: settings.chrome_executable.clone(),
    })
    .await?;
    let fetcher = PageFetcher::new(
        browser,
        client,
        FetchOptions {
            concurrency: settings.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            fallback_on_redirect: settings.fallback_on_redirect.unwrap_or(true),
        },
    );
    let builder = ReaderFileBuilder::new()
        .validator(validator)
        .include_toc_page(settings.toc_page.unwrap_or(true))
        .include_ncx(settings.ncx.unwrap_or(true));
    let delivery = SmtpDelivery::new(
        settings
            .smtp_host
            .clone()
            .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
    );

    let distinct: HashSet<&str> = pages.iter().map(PageSpec::url).collect();
    let bar = (!quiet).then(|| progress_bar(distinct.len()));
    let on_fetched = |url: &str| {
        if let Some(bar) = &bar {
            bar.inc(1);
            bar.set_message(format!("Fetched {}", url));
        }
    };

    let result = run_digest(
        &pages,
        &destination,
        fetcher,
        &builder,
        validator,
        &delivery,
        Some(&on_fetched),
    )
    .await;

    if let Some(bar) = &bar {
        bar.disable_steady_tick();
        bar.finish_and_clear();
    }
    let report = result?;

    if !quiet {
        if let Some(path) = &report.saved_to {
            eprintln!("Wrote {} ({} article(s))", path.display(), report.articles);
        }
        if let Some(device) = &report.delivered_to {
            eprintln!("Sent to {}", device);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToDevice;

    fn config(output: Option<&str>, to_device: bool) -> Configuration {
        Configuration {
            output: output.map(str::to_string),
            to_device: to_device.then(|| ToDevice {
                device_email: "reader@kindle.com".to_string(),
                sender_email: "me@example.com".to_string(),
                sender_password: "secret".to_string(),
            }),
            pages: vec![PageSpec::Url("https://a.test/".to_string())],
        }
    }

    #[test]
    fn sanitize_adds_missing_extension() {
        assert_eq!(
            sanitize_output_path("news").unwrap(),
            PathBuf::from("news.epub")
        );
        assert_eq!(
            sanitize_output_path("out/digest").unwrap(),
            PathBuf::from("out/digest.epub")
        );
    }

    #[test]
    fn sanitize_lowercases_epub_extension() {
        assert_eq!(
            sanitize_output_path("News.EPUB").unwrap(),
            PathBuf::from("News.epub")
        );
        assert_eq!(
            sanitize_output_path("news.epub").unwrap(),
            PathBuf::from("news.epub")
        );
    }

    #[test]
    fn sanitize_rejects_other_extensions() {
        let err = sanitize_output_path("news.pdf").unwrap_err();
        assert!(err.to_string().contains("Only `.epub` extension is accepted"));
        assert!(sanitize_output_path("").is_err());
    }

    #[test]
    fn url_mode_defaults_output_path() {
        let (pages, destination) =
            resolve_job(Some("https://a.test/"), None, None, 1_700_000_000_000).unwrap();
        assert_eq!(pages, vec![PageSpec::Url("https://a.test/".to_string())]);
        assert_eq!(
            destination.output,
            Some(PathBuf::from("./content-to-reader-1700000000000.epub"))
        );
        assert!(destination.to_device.is_none());
    }

    #[test]
    fn url_mode_sanitizes_flag_output() {
        let (_, destination) =
            resolve_job(Some("https://a.test/"), Some(Path::new("today")), None, 0).unwrap();
        assert_eq!(destination.output, Some(PathBuf::from("today.epub")));
    }

    #[test]
    fn missing_pages_is_input_error() {
        let err = resolve_job(None, None, None, 0).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().starts_with("No pages provided"));
    }

    #[test]
    fn config_output_wins_over_flag() {
        let (_, destination) = resolve_job(
            None,
            Some(Path::new("flag.epub")),
            Some(config(Some("config.epub"), false)),
            0,
        )
        .unwrap();
        assert_eq!(destination.output, Some(PathBuf::from("config.epub")));
    }

    #[test]
    fn config_without_output_falls_back_to_flag() {
        let (_, destination) = resolve_job(
            None,
            Some(Path::new("flag")),
            Some(config(None, true)),
            0,
        )
        .unwrap();
        assert_eq!(destination.output, Some(PathBuf::from("flag.epub")));
        assert!(destination.to_device.is_some());
    }

    #[test]
    fn device_only_config_writes_no_file() {
        let (_, destination) = resolve_job(None, None, Some(config(None, true)), 0).unwrap();
        assert!(destination.output.is_none());
    }

    #[test]
    fn bad_config_output_is_configuration_error() {
        let err = resolve_job(None, None, Some(config(Some("x.mobi"), false)), 0).unwrap_err();
        assert!(matches!(err, CliRunError::Configuration(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn validate_output_path_parent_missing() {
        let path = PathBuf::from("/nonexistent_dir_rdrdigest_xyz/output.epub");
        let result = validate_output_path(&path);
        assert!(matches!(result, Err(CliRunError::InvalidInput(ref msg)) if msg.contains("parent directory does not exist")));
    }

    #[test]
    fn validate_output_path_rejects_existing_file() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("digest.epub");
        assert!(validate_output_path(&path).is_ok());
        std::fs::write(&path, b"x")?;
        assert!(validate_output_path(&path).is_err());
        Ok(())
    }

    #[test]
    fn get_config_writes_yaml() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        get_config(&dir.path().join("mine.txt"), true).unwrap();
        assert!(dir.path().join("mine.yaml").exists());
        Ok(())
    }

    #[test]
    fn args_parse_subcommands() {
        let args = Args::parse_from(["rdrdigest", "create", "https://a.test/", "-o", "x.epub", "-q"]);
        assert!(args.quiet);
        match args.command {
            Command::Create { url, output, config } => {
                assert_eq!(url.as_deref(), Some("https://a.test/"));
                assert_eq!(output, Some(PathBuf::from("x.epub")));
                assert!(config.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        let args = Args::parse_from(["rdrdigest", "get-config"]);
        match args.command {
            Command::GetConfig { path } => assert_eq!(path, PathBuf::from(DEFAULT_CONFIG_PATH)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Configuration(ConfigurationError::NoDestination).exit_code(),
            1
        );
        assert_eq!(
            CliRunError::Fetch(FetchError::Browser("x".into())).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Extraction(ExtractionError::EmptyHtml).exit_code(),
            2
        );
        assert_eq!(CliRunError::Build(BuildError::NoSnippets).exit_code(), 3);
        assert_eq!(
            CliRunError::Commit(ReaderFileError::Lifecycle {
                path: PathBuf::from("x")
            })
            .exit_code(),
            3
        );
    }
}
