//! Page fetching: a browser pass over every distinct URL, then a plain-HTTP pass over
//! pages whose navigation was redirected.
//!
//! Results are keyed by input position, so the order pages are listed in survives the
//! concurrent fetch. A URL listed twice is fetched once and appears at both positions.

mod browser;
mod client;

pub use browser::{BrowserOptions, BrowserPool};
pub use client::{HttpClient, HttpClientBuilder};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default number of concurrent browser navigations.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Why a single page could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFailure {
    Status(u16),
    Timeout(Duration),
    Navigation(String),
    Network(String),
}

impl fmt::Display for PageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageFailure::Status(code) => write!(f, "HTTP status {}", code),
            PageFailure::Timeout(after) => {
                write!(f, "navigation timed out after {}s", after.as_secs())
            }
            PageFailure::Navigation(msg) => write!(f, "navigation failed: {}", msg),
            PageFailure::Network(msg) => write!(f, "request failed: {}", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// One line per failed URL: `url -> message`, in input order.
    #[error("{}", render_failures(.failures))]
    Failed { failures: Vec<(String, PageFailure)> },

    #[error("Could not start browser: {0}")]
    Browser(String),

    #[error("Could not create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

fn render_failures(failures: &[(String, PageFailure)]) -> String {
    failures
        .iter()
        .map(|(url, failure)| format!("{} -> {}", url, failure))
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a browser navigation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Status of the main document response.
    pub status: u16,
    /// The main document was reached through at least one redirect.
    pub redirected: bool,
    pub html: String,
}

/// Renders a page in a headless browser.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<Navigation, PageFailure>;

    /// Release browser resources. Called once, after the last navigation.
    async fn shutdown(&mut self) {}
}

/// Plain GET used for pages the browser pass deferred.
#[async_trait]
pub trait PlainFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, PageFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub concurrency: usize,
    /// Re-fetch redirected navigations with plain HTTP instead of trusting the browser.
    pub fallback_on_redirect: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fallback_on_redirect: true,
        }
    }
}

/// One fetched page at one input position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub order: usize,
    pub url: String,
    pub html: String,
}

/// Fetched pages keyed by input position.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pages: BTreeMap<usize, FetchedPage>,
}

impl FetchResult {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Page at input position `order`.
    pub fn at(&self, order: usize) -> Option<&FetchedPage> {
        self.pages.get(&order)
    }

    /// First page fetched for `url`.
    pub fn by_url(&self, url: &str) -> Option<&FetchedPage> {
        self.pages.values().find(|p| p.url == url)
    }

    /// Pages in input order.
    pub fn iter(&self) -> impl Iterator<Item = &FetchedPage> {
        self.pages.values()
    }

    pub fn into_pages(self) -> Vec<FetchedPage> {
        self.pages.into_values().collect()
    }
}

enum Outcome {
    Ready(String),
    Deferred,
    Failed(PageFailure),
}

/// Fetches a page set once. Consumed by [PageFetcher::fetch] so the browser is always
/// shut down before results are returned.
pub struct PageFetcher<N, P> {
    navigator: N,
    fallback: P,
    options: FetchOptions,
}

impl<N: Navigator, P: PlainFetch> PageFetcher<N, P> {
    pub fn new(navigator: N, fallback: P, options: FetchOptions) -> Self {
        Self {
            navigator,
            fallback,
            options,
        }
    }

    /// Fetch every URL. `on_fetched` fires once per distinct URL as soon as its HTML is
    /// available. Hard failures (non-2xx, navigation errors, timeouts) are collected and
    /// returned together after every navigation has finished; no fallback runs then.
    pub async fn fetch(
        mut self,
        urls: &[String],
        on_fetched: Option<&(dyn Fn(&str) + Sync)>,
    ) -> Result<FetchResult, FetchError> {
        let (distinct, positions) = distinct_urls(urls);
        info!(
            "Fetching {} page(s), {} distinct URL(s)",
            urls.len(),
            distinct.len()
        );

        let outcomes: Vec<(usize, Outcome)> = {
            let navigator = &self.navigator;
            let fallback_on_redirect = self.options.fallback_on_redirect;
            stream::iter(distinct.iter().enumerate())
                .map(|(idx, url)| async move {
                    let outcome = match navigator.navigate(url).await {
                        Ok(nav) if nav.redirected && fallback_on_redirect => {
                            debug!("Deferring redirected page to plain HTTP: {}", url);
                            Outcome::Deferred
                        }
                        Ok(nav) if !(200..300).contains(&nav.status) => {
                            Outcome::Failed(PageFailure::Status(nav.status))
                        }
                        Ok(nav) => {
                            if let Some(cb) = on_fetched {
                                cb(url);
                            }
                            Outcome::Ready(nav.html)
                        }
                        Err(failure) => Outcome::Failed(failure),
                    };
                    (idx, outcome)
                })
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await
        };
        self.navigator.shutdown().await;

        let mut html: Vec<Option<String>> = vec![None; distinct.len()];
        let mut deferred = Vec::new();
        let mut failures = Vec::new();
        for (idx, outcome) in outcomes {
            match outcome {
                Outcome::Ready(body) => html[idx] = Some(body),
                Outcome::Deferred => deferred.push(idx),
                Outcome::Failed(failure) => failures.push((idx, failure)),
            }
        }
        if !failures.is_empty() {
            return Err(failed(&distinct, failures));
        }

        if !deferred.is_empty() {
            info!("Re-fetching {} redirected page(s) over plain HTTP", deferred.len());
            let fallback = &self.fallback;
            let refetched = futures::future::join_all(deferred.iter().map(|&idx| {
                let url = &distinct[idx];
                async move { (idx, fallback.get(url).await) }
            }))
            .await;
            for (idx, result) in refetched {
                match result {
                    Ok(body) => {
                        if let Some(cb) = on_fetched {
                            cb(&distinct[idx]);
                        }
                        html[idx] = Some(body);
                    }
                    Err(failure) => failures.push((idx, failure)),
                }
            }
            if !failures.is_empty() {
                return Err(failed(&distinct, failures));
            }
        }

        let mut pages = BTreeMap::new();
        for (order, url) in urls.iter().enumerate() {
            let idx = positions[order];
            let body = html[idx].clone().ok_or_else(|| FetchError::Failed {
                failures: vec![(
                    url.clone(),
                    PageFailure::Navigation("no content recorded".to_string()),
                )],
            })?;
            pages.insert(
                order,
                FetchedPage {
                    order,
                    url: url.clone(),
                    html: body,
                },
            );
        }
        Ok(FetchResult { pages })
    }
}

/// Distinct URLs in first-seen order, plus the distinct index of every input position.
fn distinct_urls(urls: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut distinct: Vec<String> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut positions = Vec::with_capacity(urls.len());
    for url in urls {
        let idx = *seen.entry(url.as_str()).or_insert_with(|| {
            distinct.push(url.clone());
            distinct.len() - 1
        });
        positions.push(idx);
    }
    (distinct, positions)
}

fn failed(distinct: &[String], mut failures: Vec<(usize, PageFailure)>) -> FetchError {
    failures.sort_by_key(|(idx, _)| *idx);
    for (idx, failure) in &failures {
        warn!("{} -> {}", distinct[*idx], failure);
    }
    FetchError::Failed {
        failures: failures
            .into_iter()
            .map(|(idx, failure)| (distinct[idx].clone(), failure))
            .collect(),
    }
}
