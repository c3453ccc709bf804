//! Headless Chrome navigator. One browser process, one tab per navigation.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{FetchError, Navigation, Navigator, PageFailure};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Upper bound for opening a tab, and again for loading and reading the page.
    pub timeout: Duration,
    /// Chrome/Chromium binary. chromiumoxide searches the usual locations when unset.
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            chrome_executable: None,
        }
    }
}

pub struct BrowserPool {
    browser: Browser,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl BrowserPool {
    pub async fn launch(options: &BrowserOptions) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder().request_timeout(options.timeout);
        if let Some(path) = &options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(FetchError::Browser)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
        });
        debug!("Browser launched");
        Ok(Self {
            browser,
            handler,
            timeout: options.timeout,
        })
    }
}

#[async_trait]
impl Navigator for BrowserPool {
    async fn navigate(&self, url: &str) -> Result<Navigation, PageFailure> {
        let page = tokio::time::timeout(self.timeout, self.browser.new_page("about:blank"))
            .await
            .map_err(|_| PageFailure::Timeout(self.timeout))?
            .map_err(|e| PageFailure::Navigation(e.to_string()))?;
        let tab = page.clone();
        let close = async move {
            if let Err(e) = tab.close().await {
                debug!("Could not close tab for {}: {}", url, e);
            }
        };
        visit_then_close(self.timeout, visit(&page, url), close).await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Could not close browser: {}", e);
        }
        self.handler.abort();
        debug!("Browser closed");
    }
}

/// Run `visit` under `limit`, then `close` whether the visit finished, failed or timed out.
async fn visit_then_close<T, V, C>(limit: Duration, visit: V, close: C) -> Result<T, PageFailure>
where
    V: Future<Output = Result<T, PageFailure>>,
    C: Future<Output = ()>,
{
    let result = tokio::time::timeout(limit, visit)
        .await
        .map_err(|_| PageFailure::Timeout(limit))
        .and_then(|visited| visited);
    close.await;
    result
}

async fn visit(page: &Page, url: &str) -> Result<Navigation, PageFailure> {
    page.goto(url)
        .await
        .map_err(|e| PageFailure::Navigation(e.to_string()))?;
    let request = page
        .wait_for_navigation_response()
        .await
        .map_err(|e| PageFailure::Navigation(e.to_string()))?;
    let (status, redirected) = match request.as_deref() {
        Some(req) => (
            req.response.as_ref().map(|r| r.status).unwrap_or(200),
            !req.redirect_chain.is_empty(),
        ),
        None => (200, false),
    };
    let html = page
        .content()
        .await
        .map_err(|e| PageFailure::Navigation(e.to_string()))?;
    Ok(Navigation {
        status: u16::try_from(status).unwrap_or(0),
        redirected,
        html,
    })
}
