//! One digest run: fetch every page, extract each in its own way, build the EPUB, commit it
//! and/or mail it, then remove the temporary file whatever happened.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::article::{Article, ExtractionError};
use crate::config::{PageSpec, ToDevice};
use crate::delivery::{DeliveryError, DeliveryRequest, DeviceDelivery};
use crate::fetch::{FetchError, FetchResult, Navigator, PageFetcher, PlainFetch};
use crate::html::HtmlValidator;
use crate::model::{into_sorted, ExtractedFragment, Ordered};
use crate::reader::{BuildError, ReaderFile, ReaderFileBuilder, ReaderFileError};

#[derive(Debug, Error)]
pub enum PipelineError {
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

/// Where the digest goes. At least one of the two is set.
#[derive(Debug, Clone, Default)]
pub struct Destination {
    pub output: Option<PathBuf>,
    pub to_device: Option<ToDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub articles: usize,
    pub saved_to: Option<PathBuf>,
    pub delivered_to: Option<String>,
}

/// Extract every fetched page with its own page spec; fragments come back in input order.
/// Stops at the first page that fails.
pub fn extract_pages(
    pages: &[PageSpec],
    fetched: &FetchResult,
    validator: HtmlValidator,
) -> Result<Vec<ExtractedFragment>, ExtractionError> {
    let mut fragments = Vec::with_capacity(fetched.len());
    for page in fetched.iter() {
        let article = Article::new(page.url.as_str(), page.html.as_str())?.with_validator(validator);
        let fragment = match pages.get(page.order).and_then(PageSpec::selectors) {
            Some(selectors) => article.from_selectors(selectors)?,
            None => article.from_html()?,
        };
        debug!("Extracted {} ({})", page.url, fragment.metadata.title);
        fragments.push(Ordered::new(page.order, fragment));
    }
    Ok(into_sorted(fragments))
}

/// Run the whole digest. The temporary EPUB is removed before this returns.
pub async fn run_digest<N, P, D>(
    pages: &[PageSpec],
    destination: &Destination,
    fetcher: PageFetcher<N, P>,
    builder: &ReaderFileBuilder,
    validator: HtmlValidator,
    delivery: &D,
    on_fetched: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<Report, PipelineError>
where
    N: Navigator,
    P: PlainFetch,
    D: DeviceDelivery,
{
    let urls: Vec<String> = pages.iter().map(|p| p.url().to_string()).collect();
    let fetched = fetcher.fetch(&urls, on_fetched).await?;
    let fragments = extract_pages(pages, &fetched, validator)?;
    let mut file = builder.build(&fragments)?;
    let result = deliver_file(&file, destination, delivery).await;
    file.cleanup();
    let mut report = result?;
    report.articles = fragments.len();
    Ok(report)
}

async fn deliver_file<D: DeviceDelivery>(
    file: &ReaderFile,
    destination: &Destination,
    delivery: &D,
) -> Result<Report, PipelineError> {
    let mut report = Report::default();
    if let Some(output) = &destination.output {
        commit(file, output)?;
        report.saved_to = Some(output.clone());
    }
    if let Some(device) = &destination.to_device {
        let request = DeliveryRequest::new(device, file.file_name()?, file.bytes()?);
        delivery.deliver(&request).await?;
        report.delivered_to = Some(device.device_email.clone());
    }
    Ok(report)
}

fn commit(file: &ReaderFile, output: &Path) -> Result<(), ReaderFileError> {
    let bytes = file.save(output)?;
    info!("Saved {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResolvedSelector, SelectMode};
    use crate::fetch::{FetchOptions, Navigation, PageFailure};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::Mutex;

    struct StaticNavigator(HashMap<String, String>);

    #[async_trait]
    impl Navigator for StaticNavigator {
        async fn navigate(&self, url: &str) -> Result<Navigation, PageFailure> {
            self.0
                .get(url)
                .map(|html| Navigation {
                    status: 200,
                    redirected: false,
                    html: html.clone(),
                })
                .ok_or(PageFailure::Status(404))
        }
    }

    struct NoFallback;

    #[async_trait]
    impl PlainFetch for NoFallback {
        async fn get(&self, _url: &str) -> Result<String, PageFailure> {
            Err(PageFailure::Network("no fallback in tests".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingDelivery {
        sent: Mutex<Vec<DeliveryRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl DeviceDelivery for RecordingDelivery {
        async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
            if self.fail {
                let source = "nobody".parse::<lettre::Address>().unwrap_err();
                return Err(DeliveryError::Address {
                    address: request.device_email.clone(),
                    source,
                });
            }
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    const ARTICLE_PAGE: &str = "<!DOCTYPE html><html><head><title>Auto page</title></head>\
        <body><nav>menu</nav><article><h1>Auto</h1><p>Body.</p></article></body></html>";
    const DOCS_PAGE: &str = "<!DOCTYPE html><html><head><title>Docs page</title></head>\
        <body><main><h2>Intro</h2><p>one</p><p>two</p></main></body></html>";

    fn pages() -> Vec<PageSpec> {
        vec![
            PageSpec::WithSelectors {
                url: "https://docs.test/".to_string(),
                selectors: vec![ResolvedSelector {
                    name: Some("Paragraphs".to_string()),
                    mode: SelectMode::All,
                    query: "main p".to_string(),
                }],
            },
            PageSpec::Url("https://news.test/".to_string()),
        ]
    }

    fn fetcher() -> PageFetcher<StaticNavigator, NoFallback> {
        let mut site = HashMap::new();
        site.insert("https://news.test/".to_string(), ARTICLE_PAGE.to_string());
        site.insert("https://docs.test/".to_string(), DOCS_PAGE.to_string());
        PageFetcher::new(StaticNavigator(site), NoFallback, FetchOptions::default())
    }

    fn device() -> ToDevice {
        ToDevice {
            device_email: "reader@kindle.com".to_string(),
            sender_email: "me@example.com".to_string(),
            sender_password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn saves_digest_in_configured_order() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let output = out.path().join("digest.epub");
        let destination = Destination {
            output: Some(output.clone()),
            to_device: None,
        };
        let report = run_digest(
            &pages(),
            &destination,
            fetcher(),
            &ReaderFileBuilder::new(),
            HtmlValidator::default(),
            &RecordingDelivery::default(),
            None,
        )
        .await?;
        assert_eq!(report.articles, 2);
        assert_eq!(report.saved_to.as_deref(), Some(output.as_path()));
        let mut zip = zip::ZipArchive::new(std::fs::File::open(&output)?)?;
        let mut nav = String::new();
        zip.by_name("OEBPS/nav.xhtml")?.read_to_string(&mut nav)?;
        let docs = nav.find("Docs page").unwrap();
        let auto = nav.find("Auto page").unwrap();
        assert!(docs < auto);
        Ok(())
    }

    #[tokio::test]
    async fn delivers_with_dated_attachment() -> anyhow::Result<()> {
        let delivery = RecordingDelivery::default();
        let destination = Destination {
            output: None,
            to_device: Some(device()),
        };
        let report = run_digest(
            &pages(),
            &destination,
            fetcher(),
            &ReaderFileBuilder::new(),
            HtmlValidator::default(),
            &delivery,
            None,
        )
        .await?;
        assert_eq!(report.delivered_to.as_deref(), Some("reader@kindle.com"));
        let sent = delivery.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].attachment_name.ends_with(" news.epub"));
        assert!(sent[0].epub.starts_with(b"PK"));
        Ok(())
    }

    #[tokio::test]
    async fn failed_delivery_keeps_committed_file() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let output = out.path().join("digest.epub");
        let destination = Destination {
            output: Some(output.clone()),
            to_device: Some(device()),
        };
        let delivery = RecordingDelivery {
            fail: true,
            ..RecordingDelivery::default()
        };
        let err = run_digest(
            &pages(),
            &destination,
            fetcher(),
            &ReaderFileBuilder::new(),
            HtmlValidator::default(),
            &delivery,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Delivery(_)));
        assert!(output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn extraction_failure_writes_nothing() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let output = out.path().join("digest.epub");
        let mut specs = pages();
        specs[0] = PageSpec::WithSelectors {
            url: "https://docs.test/".to_string(),
            selectors: vec![ResolvedSelector {
                name: None,
                mode: SelectMode::First,
                query: ".missing".to_string(),
            }],
        };
        let destination = Destination {
            output: Some(output.clone()),
            to_device: None,
        };
        let err = run_digest(
            &specs,
            &destination,
            fetcher(),
            &ReaderFileBuilder::new(),
            HtmlValidator::default(),
            &RecordingDelivery::default(),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "https://docs.test/ -> [0]: Didn't find any elements matching query."
        );
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn existing_output_is_not_overwritten() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let output = out.path().join("digest.epub");
        std::fs::write(&output, b"keep me")?;
        let destination = Destination {
            output: Some(output.clone()),
            to_device: None,
        };
        let err = run_digest(
            &pages(),
            &destination,
            fetcher(),
            &ReaderFileBuilder::new(),
            HtmlValidator::default(),
            &RecordingDelivery::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Commit(_)));
        assert_eq!(std::fs::read(&output)?, b"keep me");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_urls_use_their_own_selectors() -> anyhow::Result<()> {
        let specs = vec![
            PageSpec::WithSelectors {
                url: "https://docs.test/".to_string(),
                selectors: vec![ResolvedSelector {
                    name: None,
                    mode: SelectMode::First,
                    query: "h2".to_string(),
                }],
            },
            PageSpec::WithSelectors {
                url: "https://docs.test/".to_string(),
                selectors: vec![ResolvedSelector {
                    name: None,
                    mode: SelectMode::All,
                    query: "p".to_string(),
                }],
            },
        ];
        let urls: Vec<String> = specs.iter().map(|p| p.url().to_string()).collect();
        let fetched = fetcher().fetch(&urls, None).await?;
        let fragments = extract_pages(&specs, &fetched, HtmlValidator::default())?;
        assert_eq!(fragments[0].html_snippet, "<div><h2>Intro</h2></div>");
        assert_eq!(
            fragments[1].html_snippet,
            "<div><p>one</p><br>\n<p>two</p></div>"
        );
        Ok(())
    }
}
