//! Pulls the article out of one fetched page: with explicit selectors, or automatically
//! (`<article>` element, then a readability pass).

use scraper::{Html, Selector};
use thiserror::Error;
use tracing::debug;

use crate::config::{ResolvedSelector, SelectMode};
use crate::html::HtmlValidator;
use crate::model::{ExtractedFragment, FragmentMetadata};

/// Separator between selector matches, and between selectors, in a selector-built snippet.
const MATCH_SEPARATOR: &str = "<br>\n";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("You can't build an article off of an empty HTML snippet.")]
    EmptyHtml,

    #[error("{url}: page HTML is too broken to extract an article from.")]
    InvalidHtml { url: String },

    #[error("{url} -> [{label}]: invalid selector {query:?}: {reason}")]
    InvalidSelector {
        url: String,
        label: String,
        query: String,
        reason: String,
    },

    #[error("{url} -> [{label}]: Didn't find any elements matching query.")]
    NoMatch { url: String, label: String },

    #[error("{url}: couldn't find the article automatically. Add `selectors` for this page to pick the content.")]
    NoContent { url: String },
}

/// One page bound to its URL, ready for extraction.
#[derive(Debug)]
pub struct Article {
    url: String,
    html: String,
    validator: HtmlValidator,
}

impl Article {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Result<Self, ExtractionError> {
        let html = html.into();
        if html.is_empty() {
            return Err(ExtractionError::EmptyHtml);
        }
        Ok(Self {
            url: url.into(),
            html,
            validator: HtmlValidator::default(),
        })
    }

    /// Use a validator with a different tolerance for mis-nested markup.
    pub fn with_validator(mut self, validator: HtmlValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the snippet from explicit selectors. Every selector must match at least once.
    pub fn from_selectors(
        &self,
        selectors: &[ResolvedSelector],
    ) -> Result<ExtractedFragment, ExtractionError> {
        self.ensure_valid()?;
        let doc = Html::parse_document(&self.html);
        let mut parts = Vec::with_capacity(selectors.len());
        for (index, selector) in selectors.iter().enumerate() {
            let label = selector
                .name
                .clone()
                .unwrap_or_else(|| index.to_string());
            let compiled = self.parse_selector(&selector.query, &label)?;
            let matches: Vec<String> = match selector.mode {
                SelectMode::First => doc.select(&compiled).take(1).map(|e| e.html()).collect(),
                SelectMode::All => doc.select(&compiled).map(|e| e.html()).collect(),
            };
            if matches.is_empty() {
                return Err(ExtractionError::NoMatch {
                    url: self.url.clone(),
                    label,
                });
            }
            debug!("{} -> [{}]: {} match(es)", self.url, label, matches.len());
            parts.push(matches.join(MATCH_SEPARATOR));
        }
        Ok(ExtractedFragment {
            html_snippet: format!("<div>{}</div>", parts.join(MATCH_SEPARATOR)),
            metadata: self.metadata(&doc)?,
        })
    }

    /// Find the article automatically. `<style>` and `<svg>` subtrees are removed from the result.
    pub fn from_html(&self) -> Result<ExtractedFragment, ExtractionError> {
        self.ensure_valid()?;
        let doc = Html::parse_document(&self.html);
        let article_sel = self.parse_selector("article", "article")?;
        let content = match doc.select(&article_sel).next() {
            Some(article) => article.html(),
            None => self
                .readable_content()
                .ok_or_else(|| ExtractionError::NoContent {
                    url: self.url.clone(),
                })?,
        };
        Ok(ExtractedFragment {
            html_snippet: self.strip_noise(content)?,
            metadata: self.metadata(&doc)?,
        })
    }

    fn ensure_valid(&self) -> Result<(), ExtractionError> {
        if self.validator.is_valid(&self.html) {
            Ok(())
        } else {
            Err(ExtractionError::InvalidHtml {
                url: self.url.clone(),
            })
        }
    }

    /// Readability pass. Any failure counts as "nothing readable here".
    fn readable_content(&self) -> Option<String> {
        let url = Some(self.url.as_str());
        let readability = match readabilityrs::Readability::new(&self.html, url, None) {
            Ok(r) => r,
            Err(e) => {
                debug!("{}: readability unavailable: {}", self.url, e);
                return None;
            }
        };
        let content = readability.parse().and_then(|article| article.content)?;
        let has_text = Html::parse_fragment(&content)
            .root_element()
            .text()
            .any(|t| !t.trim().is_empty());
        has_text.then_some(content)
    }

    fn strip_noise(&self, content: String) -> Result<String, ExtractionError> {
        let noise = self.parse_selector("style, svg", "style, svg")?;
        let mut fragment = Html::parse_fragment(&content);
        let ids: Vec<_> = fragment.select(&noise).map(|e| e.id()).collect();
        if ids.is_empty() {
            return Ok(content);
        }
        for id in ids {
            if let Some(mut node) = fragment.tree.get_mut(id) {
                node.detach();
            }
        }
        Ok(fragment.root_element().inner_html())
    }

    fn metadata(&self, doc: &Html) -> Result<FragmentMetadata, ExtractionError> {
        let title_sel = self.parse_selector("title", "title")?;
        let keywords_sel = self.parse_selector("meta[name=\"keywords\"]", "keywords")?;
        let title = doc
            .select(&title_sel)
            .next()
            .map(|e| {
                e.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let keywords = doc
            .select(&keywords_sel)
            .next()
            .and_then(|e| e.value().attr("content"))
            .map(|content| {
                content
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            });
        Ok(FragmentMetadata {
            title,
            url: self.url.clone(),
            keywords,
        })
    }

    fn parse_selector(&self, query: &str, label: &str) -> Result<Selector, ExtractionError> {
        Selector::parse(query).map_err(|e| ExtractionError::InvalidSelector {
            url: self.url.clone(),
            label: label.to_string(),
            query: query.to_string(),
            reason: e.to_string(),
        })
    }
}
