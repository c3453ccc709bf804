//! Turns extracted fragments into a [ReaderFile]: validate every fragment, then write one
//! EPUB into a fresh temporary directory.

mod file;

pub use file::{ReaderFile, ReaderFileError};

use std::io;

use chrono::{Local, NaiveDate, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::epub::{self, Digest, EpubError, EpubOptions};
use crate::html::HtmlValidator;
use crate::model::{ExtractedFragment, Violation};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No snippets passed")]
    NoSnippets,

    /// One line per rejected fragment, in input order: `url: [EMPTY_TITLE, INVALID_HTML]`.
    #[error("{}", render_report(.report))]
    Invalid { report: Vec<(String, Vec<Violation>)> },

    #[error("Could not create temporary directory: {0}")]
    TempDir(#[source] io::Error),

    #[error(transparent)]
    Epub(#[from] EpubError),
}

fn render_report(report: &[(String, Vec<Violation>)]) -> String {
    report
        .iter()
        .map(|(url, violations)| {
            let names: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
            format!("{}: [{}]", url, names.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Digest title for `date`, e.g. `News digest 2026-10-19`.
pub fn digest_title(date: NaiveDate) -> String {
    format!("News digest {}", date.format("%Y-%m-%d"))
}

/// EPUB file name for `date`, e.g. `2026-10-19 news.epub`.
pub fn digest_file_name(date: NaiveDate) -> String {
    format!("{} news.epub", date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Default)]
pub struct ReaderFileBuilder {
    validator: HtmlValidator,
    epub_options: EpubOptions,
    date: Option<NaiveDate>,
}

impl ReaderFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator(mut self, validator: HtmlValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn include_toc_page(mut self, include: bool) -> Self {
        self.epub_options.include_toc_page = include;
        self
    }

    pub fn include_ncx(mut self, include: bool) -> Self {
        self.epub_options.include_ncx = include;
        self
    }

    /// Date used for the title and file name. Defaults to today (local time).
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Violations of one fragment, in a fixed order.
    pub fn check(&self, fragment: &ExtractedFragment) -> Vec<Violation> {
        let mut violations = Vec::new();
        if fragment.metadata.title.trim().is_empty() {
            violations.push(Violation::EmptyTitle);
        }
        if !self.validator.is_valid(&fragment.html_snippet) {
            violations.push(Violation::InvalidHtml);
        }
        violations
    }

    /// Validate all fragments, then package them in the given order.
    pub fn build(&self, fragments: &[ExtractedFragment]) -> Result<ReaderFile, BuildError> {
        if fragments.is_empty() {
            return Err(BuildError::NoSnippets);
        }
        let report: Vec<(String, Vec<Violation>)> = fragments
            .iter()
            .map(|f| (f.metadata.url.clone(), self.check(f)))
            .filter(|(_, violations)| !violations.is_empty())
            .collect();
        if !report.is_empty() {
            return Err(BuildError::Invalid { report });
        }

        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        let digest = Digest {
            title: digest_title(date),
            identifier: format!("urn:uuid:{}", Uuid::new_v4()),
            modified: Utc::now(),
            chapters: fragments,
        };
        let dir = tempfile::Builder::new()
            .prefix("rdrdigest-")
            .tempdir()
            .map_err(BuildError::TempDir)?;
        let path = dir.path().join(digest_file_name(date));
        // On error `dir` is dropped here, which removes it.
        epub::write_epub_file(&digest, &path, self.epub_options)?;
        info!(
            "Built {} with {} article(s)",
            path.display(),
            fragments.len()
        );
        Ok(ReaderFile::new(dir, path))
    }
}
