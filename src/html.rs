//! Lenient HTML validity: "good enough to render", not conformance.
//!
//! html5ever records parse errors while building the tree. Input ending inside a tag
//! disqualifies outright, mis-nesting errors are tolerated up to a threshold, and the rest
//! (including characters the tokenizer recovers from) is ignored.

use scraper::Html;

/// Default number of mis-nesting errors tolerated. One more makes the HTML invalid.
pub const DEFAULT_MAX_SEVERE_ERRORS: usize = 1;

/// How bad a single parse error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Input ended inside a tag, comment or attribute.
    Fatal,
    /// Elements closed out of order or left open.
    Severe,
    Minor,
}

/// Classify one html5ever parse error message.
pub fn classify(message: &str) -> Severity {
    const FATAL: [&str; 2] = ["Unexpected EOF", "Saw EOF"];
    const SEVERE: [&str; 6] = [
        "nested heading tags",
        "Unexpected open tag at end of body",
        "Unexpected open element",
        "Found special tag while closing generic tag",
        "No matching tag to close",
        "Closing wrong heading tag",
    ];
    if FATAL.iter().any(|p| message.starts_with(p)) {
        Severity::Fatal
    } else if SEVERE.iter().any(|p| message.starts_with(p)) {
        Severity::Severe
    } else {
        Severity::Minor
    }
}

/// Parse-error counts for one snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlReport {
    pub fatal: usize,
    pub severe: usize,
    pub minor: usize,
}

/// Lenient validity check with a tunable threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlValidator {
    max_severe_errors: usize,
}

impl Default for HtmlValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEVERE_ERRORS)
    }
}

impl HtmlValidator {
    pub fn new(max_severe_errors: usize) -> Self {
        Self { max_severe_errors }
    }

    /// Count parse errors by severity. Whole documents are parsed as documents, snippets as
    /// body fragments, so a snippet is not penalised for lacking a doctype.
    pub fn report(&self, html: &str) -> HtmlReport {
        let parsed = if looks_like_document(html) {
            Html::parse_document(html)
        } else {
            Html::parse_fragment(html)
        };
        let mut report = HtmlReport::default();
        for error in &parsed.errors {
            match classify(error) {
                Severity::Fatal => report.fatal += 1,
                Severity::Severe => report.severe += 1,
                Severity::Minor => report.minor += 1,
            }
        }
        report
    }

    pub fn is_valid(&self, html: &str) -> bool {
        if html.trim().is_empty() {
            return false;
        }
        let report = self.report(html);
        report.fatal == 0 && report.severe <= self.max_severe_errors
    }
}

fn looks_like_document(html: &str) -> bool {
    let head: String = html
        .trim_start()
        .chars()
        .take(256)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<html")
}
