//! Canonical data passed between the extractor and the reader-file builder.
//!
//! The extractor produces [ExtractedFragment]s; the builder consumes them in order.

use std::fmt;

/// One extracted article: an HTML subtree plus the metadata needed to file it in the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFragment {
    /// Serialized HTML of the article content (no surrounding document).
    pub html_snippet: String,
    pub metadata: FragmentMetadata,
}

/// Metadata derived from the source page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMetadata {
    /// Text of the page's `<title>`. May be empty; the builder rejects empty titles.
    pub title: String,
    /// URL the page was fetched from.
    pub url: String,
    /// Comma-split `<meta name="keywords">` content, when the page carries one.
    pub keywords: Option<Vec<String>>,
}

/// A value tagged with its position in the original request list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordered<T> {
    pub order: usize,
    pub value: T,
}

impl<T> Ordered<T> {
    pub fn new(order: usize, value: T) -> Self {
        Self { order, value }
    }
}

/// Sort by `order` and drop the tags. Ties keep their relative input order.
pub fn into_sorted<T>(mut items: Vec<Ordered<T>>) -> Vec<T> {
    items.sort_by_key(|item| item.order);
    items.into_iter().map(|item| item.value).collect()
}

/// One reason a fragment cannot go into a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Violation {
    EmptyTitle,
    InvalidHtml,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyTitle => f.write_str("EMPTY_TITLE"),
            Violation::InvalidHtml => f.write_str("INVALID_HTML"),
        }
    }
}
