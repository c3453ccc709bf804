//! Page-set configuration: which pages go into the digest, how to extract them, and where the
//! result goes. Parsed from YAML, validated field by field, selectors flattened on the way out.

mod example;
pub mod selector;

pub use example::{write_example_config, EXAMPLE_CONFIG};
pub use selector::{resolve, resolve_with, SelectorTree};

use reqwest::Url;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors. Field-level messages are prefixed with the dotted path of the field.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: expected a mapping with `pages` at the top level.")]
    InvalidDocument,

    #[error("{path}: {message}")]
    Invalid { path: String, message: String },

    #[error("{path}: If you define selector then `first` or `all` must be set.")]
    SelectorModeMissing { path: String },

    #[error("{path}: You can't have both `first` and `all` in one selector.")]
    SelectorModeConflict { path: String },

    #[error("You must provide either 'output' or 'toDevice' parameter in your configuration.")]
    NoDestination,

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported configuration file type: {path} (expected .yaml)")]
    UnsupportedFormat { path: PathBuf },

    #[error("Invalid output path {output}: {reason}")]
    InvalidOutput { output: String, reason: String },
}

impl ConfigurationError {
    pub(crate) fn invalid(path: &FieldPath, message: impl Into<String>) -> Self {
        ConfigurationError::Invalid {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Dotted location of a field inside the document, e.g. `pages.0.selectors.1`.
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldPath(Vec<String>);

impl FieldPath {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        FieldPath(segments)
    }

    pub(crate) fn index(&self, i: usize) -> Self {
        self.key(&i.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("(root)")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Destination path for the EPUB, as written in the file (not yet sanitized).
    pub output: Option<String>,
    pub to_device: Option<ToDevice>,
    pub pages: Vec<PageSpec>,
}

impl Configuration {
    /// Page URLs in configuration order.
    pub fn urls(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.url().to_string()).collect()
    }
}

/// Where and how to mail the digest to a reader device.
#[derive(Clone, PartialEq, Eq)]
pub struct ToDevice {
    pub device_email: String,
    pub sender_email: String,
    pub sender_password: String,
}

impl fmt::Debug for ToDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToDevice")
            .field("device_email", &self.device_email)
            .field("sender_email", &self.sender_email)
            .field("sender_password", &"***")
            .finish()
    }
}

/// One page of the digest: auto-extracted, or extracted with explicit selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSpec {
    Url(String),
    WithSelectors {
        url: String,
        selectors: Vec<ResolvedSelector>,
    },
}

impl PageSpec {
    pub fn url(&self) -> &str {
        match self {
            PageSpec::Url(url) | PageSpec::WithSelectors { url, .. } => url,
        }
    }

    /// Explicit selectors, or None for automatic extraction.
    pub fn selectors(&self) -> Option<&[ResolvedSelector]> {
        match self {
            PageSpec::Url(_) => None,
            PageSpec::WithSelectors { selectors, .. } => Some(selectors),
        }
    }
}

/// Whether a selector takes the first match or every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    First,
    All,
}

/// A selector ready to run against a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelector {
    pub name: Option<String>,
    pub mode: SelectMode,
    pub query: String,
}

/// Read and parse a `.yaml` configuration file.
pub fn parse_file(path: &Path) -> Result<Configuration, ConfigurationError> {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);
    if !is_yaml {
        return Err(ConfigurationError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&raw)
}

/// Parse and validate configuration text. Selector trees come back resolved.
pub fn parse(raw: &str) -> Result<Configuration, ConfigurationError> {
    let document: Value = serde_yaml::from_str(raw)?;
    let map = match document {
        Value::Mapping(map) => map,
        _ => return Err(ConfigurationError::InvalidDocument),
    };
    let root = FieldPath::root();

    let pages = parse_pages(&map, &root)?;
    let output = parse_output(&map, &root)?;
    let to_device = parse_to_device(&map, &root)?;
    if output.is_none() && to_device.is_none() {
        return Err(ConfigurationError::NoDestination);
    }

    Ok(Configuration {
        output,
        to_device,
        pages,
    })
}

fn parse_output(map: &Mapping, root: &FieldPath) -> Result<Option<String>, ConfigurationError> {
    match map.get("output") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ConfigurationError::invalid(
            &root.key("output"),
            "must be a non-empty path",
        )),
    }
}

fn parse_to_device(map: &Mapping, root: &FieldPath) -> Result<Option<ToDevice>, ConfigurationError> {
    let path = root.key("toDevice");
    let device = match map.get("toDevice") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Mapping(m)) => m,
        Some(_) => return Err(ConfigurationError::invalid(&path, "must be a mapping")),
    };
    let device_email = required_string(device, "deviceEmail", &path)?;
    let sender_email = required_string(device, "senderEmail", &path)?;
    let sender_password = required_string(device, "senderPassword", &path)?;
    for (key, email) in [("deviceEmail", &device_email), ("senderEmail", &sender_email)] {
        if mailbox_address(email).is_none() {
            return Err(ConfigurationError::invalid(
                &path.key(key),
                format!("'{}' is not a valid email address", email),
            ));
        }
    }
    Ok(Some(ToDevice {
        device_email,
        sender_email,
        sender_password,
    }))
}

fn required_string(map: &Mapping, key: &str, parent: &FieldPath) -> Result<String, ConfigurationError> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(ConfigurationError::invalid(
            &parent.key(key),
            "must not be empty",
        )),
        _ => Err(ConfigurationError::invalid(
            &parent.key(key),
            "is required and must be a string",
        )),
    }
}

/// Same address rules as delivery, plus a dotted `domain.tld`. Deliverability is not checked.
fn mailbox_address(s: &str) -> Option<lettre::Address> {
    s.parse::<lettre::Address>()
        .ok()
        .filter(|address| {
            let domain = address.domain();
            domain.contains('.') && domain.split('.').all(|part| !part.is_empty())
        })
}

fn parse_pages(map: &Mapping, root: &FieldPath) -> Result<Vec<PageSpec>, ConfigurationError> {
    let path = root.key("pages");
    let entries = match map.get("pages") {
        Some(Value::Sequence(seq)) if !seq.is_empty() => seq,
        Some(Value::Sequence(_)) => {
            return Err(ConfigurationError::invalid(&path, "must list at least one page"))
        }
        _ => return Err(ConfigurationError::invalid(&path, "is required and must be a list")),
    };
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| parse_page(entry, &path.index(i)))
        .collect()
}

fn parse_page(entry: &Value, path: &FieldPath) -> Result<PageSpec, ConfigurationError> {
    match entry {
        Value::String(url) => Ok(PageSpec::Url(checked_url(url, path)?)),
        Value::Mapping(page) => {
            let url = match page.get("url") {
                Some(Value::String(url)) => checked_url(url, &path.key("url"))?,
                _ => {
                    return Err(ConfigurationError::invalid(
                        &path.key("url"),
                        "is required and must be a string",
                    ))
                }
            };
            let selectors_path = path.key("selectors");
            let raw_selectors = match page.get("selectors") {
                None | Some(Value::Null) => return Ok(PageSpec::Url(url)),
                Some(Value::Sequence(seq)) => seq,
                Some(_) => {
                    return Err(ConfigurationError::invalid(&selectors_path, "must be a list"))
                }
            };
            if raw_selectors.is_empty() {
                return Ok(PageSpec::Url(url));
            }
            let selectors = raw_selectors
                .iter()
                .enumerate()
                .map(|(i, s)| parse_selector(s, &selectors_path.index(i)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PageSpec::WithSelectors { url, selectors })
        }
        _ => Err(ConfigurationError::invalid(
            path,
            "page must be a URL or a mapping with `url` and `selectors`",
        )),
    }
}

fn checked_url(raw: &str, path: &FieldPath) -> Result<String, ConfigurationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigurationError::invalid(path, "URL must not be empty"));
    }
    let url = Url::parse(raw)
        .map_err(|e| ConfigurationError::invalid(path, format!("invalid URL '{}': {}", raw, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigurationError::invalid(
            path,
            format!("URL '{}' must use http or https", raw),
        ));
    }
    Ok(raw.to_string())
}

fn parse_selector(value: &Value, path: &FieldPath) -> Result<ResolvedSelector, ConfigurationError> {
    let map = value
        .as_mapping()
        .ok_or_else(|| ConfigurationError::invalid(path, "selector must be a mapping"))?;
    let name = match map.get("name") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(ConfigurationError::invalid(
                &path.key("name"),
                "must be a string",
            ))
        }
    };
    let (mode, key, tree) = match (map.get("first"), map.get("all")) {
        (Some(_), Some(_)) => {
            return Err(ConfigurationError::SelectorModeConflict {
                path: path.to_string(),
            })
        }
        (None, None) => {
            return Err(ConfigurationError::SelectorModeMissing {
                path: path.to_string(),
            })
        }
        (Some(tree), None) => (SelectMode::First, "first", tree),
        (None, Some(tree)) => (SelectMode::All, "all", tree),
    };
    let tree_path = path.key(key);
    let query = resolve(&SelectorTree::from_yaml(tree, &tree_path)?);
    if query.is_empty() {
        return Err(ConfigurationError::invalid(&tree_path, "selector resolves to nothing"));
    }
    Ok(ResolvedSelector { name, mode, query })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
output: "news.epub"
toDevice:
  deviceEmail: "reader@kindle.com"
  senderEmail: "me@gmail.com"
  senderPassword: "app password"
pages:
  - "https://example.com/a"
  - "https://example.com/b"
  - url: "https://example.com/c"
  - url: "https://ziglang.org/learn/overview/"
    selectors:
      - name: "Header"
        first: ".page-content header"
      - name: "Content"
        all:
          ".page-content .contents":
            ["h1", "h2", { ".custom-tip": ["p", "div", ".some-class": ["a", "p"]] }]
      - first: "footer"
"#;

    #[test]
    fn parses_valid_configuration() -> Result<(), ConfigurationError> {
        let config = parse(VALID)?;
        assert_eq!(config.output.as_deref(), Some("news.epub"));
        let device = config.to_device.as_ref().expect("toDevice present");
        assert_eq!(device.device_email, "reader@kindle.com");
        assert_eq!(config.pages.len(), 4);
        assert_eq!(config.pages[0], PageSpec::Url("https://example.com/a".into()));
        assert_eq!(config.pages[2], PageSpec::Url("https://example.com/c".into()));

        let selectors = config.pages[3].selectors().expect("selectors");
        assert_eq!(selectors.len(), 3);
        assert_eq!(selectors[0].name.as_deref(), Some("Header"));
        assert_eq!(selectors[0].mode, SelectMode::First);
        assert_eq!(selectors[1].mode, SelectMode::All);
        assert_eq!(
            selectors[1].query,
            ".page-content .contents h1, .page-content .contents h2, \
             .page-content .contents .custom-tip p, .page-content .contents .custom-tip div, \
             .page-content .contents .custom-tip .some-class a, \
             .page-content .contents .custom-tip .some-class p"
        );
        assert!(selectors[2].name.is_none());
        Ok(())
    }

    #[test]
    fn urls_follow_configuration_order() -> Result<(), ConfigurationError> {
        let config = parse(VALID)?;
        assert_eq!(config.urls()[1], "https://example.com/b");
        assert_eq!(config.urls()[3], "https://ziglang.org/learn/overview/");
        Ok(())
    }

    #[test]
    fn empty_selector_list_degrades_to_auto() -> Result<(), ConfigurationError> {
        let config = parse("output: a.epub\npages:\n  - url: https://example.com\n    selectors: []\n")?;
        assert_eq!(config.pages[0], PageSpec::Url("https://example.com".into()));
        Ok(())
    }

    #[test]
    fn rejects_scalar_and_list_documents() {
        assert!(matches!(parse("just text"), Err(ConfigurationError::InvalidDocument)));
        assert!(matches!(parse("- a\n- b"), Err(ConfigurationError::InvalidDocument)));
        assert!(matches!(parse(""), Err(ConfigurationError::InvalidDocument)));
    }

    #[test]
    fn selector_without_mode_is_rejected() {
        let raw = "output: a.epub\npages:\n  - url: https://example.com\n    selectors:\n      - name: x\n";
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, ConfigurationError::SelectorModeMissing { .. }));
        assert!(err
            .to_string()
            .contains("If you define selector then `first` or `all` must be set"));
        assert!(err.to_string().starts_with("pages.0.selectors.0"));
    }

    #[test]
    fn selector_with_both_modes_is_rejected() {
        let raw = "output: a.epub\npages:\n  - url: https://example.com\n    selectors:\n      - first: p\n        all: div\n";
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, ConfigurationError::SelectorModeConflict { .. }));
        assert!(err.to_string().contains("You can't have both `first` and `all`"));
    }

    #[test]
    fn invalid_selector_structure_reports_path() {
        let raw = "output: a.epub\npages:\n  - url: https://example.com\n    selectors:\n      - first: p\n      - all: [p]\n";
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("pages.0.selectors.1.all"), "{}", err);
    }

    #[test]
    fn missing_destination_is_rejected() {
        let err = parse("pages: [\"https://example.com\"]").unwrap_err();
        assert!(matches!(err, ConfigurationError::NoDestination));
        assert!(err
            .to_string()
            .contains("You must provide either 'output' or 'toDevice'"));
    }

    #[test]
    fn partial_to_device_is_rejected() {
        let raw = "toDevice:\n  deviceEmail: reader@kindle.com\npages: [\"https://example.com\"]\n";
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("toDevice.senderEmail"), "{}", err);
    }

    #[test]
    fn malformed_email_is_rejected() {
        let raw = "toDevice:\n  deviceEmail: kindle\n  senderEmail: me@gmail.com\n  senderPassword: x\npages: [\"https://example.com\"]\n";
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("toDevice.deviceEmail"), "{}", err);
    }

    #[test]
    fn invalid_page_entries_are_rejected() {
        let err = parse("output: a.epub\npages: []").unwrap_err();
        assert!(err.to_string().starts_with("pages"));
        let err = parse("output: a.epub\npages: [42]").unwrap_err();
        assert!(err.to_string().starts_with("pages.0"));
        let err = parse("output: a.epub\npages: [\"\"]").unwrap_err();
        assert!(err.to_string().starts_with("pages.0"));
        let err = parse("output: a.epub\npages: [\"ftp://example.com\"]").unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn email_shape() {
        assert!(mailbox_address("a@b.co").is_some());
        assert!(mailbox_address("reader@kindle.com").is_some());
        assert!(mailbox_address("a@b").is_none());
        assert!(mailbox_address("@b.co").is_none());
        assert!(mailbox_address("a b@c.co").is_none());
        assert!(mailbox_address("a@@b.co").is_none());
        assert!(mailbox_address("x\"y@d.e").is_none());
    }

    #[test]
    fn addresses_accepted_here_are_sendable() {
        for address in ["reader@kindle.com", "me@gmail.com", "first.last+tag@mail.example.org"] {
            let parsed = mailbox_address(address).expect("valid address");
            assert_eq!(parsed.to_string(), address);
            assert!(address.parse::<lettre::message::Mailbox>().is_ok());
        }
    }

    #[test]
    fn unsendable_device_email_fails_at_parse_time() {
        let raw = "toDevice:\n  deviceEmail: 'x\"y@d.e'\n  senderEmail: me@gmail.com\n  senderPassword: x\npages: [\"https://example.com\"]\n";
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("toDevice.deviceEmail"), "{}", err);
    }

    #[test]
    fn parse_file_requires_yaml_extension() {
        let err = parse_file(Path::new("config.json")).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedFormat { .. }));
    }

    #[test]
    fn parse_file_reads_yaml() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("digest.yaml");
        std::fs::write(&path, VALID)?;
        let config = parse_file(&path)?;
        assert_eq!(config.pages.len(), 4);
        Ok(())
    }

    #[test]
    fn password_is_not_debug_printed() -> Result<(), ConfigurationError> {
        let config = parse(VALID)?;
        let debug = format!("{:?}", config.to_device);
        assert!(!debug.contains("app password"));
        Ok(())
    }
}
