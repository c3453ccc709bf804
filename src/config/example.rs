//! Example configuration written by `rdrdigest get-config`.

use std::path::{Path, PathBuf};

pub const EXAMPLE_CONFIG: &str = r#"#
# rdrdigest example configuration.
# Use this file to build an EPUB digest from web pages.
#
# Filename or output path of the resulting EPUB. Not required if `toDevice` is present.
output: "news.epub"
# Mail the resulting EPUB to a reader device. Credentials are used only to send the file.
# Not required if `output` is present. Remove this section if you don't need it.
toDevice:
  # Email address of your reader device (e.g. Kindle).
  deviceEmail: "your-device@kindle.com"
  # Address of the account sending the file.
  senderEmail: "you@gmail.com"
  # Application password for the sending account.
  senderPassword: "application password"
# Content of the resulting EPUB, in reading order.
pages:
    # Extract content automatically by passing the URL only.
  - "https://example.com/article"
    # Or use selectors to pick what you want.
  - url: "https://example.com/docs"
    selectors:
        # Select the first matching element...
      - name: "Header" # optional, shows up in error messages
        first: ".page-content header"
        # ... or all of them.
      - name: "Content"
        all:
          # Nest selectors to build verbose queries.
          ".page-content .contents":
            [
              "h1",
              "h2",
              "p",
              "code",
              { ".custom-tip": ["p", "div", ".some-class": ["a", "p"]] },
            ]
"#;

/// Write [EXAMPLE_CONFIG] to `path`, forcing a `.yaml` extension. Returns the path written.
pub fn write_example_config(path: &Path) -> std::io::Result<PathBuf> {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yaml")
        .unwrap_or(false);
    let destination = if is_yaml {
        path.to_path_buf()
    } else {
        path.with_extension("yaml")
    };
    std::fs::write(&destination, EXAMPLE_CONFIG)?;
    Ok(destination)
}
