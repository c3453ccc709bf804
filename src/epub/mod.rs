//! EPUB 3 writer for a digest: mimetype, container, OPF, nav (plus optional NCX and visible
//! TOC page), one chapter per extracted fragment.

use crate::model::ExtractedFragment;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node};
use std::io::{Seek, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const CREATOR: &str = "rdrdigest";

const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: digest title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: digest has no chapters.")]
    NoChapters,

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// What goes into one EPUB: package metadata plus chapters in reading order.
#[derive(Debug, Clone)]
pub struct Digest<'a> {
    pub title: String,
    /// Package identifier, e.g. `urn:uuid:...`.
    pub identifier: String,
    pub modified: DateTime<Utc>,
    pub chapters: &'a [ExtractedFragment],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpubOptions {
    /// Include toc.ncx for readers that predate EPUB 3 navigation.
    pub include_ncx: bool,
    /// Insert a visible table-of-contents page before the first chapter.
    pub include_toc_page: bool,
}

impl Default for EpubOptions {
    fn default() -> Self {
        Self {
            include_ncx: true,
            include_toc_page: true,
        }
    }
}

/// Write `digest` as EPUB 3 into `writer` and hand the writer back.
pub fn write_epub<W: Write + Seek>(
    digest: &Digest<'_>,
    writer: W,
    options: EpubOptions,
) -> Result<W, EpubError> {
    validate_digest(digest)?;
    let mut zip = ZipWriter::new(writer);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // Mimetype first and uncompressed.
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    write_opf(digest, options, &mut zip, options_deflate)?;
    write_nav_xhtml(digest, &mut zip, options_deflate)?;
    if options.include_ncx {
        write_ncx(digest, &mut zip, options_deflate)?;
    }
    if options.include_toc_page {
        write_toc_page_xhtml(digest, &mut zip, options_deflate)?;
    }
    write_chapters(digest, &mut zip, options_deflate)?;

    Ok(zip.finish()?)
}

/// Write `digest` to a new file at `path`.
pub fn write_epub_file(
    digest: &Digest<'_>,
    path: &Path,
    options: EpubOptions,
) -> Result<(), EpubError> {
    validate_digest(digest)?;
    let file = std::fs::File::create(path).map_err(|e| EpubError::CreateFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let file = write_epub(digest, file, options)?;
    file.sync_all()?;
    Ok(())
}

fn validate_digest(digest: &Digest<'_>) -> Result<(), EpubError> {
    if digest.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if digest.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }
    Ok(())
}

fn write_opf(
    digest: &Digest<'_>,
    options: EpubOptions,
    zip: &mut ZipWriter<impl Write + Seek>,
    file_options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
"#,
    );
    if options.include_ncx {
        manifest.push_str(
            r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
        );
    }
    if options.include_toc_page {
        manifest.push_str(
            r#"    <item id="toc-page" href="toc.xhtml" media-type="application/xhtml+xml"/>
"#,
        );
    }
    for i in 1..=digest.chapters.len() {
        manifest.push_str(&format!(
            r#"    <item id="chapter-{i}" href="chapter-{i}.xhtml" media-type="application/xhtml+xml"/>
"#
        ));
    }

    let mut spine = Vec::with_capacity(digest.chapters.len() + 1);
    if options.include_toc_page {
        spine.push(r#"    <itemref idref="toc-page"/>"#.to_string());
    }
    for i in 1..=digest.chapters.len() {
        spine.push(format!(r#"    <itemref idref="chapter-{i}"/>"#));
    }

    let mut keywords: Vec<&str> = Vec::new();
    for keyword in digest
        .chapters
        .iter()
        .filter_map(|c| c.metadata.keywords.as_ref())
        .flatten()
    {
        if !keywords.contains(&keyword.as_str()) {
            keywords.push(keyword);
        }
    }
    let subjects: String = keywords
        .iter()
        .map(|k| format!("    <dc:subject>{}</dc:subject>\n", xml_escape(k)))
        .collect();

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>en</dc:language>
    <dc:date>{date}</dc:date>
{subjects}    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{toc_attr}>
{spine}
  </spine>
</package>
"#,
        id = xml_escape(&digest.identifier),
        title = xml_escape(&digest.title),
        creator = CREATOR,
        date = digest.modified.format("%Y-%m-%d"),
        subjects = subjects,
        modified = digest.modified.format("%Y-%m-%dT%H:%M:%SZ"),
        manifest = manifest,
        toc_attr = if options.include_ncx { r#" toc="ncx""# } else { "" },
        spine = spine.join("\n"),
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), file_options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn toc_items(digest: &Digest<'_>, indent: &str) -> String {
    digest
        .chapters
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            format!(
                "{}<li><a href=\"chapter-{}.xhtml\">{}</a></li>\n",
                indent,
                i + 1,
                xml_escape(&ch.metadata.title)
            )
        })
        .collect()
}

fn write_nav_xhtml(
    digest: &Digest<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
{}    </ol>
  </nav>
</body>
</html>
"#,
        toc_items(digest, "      ")
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn write_toc_page_xhtml(
    digest: &Digest<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let toc_xhtml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <h1>{}</h1>
  <ol>
{}  </ol>
</body>
</html>
"#,
        xml_escape(&digest.title),
        toc_items(digest, "    ")
    );
    zip.start_file(format!("{}toc.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(toc_xhtml.as_bytes())?;
    Ok(())
}

fn write_ncx(
    digest: &Digest<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    for (i, ch) in digest.chapters.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="chapter-{n}.xhtml"/>
    </navPoint>
"#,
            n = i + 1,
            label = xml_escape(&ch.metadata.title),
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&digest.identifier),
        xml_escape(&digest.title),
        nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

fn write_chapters(
    digest: &Digest<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    for (i, ch) in digest.chapters.iter().enumerate() {
        let title = xml_escape(&ch.metadata.title);
        let html = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
</head>
<body>
<h1>{title}</h1>
<p><a href="{url}">{url_text}</a></p>
{body}
</body>
</html>
"#,
            title = title,
            url = xml_escape(&ch.metadata.url),
            url_text = xml_escape(&ch.metadata.url),
            body = to_xhtml(&ch.html_snippet),
        );
        let name = format!("{}chapter-{}.xhtml", OEBPS_PREFIX, i + 1);
        zip.start_file(name, options)?;
        zip.write_all(html.as_bytes())?;
    }
    Ok(())
}

/// Re-serialize an HTML snippet as well-formed XHTML: void elements self-closed, text
/// escaped, scripts and comments dropped, attributes that are not valid XML names skipped.
pub fn to_xhtml(snippet: &str) -> String {
    let fragment = Html::parse_fragment(snippet);
    let mut out = String::with_capacity(snippet.len());
    write_children(fragment.root_element(), &mut out);
    out
}

fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&xml_escape(text)),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if name == "script" || name == "noscript" {
        return;
    }
    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        if is_xml_name(attr) && attr != "xmlns" {
            out.push_str(&format!(" {}=\"{}\"", attr, xml_escape(value)));
        }
    }
    if VOID_ELEMENTS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');
    write_children(element, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
