//! rdrdigest: bundle web pages into one EPUB digest and optionally mail it to a reader device.

pub mod article;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod epub;
pub mod fetch;
pub mod html;
pub mod model;
pub mod pipeline;
pub mod reader;
pub mod settings;

// Re-exports for CLI and consumers.
pub use article::{Article, ExtractionError};
pub use config::{parse, parse_file, Configuration, ConfigurationError, PageSpec};
pub use delivery::{DeliveryError, DeliveryRequest, DeviceDelivery, SmtpDelivery};
pub use fetch::{
    BrowserPool, FetchError, FetchOptions, FetchResult, FetchedPage, HttpClient, Navigator,
    PageFetcher, PlainFetch,
};
pub use html::HtmlValidator;
pub use model::{ExtractedFragment, FragmentMetadata, Violation};
pub use pipeline::{run_digest, Destination, PipelineError};
pub use reader::{BuildError, ReaderFile, ReaderFileBuilder, ReaderFileError};
