//! Remote source: listing, download and extraction of the published archives

pub mod extractor;
pub mod fetcher;
pub mod listing;
pub mod retry;

pub use extractor::{ArchiveExtractor, ExtractionSummary};
pub use fetcher::{ArchiveFetcher, ArchiveTarget, FetchOutcome, FetchSummary};
pub use listing::ListingResolver;
pub use retry::RetryPolicy;
