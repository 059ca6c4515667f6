//! EDINET filing scraping: metadata parsing, portal navigation, batch runs.

pub mod batch;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod navigator;
pub mod store;

#[cfg(test)]
pub(crate) mod fake;

pub use batch::{BatchOptions, BatchResult, BatchRunner, BatchStatus, BatchSummary, BatchTarget};
pub use driver::{PortalDriver, WebDriverPortal};
pub use error::ScrapeError;
pub use metadata::{extract_filing_metadata, FilingMetadata};
pub use navigator::{FilingLinkRecord, NavigatorOptions, PortalNavigator, PortalState};
