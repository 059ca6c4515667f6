use std::time::Duration;
use thiserror::Error;

/// Failure kinds of a scraping run. Only [`ScrapeError::Session`] aborts a
/// batch; everything else is recorded against the identifier and skipped.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("malformed filing metadata: {0}")]
    Extraction(String),

    #[error("{what} did not appear within {waited:?}")]
    NotFound { what: String, waited: Duration },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser session unavailable: {0}")]
    Session(String),

    #[error("content write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    pub fn not_found(what: impl Into<String>, waited: Duration) -> Self {
        ScrapeError::NotFound {
            what: what.into(),
            waited,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ScrapeError::Session(_))
    }
}
