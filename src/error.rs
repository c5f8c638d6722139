use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AstroError {
    #[error("OSDR request failed: {0}")]
    OsdrHttp(String),

    #[error("OSDR returned status {status}: {message}")]
    OsdrStatus { status: u16, message: String },

    #[error("invalid year range: {0}")]
    InvalidYearRange(String),

    #[error("invalid sort field: {0}")]
    InvalidSortField(String),

    #[error("invalid sort order: {0}")]
    InvalidSortOrder(String),

    #[error("invalid publication status: {0}")]
    InvalidPublicationStatus(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("curated record not found: {0}")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("research database unavailable: {0}")]
    ServiceUnavailable(String),
}
