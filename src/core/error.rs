use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Section index {index} out of bounds ({count} sections)")]
    SectionIndexOutOfBounds { index: usize, count: usize },

    #[error("Section '{0}' not found")]
    SectionNotFound(String),

    #[error("Item index {index} out of bounds in section '{section}' ({count} items)")]
    ItemIndexOutOfBounds {
        section: String,
        index: usize,
        count: usize,
    },

    #[error("Item '{0}' not found")]
    ItemNotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("History fetch failed: {0}")]
    HistoryFailed(String),

    #[error("No persistent configuration found for schema '{0}'")]
    ConfigurationNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

impl<T> From<std::sync::PoisonError<T>> for FetchError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
