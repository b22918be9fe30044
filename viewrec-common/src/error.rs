//! Error type shared by the viewrec crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Root folder or config file access
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file unreadable or engagement settings out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unparseable value supplied by a caller (content kind, id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored row that no longer decodes into a model
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}
