// Error types for the distribution library
//
// Matching never fails outright (see matcher::match_recipients), so these
// errors surface from the lower layers that callers may want to branch on.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistribError {
    /// Table could not be opened or decoded. Callers treat this as "no data".
    #[error("recipient table unreadable: '{path}': {reason}")]
    UnreadableTable { path: PathBuf, reason: String },

    /// Table was readable but produced no usable records after cleaning.
    #[error("recipient table has no usable records: '{path}'")]
    EmptyTable { path: PathBuf },

    #[error("archive error for '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DistribError>;
