use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("symbol `{0}` not found")]
    SymbolNotFound(String),
    #[error("failed to install hook on `{symbol}`: {reason}")]
    InstallationFailure { symbol: String, reason: String },
    #[error("library {} unavailable: {reason}", path.display())]
    LibraryUnavailable { path: PathBuf, reason: String },
    #[error("malformed image {}: {reason}", path.display())]
    MalformedImage { path: PathBuf, reason: String },
    #[error(transparent)]
    Config(#[from] nfcd_config::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
