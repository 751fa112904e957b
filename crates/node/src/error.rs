//! A bunch of wrap errors.

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors of the node crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid logging level: {0}")]
    InvalidLoggingLevel(String),
    #[error("Cannot find home directory")]
    HomeDirError,
    #[error("Path has no parent directory")]
    ParentDirError,
    #[error("Create file error: {0}")]
    CreateFileError(String),
    #[error("Open file error: {0}")]
    OpenFileError(String),
    #[error("Encode config error: {0}")]
    EncodeError(String),
    #[error("Decode config error: {0}")]
    DecodeError(String),
    #[error("Invalid node key: {0}")]
    InvalidNodeKey(String),
    #[error("Core error: {0}")]
    CoreError(#[from] chordnet_core::error::Error),
}
