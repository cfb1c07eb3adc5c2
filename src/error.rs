use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed field-name list or format string.
    #[error("invalid format: {0}")]
    Format(String),
    #[error("unknown time scale: {0}")]
    UnknownTimeScale(String),
    #[error("time out of range: {0}")]
    TimeRange(String),
    #[error("corrupt header: {0}")]
    CorruptHeader(&'static str),
    /// Record area damage detected after the header was accepted.
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(String),
    #[error("path already exists: {}", .0.display())]
    PathExists(PathBuf),
    #[error("writer already active")]
    WriterAlreadyActive,
}

pub type Result<T> = std::result::Result<T, Error>;
