use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// SegKV errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// No segment indexes the requested key.
    KeyNotFound,
    /// The stored digest does not match the digest recomputed from the value
    /// that was just read.
    ChecksumMismatch,
    /// A record with an invalid declared size, or a short read where a full
    /// record was expected.
    CorruptRecord(String),
    /// An IO error.
    IO(String),
    /// An operation was attempted on a closed store.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::ChecksumMismatch => write!(f, "checksum mismatch, stored value is corrupt"),
            Error::CorruptRecord(msg) => write!(f, "corrupt record: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::Closed => write!(f, "store is closed"),
        }
    }
}

/// Constructs an Error::CorruptRecord for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::CorruptRecord(format!($($args)*)).into() };
}

/// A SegKV Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::IO(err.to_string())
    }
}
