use thiserror::Error;

/// A single sample failed validation before being copied into the cache.
///
/// A malformed sample only rejects that one sample; the surrounding update
/// session continues and previously committed data is untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("metric name must not be empty")]
    EmptyName,

    #[error("duplicate label '{label}' on metric '{metric}'")]
    DuplicateLabel { metric: String, label: String },
}

pub type Result<T> = std::result::Result<T, Error>;
