use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// No update session has committed yet; readers should treat this as the
    /// service still warming up, not as a fault.
    #[error("no metric snapshot has been published yet")]
    NotReady,

    /// Another update session is open, or both buffers are still held by
    /// readers. Only returned by the fail-fast session entry point.
    #[error("an update session is already in progress")]
    SessionBusy,
}

pub type Result<T> = std::result::Result<T, Error>;
