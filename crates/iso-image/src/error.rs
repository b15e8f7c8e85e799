use thiserror::Error;

/// Every way a parse, mutation, or write can fail.
#[derive(Debug, Error)]
pub enum IsoError {
    #[error("image is not initialized; call new() or open() first")]
    NotInitialized,

    #[error("image is already initialized")]
    AlreadyInitialized,

    #[error("invalid volume descriptor: {0}")]
    InvalidDescriptor(&'static str),

    #[error("dual-endian fields disagree in {0}")]
    EndianMismatch(&'static str),

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: alloc::string::String, reason: &'static str },

    #[error("path depth exceeds the maximum of {max} levels: {path:?}")]
    DepthExceeded { path: alloc::string::String, max: u32 },

    #[error("no such path: {0:?}")]
    NotFound(alloc::string::String),

    #[error("operation not permitted: {0}")]
    NotPermitted(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] iso_io::Error),
}

pub type Result<T> = core::result::Result<T, IsoError>;
