use fuser::Errno;
use thiserror::Error;

use crate::fs::entity::EntityKind;
use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("No such path: {0}")]
    NotFound(String),

    #[error("Operation {op} not supported on {kind:?}")]
    Unsupported { op: &'static str, kind: EntityKind },

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Remote call timed out: {0}")]
    Timeout(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot move {from} to {to}: different project")]
    CrossSubtree { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FsError {
    /// Errno reported to the kernel for this error.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::NotFound(_) => Errno::ENOENT,
            FsError::Unsupported { op: "delete", .. } => os_errno(libc::EPERM),
            FsError::Unsupported { .. } => Errno::ENOTSUP,
            FsError::Remote(_) => Errno::EIO,
            FsError::Timeout(_) => os_errno(libc::EAGAIN),
            FsError::CrossSubtree { .. } => os_errno(libc::EXDEV),
            FsError::InvalidArgument(_) | FsError::Config(_) => Errno::EINVAL,
        }
    }
}

/// Errno for a raw OS error code.
pub fn os_errno(code: i32) -> Errno {
    Errno::from(std::io::Error::from_raw_os_error(code))
}

impl From<RemoteError> for FsError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout(msg) => FsError::Timeout(msg),
            other => FsError::Remote(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
