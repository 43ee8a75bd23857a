//! CSI error types.
//!
//! All errors surfaced by the `libephemeral` crate are represented by the
//! [`CsiError`] enum, which derives [`thiserror::Error`].  Each variant maps to
//! exactly one protocol [`Code`] via [`CsiError::code`]; the transport turns
//! it into a [`Status`](crate::status::Status) before it leaves the process.

use thiserror::Error;

use crate::fs::{FsError, FsErrorKind};
use crate::status::Code;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid or missing argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested volume is not tracked by the registry.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The operation would violate a volume invariant, e.g. publishing to a
    /// second target while another one is active.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A directory, mount, unmount or statfs call failed.
    #[error(transparent)]
    Filesystem(#[from] FsError),

    /// The call is outside this plugin's backing-store model.
    #[error("{0} is not supported")]
    Unimplemented(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Protocol status code for this error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::VolumeNotFound(_) => Code::NotFound,
            Self::Conflict(_) => Code::FailedPrecondition,
            Self::Filesystem(e) if e.kind == FsErrorKind::NotFound => Code::NotFound,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Filesystem(_) | Self::Transport(_) | Self::Internal(_) => Code::Internal,
        }
    }
}
