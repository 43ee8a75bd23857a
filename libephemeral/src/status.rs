//! Protocol-level status returned to callers.
//!
//! A [`Status`] is what crosses the transport when an operation fails: a
//! gRPC-compatible [`Code`] plus the human-readable cause.  It is produced from
//! a [`CsiError`] without adding or dropping information.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;

/// Status codes understood by CSI callers.
///
/// Discriminants match the gRPC status code numbering so a gRPC front end can
/// forward them unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,
    /// The system is not in a state required for the operation's execution.
    FailedPrecondition = 9,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
}

impl Code {
    /// Upper-case name as used on the wire by gRPC.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        code as i32
    }
}

/// Failure status carried back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Create a new `Status` with the associated code and message.
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The status code.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// The human-readable cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Client specified an invalid argument.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// The transport or server could not process the call.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {}, message: {:?}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

impl From<CsiError> for Status {
    fn from(err: CsiError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<&CsiError> for Status {
    fn from(err: &CsiError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
