//! Status definitions
//!
//! Status-shaped results for consumers that want a code instead of a
//! `Result`.

use crate::error::Result;

/// Operation status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

impl Status {
    /// Collapse a write result into a status
    pub fn from_write(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(_) => Status::Error,
        }
    }
}

/// Result of a status-shaped read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Status code
    pub status: Status,

    /// Value when status is Ok
    pub value: Option<Vec<u8>>,

    /// Error message when status is Error
    pub error: Option<String>,
}

impl ReadOutcome {
    /// Create an OK outcome carrying a value
    pub fn ok(value: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            value: Some(value),
            error: None,
        }
    }

    /// Create a NOT_FOUND outcome
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            value: None,
            error: None,
        }
    }

    /// Create an ERROR outcome
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            value: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<Option<Vec<u8>>>> for ReadOutcome {
    fn from(result: Result<Option<Vec<u8>>>) -> Self {
        match result {
            Ok(Some(value)) => ReadOutcome::ok(value),
            Ok(None) => ReadOutcome::not_found(),
            Err(e) => ReadOutcome::error(e.to_string()),
        }
    }
}
