// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric status codes carried by `ERROR` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    pub fn as_u32(self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Cancelled => 1,
            StatusCode::Unknown => 2,
            StatusCode::InvalidArgument => 3,
            StatusCode::DeadlineExceeded => 4,
            StatusCode::NotFound => 5,
            StatusCode::AlreadyExists => 6,
            StatusCode::PermissionDenied => 7,
            StatusCode::ResourceExhausted => 8,
            StatusCode::FailedPrecondition => 9,
            StatusCode::Aborted => 10,
            StatusCode::OutOfRange => 11,
            StatusCode::Unimplemented => 12,
            StatusCode::Internal => 13,
            StatusCode::Unavailable => 14,
            StatusCode::DataLoss => 15,
            StatusCode::Unauthenticated => 16,
        }
    }

    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code.as_u32()
    }
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        StatusCode::from_u32(code)
    }
}

/// Failure reported by the transport: a machine code plus a human readable
/// description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub description: String,
}

impl Status {
    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, description)
    }

    pub fn invalid_argument(description: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, description)
    }

    pub fn unavailable(description: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, description)
    }

    pub fn deadline_exceeded(description: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, description)
    }

    pub fn cancelled(description: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, description)
    }

    pub fn failed_precondition(description: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, description)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code.as_u32(), self.description)
    }
}

impl std::error::Error for Status {}

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Any failure of the remote call itself. Never retried.
    #[error("xmldb vendor error: {}", .0.description)]
    Vendor(#[source] Status),
    #[error("xmldb: invalid resource: {0}")]
    InvalidResource(String),
    #[error("xmldb: invalid collection: {0}")]
    InvalidCollection(String),
    #[error("xmldb: not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("xmldb: no result within {0:?}")]
    Timeout(Duration),
    #[error("xmldb: sequence exhausted")]
    Exhausted,
    #[error("xmldb: wait interrupted{}", interrupted_suffix(.transport))]
    Interrupted { transport: Option<Status> },
    #[error("xmldb: invalid connection descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("xmldb: invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("xmldb: invalid response: {0}")]
    InvalidResponse(String),
    #[error("xmldb io: {0}")]
    Io(#[from] std::io::Error),
}

fn interrupted_suffix(transport: &Option<Status>) -> String {
    match transport {
        Some(status) => format!(" after transport failure: {status}"),
        None => String::new(),
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Vendor(status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Error::InvalidResponse(msg.into())
    }

    pub fn invalid_resource(msg: impl Into<String>) -> Self {
        Error::InvalidResource(msg.into())
    }

    pub fn invalid_collection(msg: impl Into<String>) -> Self {
        Error::InvalidCollection(msg.into())
    }

    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Error::InvalidDescriptor(msg.into())
    }

    pub fn is_vendor(&self) -> bool {
        matches!(self, Error::Vendor(_))
    }

    /// The transport status behind this error, if there is one.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Vendor(status) => Some(status),
            Error::Interrupted { transport } => transport.as_ref(),
            _ => None,
        }
    }
}

/// Checks whether an error carries a transport status with the given code.
pub fn is_status(err: &Error, code: StatusCode) -> bool {
    err.status().is_some_and(|status| status.code == code)
}
