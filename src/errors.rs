use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::fs::FsError;

/// Failure of a lock system operation.
///
/// Every variant maps directly onto the status code the calling handler
/// puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// Unsupported request, e.g. a shared lock on an exclusive-only lock system.
    BadRequest,
    /// A refresh or unlock named a token that does not cover the resource.
    PreconditionFailed,
    /// The resource is already locked (423).
    Locked,
    /// Backend failure while creating the resource or holding it open.
    Fs(FsError),
}

impl LockError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            LockError::BadRequest => StatusCode::BAD_REQUEST,
            LockError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            LockError::Locked => StatusCode::LOCKED,
            LockError::Fs(e) => fserror_to_status(*e),
        }
    }
}

impl Error for LockError {}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LockError::Fs(e) => write!(f, "lock failed: {e}"),
            _ => write!(f, "lock failed: {}", self.statuscode()),
        }
    }
}

impl From<FsError> for LockError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Locked => LockError::Locked,
            e => LockError::Fs(e),
        }
    }
}

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub(crate) enum DavError {
    XmlParseError,
    InvalidPath,
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    FsError(FsError),
    LockError(LockError),
    IoError(io::Error),
}

impl Error for DavError {
    fn description(&self) -> &str {
        "DAV error"
    }

    fn cause(&self) -> Option<&dyn Error> {
        match self {
            DavError::FsError(e) => Some(e),
            DavError::LockError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlParseError => write!(f, "XML parse error"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::UnknownDavMethod => write!(f, "unknown HTTP/DAV method"),
            DavError::Status(s) | DavError::StatusClose(s) => write!(f, "{s}"),
            DavError::FsError(e) => write!(f, "filesystem error: {e}"),
            DavError::LockError(e) => write!(f, "{e}"),
            DavError::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<LockError> for DavError {
    fn from(e: LockError) -> Self {
        DavError::LockError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_: xmltree::ParseError) -> Self {
        DavError::XmlParseError
    }
}

pub(crate) fn fserror_to_status(e: FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::Locked => StatusCode::LOCKED,
        FsError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

pub(crate) fn ioerror_to_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::FsError(e) => fserror_to_status(*e),
            DavError::LockError(e) => e.statuscode(),
            DavError::IoError(e) => ioerror_to_status(e),
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::FsError(FsError::NotFound)
                | &DavError::FsError(FsError::Forbidden)
                | &DavError::FsError(FsError::Exists)
                | &DavError::LockError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_error_status() {
        assert_eq!(LockError::BadRequest.statuscode(), StatusCode::BAD_REQUEST);
        assert_eq!(
            LockError::PreconditionFailed.statuscode(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(LockError::Locked.statuscode().as_u16(), 423);
        assert_eq!(
            LockError::Fs(FsError::NotFound).statuscode(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn sharing_violation_is_locked() {
        assert_eq!(LockError::from(FsError::Locked), LockError::Locked);
        assert_eq!(
            LockError::from(FsError::GeneralFailure),
            LockError::Fs(FsError::GeneralFailure)
        );
    }
}
