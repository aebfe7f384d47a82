//! Error type shared by every S3 operation

use crate::s3::response::ErrorInfo;
use crate::s3::signer::RequestDiagnostics;
use hyper::StatusCode;
use thiserror::Error;

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    /// Caller supplied an unusable argument; raised before any network I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The server answered with a failure status (or an `<Error>` document).
    #[error("S3 error: {status} - {}: {}", info.code, info.message)]
    Request {
        status: StatusCode,
        info: ErrorInfo,
        diagnostics: Box<RequestDiagnostics>,
    },

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for S3Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        S3Error::Transport(err.to_string())
    }
}

impl S3Error {
    /// Structured `(code, message)` of a server-side failure.
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            S3Error::Request { info, .. } => Some(info),
            _ => None,
        }
    }

    /// Signing trace of the request that failed, when one was sent.
    pub fn diagnostics(&self) -> Option<&RequestDiagnostics> {
        match self {
            S3Error::Request { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            S3Error::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, S3Error::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;
