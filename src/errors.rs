use crate::StatusCode;
use std::{error, fmt};

/// Everything that can go wrong between the first socket read and the
/// handler invocation. Each variant collapses to the status code of the
/// default response the driver emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    // Protocol errors
    InvalidProxyHeader,
    InvalidRequestLine,
    InvalidHeader,
    InvalidUrlEncoding,
    InvalidContentLength,
    MissingContentLength,
    BodyMissing,

    // Policy errors
    MethodNotAllowed,
    NotAuthorized,

    // Lookup errors
    NotFound,

    // Resource errors
    RequestTooLarge,
    BodyTooLarge,

    // Time errors
    SlowClient,

    // Transport errors surfaced as a response
    ReadFailure,

    // Unsupported features
    BodyNotBuffered,

    // Rewrite divergence
    RewriteLoop,
}

impl ErrorKind {
    #[inline]
    pub(crate) const fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidProxyHeader
            | ErrorKind::InvalidRequestLine
            | ErrorKind::InvalidHeader
            | ErrorKind::InvalidUrlEncoding
            | ErrorKind::InvalidContentLength
            | ErrorKind::MissingContentLength
            | ErrorKind::BodyMissing
            | ErrorKind::ReadFailure => StatusCode::BadRequest,

            ErrorKind::MethodNotAllowed => StatusCode::MethodNotAllowed,
            ErrorKind::NotAuthorized => StatusCode::Unauthorized,
            ErrorKind::NotFound => StatusCode::NotFound,

            ErrorKind::RequestTooLarge | ErrorKind::BodyTooLarge => StatusCode::PayloadTooLarge,
            ErrorKind::SlowClient => StatusCode::RequestTimeout,

            ErrorKind::BodyNotBuffered => StatusCode::NotImplemented,
            ErrorKind::RewriteLoop => StatusCode::InternalServerError,
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_taxonomy() {
        #[rustfmt::skip]
        let cases = [
            (ErrorKind::InvalidRequestLine,   StatusCode::BadRequest),
            (ErrorKind::InvalidProxyHeader,   StatusCode::BadRequest),
            (ErrorKind::InvalidUrlEncoding,   StatusCode::BadRequest),
            (ErrorKind::MethodNotAllowed,     StatusCode::MethodNotAllowed),
            (ErrorKind::NotAuthorized,        StatusCode::Unauthorized),
            (ErrorKind::NotFound,             StatusCode::NotFound),
            (ErrorKind::RequestTooLarge,      StatusCode::PayloadTooLarge),
            (ErrorKind::BodyTooLarge,         StatusCode::PayloadTooLarge),
            (ErrorKind::SlowClient,           StatusCode::RequestTimeout),
            (ErrorKind::BodyNotBuffered,      StatusCode::NotImplemented),
            (ErrorKind::RewriteLoop,          StatusCode::InternalServerError),
        ];

        for (kind, status) in cases {
            assert_eq!(kind.status(), status);
        }
    }
}
