//! Mapping pipeline errors onto HTTP responses

use crate::error::{BgRemovalError, ErrorKind};
use serde::Serialize;

/// Status code and user-facing message for a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
}

/// Error-to-status mapping
pub struct HttpErrorMapping;

impl HttpErrorMapping {
    /// Status code for an error kind
    ///
    /// Cancellation uses 499 (client closed request).
    #[must_use]
    pub fn status_for(kind: ErrorKind) -> u16 {
        match kind {
            ErrorKind::Configuration => 503,
            ErrorKind::InputTooLarge => 413,
            ErrorKind::InvalidInput => 422,
            ErrorKind::Unknown => 500,
            ErrorKind::Cancelled => 499,
        }
    }

    #[must_use]
    pub fn from_error(error: &BgRemovalError) -> ErrorResponse {
        ErrorResponse {
            status: Self::status_for(error.kind()),
            message: error.user_message(),
        }
    }
}
