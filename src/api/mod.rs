//! Helpers for hosts exposing the pipeline over HTTP
//!
//! Routing and request handling stay with the host. This module only covers the two
//! contracts at the boundary: which uploads are accepted, and how pipeline errors map
//! to response statuses and user-facing text.

pub mod response;
pub mod upload;

pub use response::{ErrorResponse, HttpErrorMapping};
pub use upload::UploadPolicy;
