//! Error taxonomy for session resolution.
//!
//! Everything a caller can observe from [`crate::resolver::SessionResolver`]
//! is one of these variants. Individual probe rejections are not surfaced
//! here; they are accumulated during resolution and only the last one is
//! reported when every role rejects the credentials.

use thiserror::Error;

use crate::auth::Role;
use crate::session::StorageError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Input rejected before any probe was issued. No network call was made.
    #[error("{0}")]
    Validation(String),

    /// Every role probe was rejected. Carries the last probe's message and
    /// the role it came from.
    #[error("{message}")]
    Auth { role: Role, message: String },

    /// The persistence layer failed. The caller must assume no session was
    /// established.
    #[error("session storage unavailable: {0}")]
    Storage(#[from] StorageError),

    /// A resolution was already in flight on this resolver.
    #[error("another login attempt is already in progress")]
    Busy,

    /// The caller went away before resolution completed; the store was not
    /// touched.
    #[error("login cancelled before completion")]
    Cancelled,
}
