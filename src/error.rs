//! Hard-failure taxonomy.
//!
//! Domain outcomes (invalid token, email already in use, ...) never show up
//! here; they are mapped into the response envelope at the operation
//! boundary. This type covers the failures that must surface to the hosting
//! process instead of the caller: backend errors and API misuse.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    /// Programmer or configuration error, e.g. logging in with a field that
    /// is not in the allowed list. Never converted into an envelope.
    #[error("usage error: {0}")]
    Usage(String),

    /// Storage failure, or a store outcome that is impossible for the
    /// operation that observed it.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}
