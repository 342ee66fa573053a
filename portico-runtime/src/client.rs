//! The status write seam between reconcilers and the API server.
use async_trait::async_trait;
use portico_core::HasStatus;
use std::sync::Arc;
use thiserror::Error;

/// Type-erased transport or server error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure modes of a status write
#[derive(Debug, Error)]
pub enum StatusError {
    /// The object changed since it was read; retry against the latest revision
    #[error("conflicting write: {0}")]
    Conflict(String),
    /// Any other failure that may succeed on a later attempt
    #[error("transient failure: {0}")]
    Transient(#[source] BoxError),
}

impl StatusError {
    /// Classifies an HTTP-style status code returned by a status write
    ///
    /// `409 Conflict` maps to [`StatusError::Conflict`], everything else is transient.
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == 409 {
            StatusError::Conflict(message)
        } else {
            StatusError::Transient(format!("status write failed with {code}: {message}").into())
        }
    }

    /// Whether this is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StatusError::Conflict(_))
    }
}

/// Writes the status subresource of objects of kind `K`
///
/// Implementations must send the object's `resourceVersion` as a precondition so that
/// concurrent writers surface as [`StatusError::Conflict`].
#[async_trait]
pub trait StatusWriter<K>: Send + Sync
where
    K: HasStatus + Sync,
    K::Status: Send,
{
    /// Replaces the status of `obj` with `status`, returning the new resourceVersion
    async fn update_status(&self, obj: &K, status: K::Status) -> Result<String, StatusError>;
}

#[async_trait]
impl<K, W> StatusWriter<K> for Arc<W>
where
    K: HasStatus + Sync,
    K::Status: Send,
    W: StatusWriter<K> + ?Sized,
{
    async fn update_status(&self, obj: &K, status: K::Status) -> Result<String, StatusError> {
        (**self).update_status(obj, status).await
    }
}
