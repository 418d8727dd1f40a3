//! Error types for the reconciliation engine
//!
//! Two layers:
//! - [`RemoteError`]: what the remote object store reported for one call
//! - [`ReconcileError`]: why a step asked for another attempt

/// Failure of a single remote object store call
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// Optimistic-concurrency clash on the resource version
    #[error("conflict on {kind} '{name}': {message}")]
    Conflict {
        /// Kind of the contended object
        kind: String,
        /// Name of the contended object
        name: String,
        /// Server message
        message: String,
    },

    /// Server-side apply found fields owned by another manager
    #[error("field manager '{manager}' does not own the conflicting fields of '{name}': {message}")]
    OwnershipConflict {
        /// Field manager that attempted the apply
        manager: String,
        /// Name of the applied object
        name: String,
        /// Server message
        message: String,
    },

    /// Caller is not allowed to perform the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request was rejected as malformed
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Network or server fault
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The attempt deadline expired before the call completed
    #[error("reconcile deadline exceeded")]
    DeadlineExceeded,

    /// Object could not be converted to or from its wire form
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl RemoteError {
    /// Check if the object was missing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the call lost an optimistic-concurrency race
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if retrying the same call later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::OwnershipConflict { .. }
                | Self::Transient(_)
                | Self::DeadlineExceeded
        )
    }

    /// Map a Kubernetes client error onto the taxonomy
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => Self::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 => Self::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    message: response.message,
                },
                403 => Self::Forbidden(response.message),
                400 | 422 => Self::Invalid(response.message),
                _ => Self::Transient(format!("{} ({})", response.message, response.code)),
            },
            kube::Error::SerdeError(e) => Self::Serialization(e.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reason a step requested another reconciliation attempt
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A remote call failed
    #[error("{context}: {source}")]
    Remote {
        /// What the step was doing
        context: String,
        /// Underlying remote failure
        #[source]
        source: RemoteError,
    },

    /// A step read a data slot that no earlier step filled
    #[error("slot '{slot}' read before it was filled")]
    MissingSlot {
        /// Slot name
        slot: &'static str,
    },

    /// Invalid desired state reached the engine; admission should have rejected it
    #[error("validation error reached reconcile: {0}")]
    Validation(String),

    /// Pipeline could not be assembled
    #[error("pipeline construction failed: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    /// Any other step failure
    #[error("{0}")]
    Failed(String),
}

impl ReconcileError {
    /// Wrap a remote failure with what was being attempted
    pub fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            context: context.into(),
            source,
        }
    }

    /// Check if this is an optimistic-concurrency clash
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_conflict())
    }

    /// Check if the host scheduler should retry with backoff
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { source, .. } => source.is_retryable() || source.is_not_found(),
            Self::MissingSlot { .. } | Self::Validation(_) | Self::Pipeline(_) => false,
            Self::Failed(_) => true,
        }
    }
}
