//! Error types for the autobucket controllers
//!
//! Errors carry the bucket or workload they concern so a failed reconcile can
//! be traced back to the object from the log line alone. Retryability drives
//! the controllers' error policy: retryable errors back off and retry,
//! everything else waits for the next change to the object.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for autobucket operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error other than a write conflict
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Optimistic-concurrency write rejected (409 Conflict)
    #[error("conflict writing {object}: {message}")]
    Conflict {
        /// Object whose stored version changed since it was read
        object: String,
        /// Message returned by the API server
        message: String,
    },

    /// Cloud storage operation failed
    #[error("adapter error [{cloud}] for bucket {bucket}: {message}")]
    Adapter {
        /// Cloud the adapter talks to (e.g. "gcp")
        cloud: String,
        /// Cloud bucket name the operation targeted
        bucket: String,
        /// Description of what failed
        message: String,
    },

    /// Bucket names a cloud with no matching variant or no configured adapter
    #[error("unrecognized cloud {cloud:?} on bucket {bucket}")]
    UnrecognizedCloud {
        /// Bucket object name
        bucket: String,
        /// Value of `spec.cloud`
        cloud: String,
    },

    /// Malformed object
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Name of the object with invalid content
        object: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "bucket-controller")
        context: String,
    },
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        match source {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                object: UNKNOWN_CONTEXT.to_string(),
                message: ae.message,
            },
            source => Self::Kube { source },
        }
    }
}

impl Error {
    /// Convert a kube error from a write to `object`
    pub fn kube_for(object: impl Into<String>, source: kube::Error) -> Self {
        match Self::from(source) {
            Self::Conflict { message, .. } => Self::conflict(object, message),
            other => other,
        }
    }

    /// Create a conflict error for the given object
    pub fn conflict(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create an adapter error with cloud and bucket context
    pub fn adapter(
        cloud: impl Into<String>,
        bucket: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Adapter {
            cloud: cloud.into(),
            bucket: bucket.into(),
            message: msg.into(),
        }
    }

    /// Create an unrecognized-cloud error
    pub fn unrecognized_cloud(bucket: impl Into<String>, cloud: impl Into<String>) -> Self {
        Self::UnrecognizedCloud {
            bucket: bucket.into(),
            cloud: cloud.into(),
        }
    }

    /// Create a validation error without object context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            object: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific object
    pub fn validation_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error without context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts, adapter failures, throttling and timeouts are transient.
    /// Other client errors, serialization and unrecognized clouds need the
    /// object to change first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae)
                    if (400..500).contains(&ae.code) && !matches!(ae.code, 408 | 429)
            ),
            Error::Conflict { .. } => true,
            Error::Adapter { .. } => true,
            Error::UnrecognizedCloud { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization(_) => false,
            Error::Internal { .. } => true,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::Conflict { .. } => "conflict",
            Error::Adapter { .. } => "adapter",
            Error::UnrecognizedCloud { .. } => "unrecognized_cloud",
            Error::Validation { .. } => "validation",
            Error::Serialization(_) => "serialization",
            Error::Internal { .. } => "internal",
        }
    }
}
