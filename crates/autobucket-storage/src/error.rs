//! Storage adapter errors

use thiserror::Error;

/// Errors from cloud storage calls
#[derive(Debug, Error)]
pub enum StorageError {
    /// Transport failure (DNS, TLS, timeout, connection reset)
    #[error("{operation} request failed: {source}")]
    Http {
        /// Operation being attempted (e.g. "insert bucket")
        operation: &'static str,
        /// Underlying client error
        source: reqwest::Error,
    },

    /// The storage API answered with an unexpected status
    #[error("{operation} on {bucket} returned {status}: {body}")]
    Status {
        /// Operation being attempted
        operation: &'static str,
        /// Bucket the request targeted
        bucket: String,
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// No usable credentials
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// Adapter misconfigured (bad endpoint, missing project)
    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// Response body could not be decoded
    #[error("malformed {operation} response: {message}")]
    Malformed {
        /// Operation whose response was unreadable
        operation: &'static str,
        /// Decoder message
        message: String,
    },
}

impl StorageError {
    /// Wrap a transport error for `operation`
    pub fn http(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Http { operation, source }
    }

    /// Status code carried by the error, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_names_operation_and_bucket() {
        let err = StorageError::Status {
            operation: "delete object",
            bucket: "ab-default-web".to_string(),
            status: 403,
            body: "forbidden".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("delete object"));
        assert!(msg.contains("ab-default-web"));
        assert!(msg.contains("403"));
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn config_error_has_no_status() {
        let err = StorageError::Config("GCP_PROJECT is required".to_string());
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("GCP_PROJECT"));
    }
}
