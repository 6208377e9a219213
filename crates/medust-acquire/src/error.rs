//! Error types for the acquisition crate.

use thiserror::Error;

/// Errors that can occur while acquiring observations.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Service returned HTTP {status} for {product} ({url})")]
    ServiceStatus {
        /// Product that was queried.
        product: String,
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The service response could not be decoded.
    #[error("Malformed service response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// CSV decoding error in a local extract.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A record carried an unparseable field.
    #[error("Invalid record in {source_name}: {reason}")]
    InvalidRecord {
        /// File or product the record came from.
        source_name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A local extract does not exist.
    #[error("No data file at {0}")]
    MissingData(String),

    /// All retry attempts failed with transient errors.
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Box<AcquireError>,
    },
}

impl AcquireError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, HTTP 429 and 5xx answers are transient.
    /// Everything else (bad responses, missing files, client errors) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            AcquireError::HttpRequest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AcquireError::ServiceStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AcquireError {
        AcquireError::ServiceStatus {
            product: "MCD19A2".to_string(),
            status: code,
            url: "https://example.org".to_string(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(status(503).is_transient());
        assert!(status(500).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
    }

    #[test]
    fn test_local_errors_not_transient() {
        assert!(!AcquireError::MissingData("x.csv".to_string()).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!AcquireError::Io(io).is_transient());
    }
}
