//! Error types for the metrics boundary.

use thiserror::Error;

/// Result type alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors that can occur while acquiring or parsing a snapshot.
///
/// All of these are transient from the monitor loop's point of view:
/// the cycle is aborted and the next poll starts from scratch.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metrics stream: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed metric element: {0}")]
    Malformed(String),
}
