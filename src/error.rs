//! Error types for the load-generation core
//!
//! Two families map to the error-handling design: configuration problems are
//! reported through the detail log and the run continues on defaults, so they
//! never surface here; everything in this enum is either a construction-time
//! rejection or a fatal runtime invariant violation that aborts the run.

use thiserror::Error;

/// Result type alias for load-generation operations
pub type Result<T> = std::result::Result<T, CargarError>;

/// Error type for all load-generation operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CargarError {
    /// A requested setting combination is impossible rather than merely
    /// suspicious; the run is rejected before any query is issued.
    #[error("Invalid settings: {field}: {reason}")]
    InvalidSettings {
        /// Name of the offending setting
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A completion referenced a query id the ring does not currently hold.
    #[error("Completion for unknown query id {query_id}")]
    UnknownQuery {
        /// Query id carried by the completion
        query_id: u64,
    },

    /// A sample of a query completed more often than it was issued.
    #[error("Duplicate completion for query {query_id}")]
    DuplicateCompletion {
        /// Query id carried by the completion
        query_id: u64,
    },

    /// The issue scheduler wrapped around to a ring slot whose previous
    /// occupant has not completed yet.
    #[error("Query ring full: slot for query {query_id} still held by query {occupant}")]
    RingFull {
        /// Query id that could not be published
        query_id: u64,
        /// Query id still occupying the slot
        occupant: u64,
    },

    /// A single query would exceed the representable per-query sample count.
    #[error("Query of {samples} samples exceeds the per-query maximum of {max}")]
    QueryTooLarge {
        /// Samples the query would carry
        samples: u64,
        /// Largest representable per-query sample count
        max: u64,
    },

    /// Outstanding queries failed to complete within the drain grace window.
    #[error("Drain timed out after {waited_ms} ms with {outstanding} queries outstanding")]
    DrainTimeout {
        /// Milliseconds waited before giving up
        waited_ms: u64,
        /// Queries still outstanding at timeout
        outstanding: i64,
    },

    /// The run was aborted by a fatal invariant violation; the underlying
    /// violation is reported in the detail log.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Human-readable abort reason
        reason: String,
    },

    /// Writing to one of the injected log sinks failed.
    #[error("Log output error: {0}")]
    LogOutput(String),
}

impl From<std::io::Error> for CargarError {
    fn from(err: std::io::Error) -> Self {
        Self::LogOutput(err.to_string())
    }
}
