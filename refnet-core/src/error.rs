//! Error types for the refnet core library.

use thiserror::Error;

/// Top-level error type for all refnet operations.
///
/// Data-quality problems (unresolved names, malformed cached bundles) are
/// reported as structured warnings alongside results, never through this
/// type. Only contract breaches and infrastructure failures surface here.
#[derive(Error, Debug)]
pub enum RefnetError {
    /// An event violating a structural invariant reached the matrix builder.
    /// This signals an upstream contract breach, not a data-quality issue.
    #[error("Invariant violation: {0}")]
    InvariantViolation(InvariantViolation),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite cache store error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The structural invariants enforced at the matrix-builder boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// An event where giver and receiver are the same member.
    #[error("self-edge for member {member} in period {period}")]
    SelfEdge {
        /// The member appearing on both sides of the edge.
        member: String,
        /// Period the offending event was reported in.
        period: String,
    },

    /// An event whose parties or marker belong to a different chapter.
    #[error("cross-chapter event (expected chapter {expected}, got {actual})")]
    CrossChapter {
        /// Chapter the builder was invoked for.
        expected: String,
        /// Chapter carried by the offending event.
        actual: String,
    },
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, RefnetError>;
