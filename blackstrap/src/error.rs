//! Error type for the aggregation and synthesis pipeline.
//!
//! Source adapters and completion calls fail softly inside the pipeline and never surface here.
//! What remains is what a caller has to act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The completion service credential was absent or blank at construction time.
    #[error("missing completion service credential (set {0})")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A record could not be saved or loaded.
    #[error("persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("synthesis cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
