//! Kernel error types.
//!
//! Only storage failures reach the caller of
//! [`crate::Dispatcher::process`]; classifier and enricher failures are
//! degraded inside the kernel and never surface as [`KernelError`].

use parley_store::StoreError;

/// Unified error type for the dispatch kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Storage errors -----------------------------------------------------
    /// Loading or persisting a conversation context failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    // -- Enrichment errors --------------------------------------------------
    /// An enricher could not produce a result.
    #[error("enricher {enricher} failed: {reason}")]
    EnrichmentFailed { enricher: String, reason: String },

    // -- Resolver errors ----------------------------------------------------
    /// A built-in follow-up pattern failed to compile.
    #[error("invalid regex pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl KernelError {
    /// Shorthand used by enrichers.
    pub fn enrichment(enricher: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnrichmentFailed {
            enricher: enricher.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
