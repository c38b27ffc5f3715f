// src/error.rs
//! Crate-wide error type.
//!
//! The residency manager itself never panics and almost never returns a
//! hard error — most failure modes (`UnknownId`, `NoInstantiator`,
//! `BackpressureSkip`) are represented as sentinel return values or silent
//! no-ops per the Coordinator's fire-and-forget contract. `ResidencyError`
//! exists for the one call that can fail outright: opening a file during
//! path-based registration.

use thiserror::Error;

/// Errors surfaced by the crate's `Result`-returning entry points.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResidencyError {
    /// Opening or reading the backing file for `register_from_path` failed.
    #[error("invalid asset source: {0}")]
    InvalidSource(#[from] std::io::Error),

    /// Catch-all for integrations that want to surface a foreign error
    /// through the same `Result` alias.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ResidencyError {
    #[inline]
    pub fn is_invalid_source(&self) -> bool {
        matches!(self, ResidencyError::InvalidSource(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ResidencyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_source_predicate() {
        let err: ResidencyError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.is_invalid_source());
    }

    #[test]
    fn display_delegates_to_thiserror() {
        let err: ResidencyError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(err.to_string().contains("invalid asset source"));
    }
}
