//! Error taxonomy for the reflection pipeline.
//!
//! Pure computation stages never swallow failures: malformed input surfaces as
//! [`ProbeError::InputShape`] or [`ProbeError::Validation`], artifact access as
//! [`ProbeError::Io`]. "Nothing to compute" (a single turn, an empty dialogue)
//! is not an error and is reported through empty results instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// Input has the wrong shape (head count mismatch, missing tokens, empty rows).
    #[error("input shape error: {0}")]
    InputShape(String),

    /// Collections that must describe the same turns disagree.
    #[error("validation error: {0}")]
    Validation(String),

    /// Artifact could not be read or written.
    #[error("failed to access {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact payload could not be encoded or decoded.
    #[error("failed to (de)serialize {path}: {source}", path = .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The inference collaborator failed.
    #[error("model inference failed: {0}")]
    Model(String),

    /// Configuration is malformed or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type ProbeResult<T> = Result<T, ProbeError>;

impl ProbeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }

    /// `true` for failures caused by the caller's data rather than the environment.
    pub fn is_bad_input(&self) -> bool {
        matches!(self, Self::InputShape(_) | Self::Validation(_))
    }
}
