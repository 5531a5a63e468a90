//! Error types for stencil-renderer.

use std::path::PathBuf;

use thiserror::Error;

use stencil_core::{io_err, GenerationError};

/// All errors that can arise inside the Tera backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Tera template engine error (parse at load time, render at generate time).
    #[error("template engine error: {}", error_chain(.0))]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building the tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while reading a bundle or writing output.
    #[error("{operation} failed at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rendered file path would land outside the output directory.
    #[error("rendered path escapes the output directory: {path}")]
    UnsafePath { path: String },

    /// The handle was not produced by this backend.
    #[error("handle does not belong to the tera backend")]
    ForeignHandle,
}

impl BackendError {
    /// Classify into the shared taxonomy; I/O keeps its operation and path.
    pub fn into_generation(self, template: &str) -> GenerationError {
        match self {
            BackendError::Io {
                operation,
                path,
                source,
            } => io_err(operation, path, source),
            other => GenerationError::Backend {
                template: template.to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub(crate) fn io_error(
    operation: &'static str,
    path: impl Into<PathBuf>,
    source: std::io::Error,
) -> BackendError {
    BackendError::Io {
        operation,
        path: path.into(),
        source,
    }
}

/// Tera hides the useful part of its errors in the source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
