//! Error taxonomy shared by every Stencil crate.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::VariableIssue;

/// Classification of a failure, used for recovery dispatch and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TemplateNotFound,
    InvalidTemplateFormat,
    VariableValidationFailed,
    OutputPathConflict,
    FileSystemError,
    PermissionError,
    BackendFailure,
    HookExecutionError,
    HookTimeout,
    NetworkError,
    Unknown,
}

impl ErrorKind {
    /// All kinds in a stable order.
    pub fn all() -> &'static [ErrorKind] {
        &[
            ErrorKind::TemplateNotFound,
            ErrorKind::InvalidTemplateFormat,
            ErrorKind::VariableValidationFailed,
            ErrorKind::OutputPathConflict,
            ErrorKind::FileSystemError,
            ErrorKind::PermissionError,
            ErrorKind::BackendFailure,
            ErrorKind::HookExecutionError,
            ErrorKind::HookTimeout,
            ErrorKind::NetworkError,
            ErrorKind::Unknown,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TemplateNotFound => "template_not_found",
            ErrorKind::InvalidTemplateFormat => "invalid_template_format",
            ErrorKind::VariableValidationFailed => "variable_validation_failed",
            ErrorKind::OutputPathConflict => "output_path_conflict",
            ErrorKind::FileSystemError => "file_system_error",
            ErrorKind::PermissionError => "permission_error",
            ErrorKind::BackendFailure => "backend_failure",
            ErrorKind::HookExecutionError => "hook_execution_error",
            ErrorKind::HookTimeout => "hook_timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Every error that can surface from template loading or generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("template '{name}' not found")]
    TemplateNotFound { name: String },

    #[error("invalid template format at {path}: {reason}")]
    InvalidTemplateFormat { path: PathBuf, reason: String },

    #[error("variable validation failed for '{template}': {}", join_issues(.issues))]
    VariableValidation {
        template: String,
        issues: Vec<VariableIssue>,
    },

    /// Output directory exists and is not empty, and overwrite was not requested.
    #[error("output path {path} already exists and is not empty")]
    OutputPathConflict { path: PathBuf },

    #[error("filesystem error during {operation} at {path}: {source}")]
    FileSystem {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("permission denied during {operation} at {path}: {source}")]
    Permission {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backend failure for '{template}': {message}")]
    Backend { template: String, message: String },

    #[error("hook '{hook}' failed: {message}")]
    HookExecution { hook: String, message: String },

    #[error("hook '{hook}' timed out after {timeout_ms}ms")]
    HookTimeout { hook: String, timeout_ms: u64 },

    #[error("network error: {message}")]
    Network { message: String },

    /// A failure whose kind was reported by a finished generation result.
    #[error("generation of '{template}' failed ({kind}): {message}")]
    Failed {
        template: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("{message}")]
    Unknown { message: String },
}

fn join_issues(issues: &[VariableIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            GenerationError::InvalidTemplateFormat { .. } => ErrorKind::InvalidTemplateFormat,
            GenerationError::VariableValidation { .. } => ErrorKind::VariableValidationFailed,
            GenerationError::OutputPathConflict { .. } => ErrorKind::OutputPathConflict,
            GenerationError::FileSystem { .. } => ErrorKind::FileSystemError,
            GenerationError::Permission { .. } => ErrorKind::PermissionError,
            GenerationError::Backend { .. } => ErrorKind::BackendFailure,
            GenerationError::HookExecution { .. } => ErrorKind::HookExecutionError,
            GenerationError::HookTimeout { .. } => ErrorKind::HookTimeout,
            GenerationError::Network { .. } => ErrorKind::NetworkError,
            GenerationError::Failed { kind, .. } => *kind,
            GenerationError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Filesystem path the error refers to, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            GenerationError::InvalidTemplateFormat { path, .. }
            | GenerationError::OutputPathConflict { path }
            | GenerationError::FileSystem { path, .. }
            | GenerationError::Permission { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Static, kind-level hint shown when no recovery strategy produced one.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            GenerationError::TemplateNotFound { .. } => {
                Some("run `stencil list` to see available templates".to_string())
            }
            GenerationError::OutputPathConflict { .. } => Some(
                "retry with a different output path or pass --overwrite".to_string(),
            ),
            GenerationError::VariableValidation { issues, .. } => Some(format!(
                "provide values for: {}",
                issues
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            GenerationError::Permission { path, .. } => Some(format!(
                "check write permissions on {}",
                path.display()
            )),
            _ => None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        GenerationError::Unknown {
            message: message.into(),
        }
    }
}

/// Wrap an I/O error with the operation and path it happened on.
///
/// `PermissionDenied` is classified as [`ErrorKind::PermissionError`]; every
/// other I/O failure is a [`ErrorKind::FileSystemError`].
pub fn io_err(
    operation: impl Into<String>,
    path: impl Into<PathBuf>,
    source: std::io::Error,
) -> GenerationError {
    let operation = operation.into();
    let path = path.into();
    if source.kind() == std::io::ErrorKind::PermissionDenied {
        GenerationError::Permission {
            operation,
            path,
            source,
        }
    } else {
        GenerationError::FileSystem {
            operation,
            path,
            source,
        }
    }
}
