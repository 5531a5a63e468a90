//! Generation requests and their terminal results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

use stencil_core::{ErrorKind, GenerationError, HookInheritance, TemplateName, Variables};

use crate::hooks::Hook;

/// Default scheduling priority; higher runs first.
pub const DEFAULT_TASK_PRIORITY: i32 = 0;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub template: TemplateName,
    pub output_path: PathBuf,
    pub variables: Variables,
    /// Write into an existing non-empty output directory.
    pub overwrite: bool,
    pub priority: i32,
    /// Run declared, registered, and extra hooks around generation.
    pub with_hooks: bool,
    /// Hooks for this request only, run after registered and declared ones
    /// of the same priority.
    pub extra_hooks: Vec<Hook>,
    pub inheritance: HookInheritance,
}

impl GenerationRequest {
    pub fn new(template: impl Into<TemplateName>, output_path: impl Into<PathBuf>) -> Self {
        GenerationRequest {
            template: template.into(),
            output_path: output_path.into(),
            variables: Variables::new(),
            overwrite: false,
            priority: DEFAULT_TASK_PRIORITY,
            with_hooks: true,
            extra_hooks: Vec::new(),
            inheritance: HookInheritance::default(),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.with_hooks = false;
        self
    }

    pub fn with_extra_hooks(mut self, hooks: Vec<Hook>) -> Self {
        self.extra_hooks = hooks;
        self
    }

    pub fn with_inheritance(mut self, inheritance: HookInheritance) -> Self {
        self.inheritance = inheritance;
        self
    }

    /// Deduplication key while the request is in flight.
    pub fn key(&self) -> (TemplateName, PathBuf) {
        (self.template.clone(), self.output_path.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub template: TemplateName,
    pub output_path: PathBuf,
    pub generated_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub metadata: BTreeMap<String, Value>,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl GenerationResult {
    pub fn succeeded(
        template: TemplateName,
        output_path: PathBuf,
        generated_files: Vec<PathBuf>,
        duration: Duration,
    ) -> Self {
        let count = generated_files.len();
        GenerationResult {
            success: true,
            template,
            output_path,
            generated_files,
            message: Some(format!("generated {count} file(s)")),
            error_kind: None,
            suggestion: None,
            duration,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failed(
        template: TemplateName,
        output_path: PathBuf,
        kind: ErrorKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        GenerationResult {
            success: false,
            template,
            output_path,
            generated_files: Vec::new(),
            message: Some(message.into()),
            error_kind: Some(kind),
            suggestion: None,
            duration,
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_error(
        template: TemplateName,
        output_path: PathBuf,
        error: &GenerationError,
        duration: Duration,
    ) -> Self {
        let mut result = Self::failed(template, output_path, error.kind(), error.to_string(), duration);
        result.suggestion = error.suggestion();
        result
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        if suggestion.is_some() {
            self.suggestion = suggestion;
        }
        self
    }

    /// `Err(GenerationError::Failed)` for an unsuccessful result.
    pub fn into_result(self) -> Result<GenerationResult, GenerationError> {
        if self.success {
            Ok(self)
        } else {
            Err(GenerationError::Failed {
                template: self.template.to_string(),
                kind: self.error_kind.unwrap_or(ErrorKind::Unknown),
                message: self.message.unwrap_or_else(|| "generation failed".to_string()),
            })
        }
    }
}
