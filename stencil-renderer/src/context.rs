//! Render context: caller variables plus built-ins.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stencil_core::{TemplateName, Variables};

use crate::error::BackendError;

/// Values every template can reference regardless of its schema.
#[derive(Debug, Clone, Serialize)]
pub struct Builtins {
    pub template_name: String,
    pub output_path: String,
    pub generated_at: DateTime<Utc>,
    pub stencil_version: String,
}

/// Rendering payload for one generation.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub variables: Variables,
    pub builtins: Builtins,
}

impl RenderContext {
    pub fn new(template: &TemplateName, output_dir: &Path, variables: &Variables) -> Self {
        RenderContext {
            variables: variables.clone(),
            builtins: Builtins {
                template_name: template.0.clone(),
                output_path: output_dir.display().to_string(),
                generated_at: Utc::now(),
                stencil_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Convert to a [`tera::Context`]. Caller variables shadow built-ins.
    pub fn to_tera_context(&self) -> Result<tera::Context, BackendError> {
        let mut ctx = tera::Context::from_serialize(&self.builtins)?;
        ctx.extend(tera::Context::from_serialize(&self.variables)?);
        Ok(ctx)
    }
}
