//! The generation backend contract.
//!
//! The engine only ever sees templates through this interface: `load` turns a
//! template name into an opaque handle plus the variable names it expects,
//! `generate` writes files for a handle into an output directory.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stencil_core::{GenerationError, TemplateName, Variables};

/// Opaque, cheaply clonable handle to a loaded template.
///
/// Only the backend that produced a handle knows its concrete type.
#[derive(Clone)]
pub struct BackendHandle {
    inner: Arc<dyn Any + Send + Sync>,
}

impl BackendHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackendHandle(..)")
    }
}

/// Result of a successful `load`.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub handle: BackendHandle,
    pub declared_variables: Vec<String>,
    /// Backend-specific facts about the bundle (file count, lineage, ...).
    pub metadata: BTreeMap<String, String>,
}

/// Turns template bundles plus variables into files on disk.
///
/// Implementations do blocking I/O; async callers should go through
/// `spawn_blocking`.
pub trait GenerationBackend: Send + Sync {
    /// Short identifier used in logs and metadata.
    fn name(&self) -> &str;

    fn load(&self, template: &TemplateName) -> Result<LoadedTemplate, GenerationError>;

    /// Write the template's files into `output_dir`, returning every path written.
    fn generate(
        &self,
        handle: &BackendHandle,
        output_dir: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, GenerationError>;
}
