//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use stencil_core::{
    DescriptorSource, GenerationError, ResolvedDescriptor, TemplateDescriptor, TemplateLister,
    TemplateName, TemplateScaffolder, Variables,
};
use stencil_renderer::{BackendHandle, GenerationBackend, LoadedTemplate};

/// Counts calls, fails on demand, and writes one file per generation.
#[derive(Default)]
pub(crate) struct FakeBackend {
    loads: Mutex<HashMap<String, usize>>,
    generates: Mutex<HashMap<String, usize>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_generates: Mutex<HashMap<String, usize>>,
    last_variables: Mutex<Option<Variables>>,
    load_delay: Mutex<Duration>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_load(&self, name: &str) {
        self.failing_loads.lock().unwrap().insert(name.to_string());
    }

    /// Fail the next `times` generations of `name`.
    pub(crate) fn fail_generate(&self, name: &str, times: usize) {
        self.failing_generates
            .lock()
            .unwrap()
            .insert(name.to_string(), times);
    }

    pub(crate) fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock().unwrap() = delay;
    }

    pub(crate) fn load_count(&self, name: &str) -> usize {
        self.loads.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub(crate) fn generate_count(&self, name: &str) -> usize {
        self.generates.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub(crate) fn last_variables(&self) -> Option<Variables> {
        self.last_variables.lock().unwrap().clone()
    }
}

impl GenerationBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn load(&self, template: &TemplateName) -> Result<LoadedTemplate, GenerationError> {
        *self.loads.lock().unwrap().entry(template.to_string()).or_default() += 1;
        let delay = *self.load_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.failing_loads.lock().unwrap().contains(template.as_str()) {
            return Err(GenerationError::Backend {
                template: template.to_string(),
                message: "load failed".into(),
            });
        }
        Ok(LoadedTemplate {
            handle: BackendHandle::new(template.to_string()),
            declared_variables: Vec::new(),
            metadata: BTreeMap::from([("backend".to_string(), "fake".to_string())]),
        })
    }

    fn generate(
        &self,
        handle: &BackendHandle,
        output_dir: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, GenerationError> {
        let name = handle
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        *self.generates.lock().unwrap().entry(name.clone()).or_default() += 1;
        *self.last_variables.lock().unwrap() = Some(variables.clone());

        std::fs::create_dir_all(output_dir)
            .map_err(|e| stencil_core::io_err("create directory", output_dir, e))?;

        let should_fail = {
            let mut failing = self.failing_generates.lock().unwrap();
            match failing.get_mut(&name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            let _ = std::fs::write(output_dir.join("partial.txt"), "partial");
            return Err(GenerationError::Backend {
                template: name,
                message: "render failed".into(),
            });
        }

        let path = output_dir.join(format!("{name}.txt"));
        let body = serde_json::to_string(variables).unwrap_or_default();
        std::fs::write(&path, body).map_err(|e| stencil_core::io_err("write", &path, e))?;
        Ok(vec![path])
    }
}

/// Descriptors held in memory; scaffolding inserts an empty descriptor.
#[derive(Default)]
pub(crate) struct FakeLibrary {
    templates: Mutex<BTreeMap<TemplateName, TemplateDescriptor>>,
}

impl FakeLibrary {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_templates(names: &[&str]) -> Self {
        let library = Self::new();
        for name in names {
            library.insert(TemplateDescriptor::empty(*name));
        }
        library
    }

    pub(crate) fn insert(&self, descriptor: TemplateDescriptor) {
        self.templates
            .lock()
            .unwrap()
            .insert(descriptor.name.clone(), descriptor);
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.templates
            .lock()
            .unwrap()
            .contains_key(&TemplateName::from(name))
    }
}

impl TemplateLister for FakeLibrary {
    fn available_templates(&self) -> Result<Vec<TemplateName>, GenerationError> {
        Ok(self.templates.lock().unwrap().keys().cloned().collect())
    }
}

impl DescriptorSource for FakeLibrary {
    fn load_descriptor(&self, name: &TemplateName) -> Result<ResolvedDescriptor, GenerationError> {
        let descriptor = self
            .templates
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| GenerationError::TemplateNotFound {
                name: name.to_string(),
            })?;
        Ok(ResolvedDescriptor {
            own_hooks: descriptor.hooks.clone(),
            lineage: vec![name.clone()],
            descriptor,
        })
    }
}

impl TemplateScaffolder for FakeLibrary {
    fn scaffold(&self, name: &TemplateName) -> Result<TemplateDescriptor, GenerationError> {
        let descriptor = TemplateDescriptor::empty(name.clone());
        self.insert(descriptor.clone());
        Ok(descriptor)
    }
}
