//! Tera generation backend.
//!
//! # Bundle mapping
//!
//! | Bundle file (under `files/`) | Output (under the output dir)           |
//! |------------------------------|-----------------------------------------|
//! | `src/lib.rs.tera`            | `src/lib.rs`, rendered                  |
//! | `{{crate_name}}/mod.rs.tera` | `<crate_name>/mod.rs`, path rendered too |
//! | `assets/logo.png`            | `assets/logo.png`, copied verbatim      |
//!
//! Bundles that `extends` a parent inherit the parent's files; a child file
//! with the same relative path replaces the parent's.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use tera::Tera;

use stencil_core::{
    DescriptorSource, GenerationError, TemplateLibrary, TemplateName, Variables,
};

use crate::backend::{BackendHandle, GenerationBackend, LoadedTemplate};
use crate::context::RenderContext;
use crate::error::{io_error, BackendError};
use crate::writer;

const TERA_SUFFIX: &str = ".tera";

// ---------------------------------------------------------------------------
// Bundle loading helpers
// ---------------------------------------------------------------------------

fn normalize_relative(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn collect_bundle_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), BackendError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_error("read bundle", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error("read bundle", dir, e))?;
        let path = entry.path();
        let meta = entry
            .metadata()
            .map_err(|e| io_error("read bundle", &path, e))?;
        if meta.is_dir() {
            collect_bundle_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// One output file of a compiled bundle.
#[derive(Debug, Clone)]
enum BundleEntry {
    /// Rendered through the named Tera template.
    Render { template: String, relative: String },
    /// Copied byte for byte.
    Copy { source: PathBuf, relative: String },
}

impl BundleEntry {
    fn relative(&self) -> &str {
        match self {
            BundleEntry::Render { relative, .. } | BundleEntry::Copy { relative, .. } => relative,
        }
    }
}

/// What a [`BackendHandle`] from this backend holds.
struct CompiledBundle {
    name: TemplateName,
    tera: Tera,
    entries: Vec<BundleEntry>,
}

fn compile_bundle(
    name: &TemplateName,
    bundle_dirs: &[PathBuf],
) -> Result<CompiledBundle, BackendError> {
    // Relative output path → entry; later directories (children) win.
    let mut entries: BTreeMap<String, BundleEntry> = BTreeMap::new();
    let mut sources: HashMap<String, String> = HashMap::new();

    for dir in bundle_dirs {
        if !dir.exists() {
            continue;
        }
        let mut files = Vec::new();
        collect_bundle_files(dir, &mut files)?;
        for path in files {
            let rel = normalize_relative(path.strip_prefix(dir).unwrap_or(path.as_path()));
            if let Some(stripped) = rel.strip_suffix(TERA_SUFFIX).map(str::to_string) {
                let contents =
                    std::fs::read_to_string(&path).map_err(|e| io_error("read template", &path, e))?;
                sources.insert(rel.clone(), contents);
                entries.insert(
                    stripped.clone(),
                    BundleEntry::Render {
                        template: rel,
                        relative: stripped,
                    },
                );
            } else {
                entries.insert(
                    rel.clone(),
                    BundleEntry::Copy {
                        source: path,
                        relative: rel,
                    },
                );
            }
        }
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(sources.into_iter().collect::<Vec<_>>())?;
    Ok(CompiledBundle {
        name: name.clone(),
        tera,
        entries: entries.into_values().collect(),
    })
}

/// Render `{{ var }}` placeholders in a relative path and make sure the result
/// stays inside the output directory.
fn render_relative(relative: &str, ctx: &tera::Context) -> Result<PathBuf, BackendError> {
    let rendered = if relative.contains("{{") {
        Tera::one_off(relative, ctx, false)?
    } else {
        relative.to_string()
    };
    let path = PathBuf::from(&rendered);
    let escapes = rendered.trim().is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(BackendError::UnsafePath { path: rendered });
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// TeraBackend
// ---------------------------------------------------------------------------

/// Generation backend that renders bundle files with Tera.
///
/// `load` parses every `.tera` file of the bundle (and its ancestors) into one
/// `Tera` instance, so the handle it returns is ready to render without
/// touching the template sources again.
#[derive(Debug, Clone)]
pub struct TeraBackend {
    library: TemplateLibrary,
}

impl TeraBackend {
    pub fn new(library: TemplateLibrary) -> Self {
        TeraBackend { library }
    }

    fn load_inner(&self, name: &TemplateName) -> Result<LoadedTemplate, GenerationError> {
        let resolved = self.library.load_descriptor(name)?;
        let bundle_dirs: Vec<PathBuf> = resolved
            .lineage
            .iter()
            .map(|ancestor| self.library.files_dir(ancestor))
            .collect();

        let bundle =
            compile_bundle(name, &bundle_dirs).map_err(|e| e.into_generation(&name.0))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("backend".to_string(), "tera".to_string());
        metadata.insert("files".to_string(), bundle.entries.len().to_string());
        metadata.insert("version".to_string(), resolved.descriptor.version.clone());
        metadata.insert(
            "lineage".to_string(),
            resolved
                .lineage
                .iter()
                .map(|n| n.0.as_str())
                .collect::<Vec<_>>()
                .join(" > "),
        );

        tracing::debug!(template = %name, files = bundle.entries.len(), "compiled bundle");
        Ok(LoadedTemplate {
            handle: BackendHandle::new(bundle),
            declared_variables: resolved.descriptor.declared_variables(),
            metadata,
        })
    }

    fn generate_inner(
        bundle: &CompiledBundle,
        output_dir: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, BackendError> {
        let ctx = RenderContext::new(&bundle.name, output_dir, variables).to_tera_context()?;
        std::fs::create_dir_all(output_dir)
            .map_err(|e| io_error("create output directory", output_dir, e))?;

        let mut written = Vec::with_capacity(bundle.entries.len());
        for entry in &bundle.entries {
            let dest = output_dir.join(render_relative(entry.relative(), &ctx)?);
            match entry {
                BundleEntry::Render { template, .. } => {
                    let content = bundle.tera.render(template, &ctx)?;
                    writer::write_rendered(&dest, &content)?;
                }
                BundleEntry::Copy { source, .. } => {
                    let bytes =
                        std::fs::read(source).map_err(|e| io_error("read bundle file", source, e))?;
                    writer::atomic_write(&dest, &bytes)?;
                }
            }
            written.push(dest);
        }
        Ok(written)
    }
}

impl GenerationBackend for TeraBackend {
    fn name(&self) -> &str {
        "tera"
    }

    fn load(&self, template: &TemplateName) -> Result<LoadedTemplate, GenerationError> {
        self.load_inner(template)
    }

    fn generate(
        &self,
        handle: &BackendHandle,
        output_dir: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, GenerationError> {
        let bundle = handle
            .downcast_ref::<CompiledBundle>()
            .ok_or_else(|| BackendError::ForeignHandle.into_generation("<unknown>"))?;
        Self::generate_inner(bundle, output_dir, variables)
            .map_err(|e| e.into_generation(&bundle.name.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
