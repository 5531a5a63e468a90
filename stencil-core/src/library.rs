//! On-disk template library.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   <template_name>/
//!     template.yaml       (descriptor: schema, hooks, optional `extends`)
//!     files/              (bundle contents handed to the generation backend)
//! ```
//!
//! # API pattern
//!
//! Free functions take an explicit `root: &Path` (`*_at`) so tests can point
//! them at a `TempDir`. [`TemplateLibrary`] wraps a root and implements the
//! narrow capability traits the engine depends on.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, GenerationError};
use crate::types::{
    HookDeclaration, HookInheritance, HookStage, TemplateDescriptor, TemplateName, VariableSpec,
    VariableType,
};

pub const DESCRIPTOR_FILE: &str = "template.yaml";
pub const FILES_DIR: &str = "files";

// ---------------------------------------------------------------------------
// 1. Capabilities
// ---------------------------------------------------------------------------

/// Lists the template names that can be generated.
pub trait TemplateLister: Send + Sync {
    fn available_templates(&self) -> Result<Vec<TemplateName>, GenerationError>;
}

/// Loads a descriptor with its `extends` chain resolved.
pub trait DescriptorSource: Send + Sync {
    fn load_descriptor(&self, name: &TemplateName) -> Result<ResolvedDescriptor, GenerationError>;
}

/// Creates a minimal template bundle for a name that does not exist yet.
pub trait TemplateScaffolder: Send + Sync {
    fn scaffold(&self, name: &TemplateName) -> Result<TemplateDescriptor, GenerationError>;
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<root>/<name>/`
pub fn template_dir_at(root: &Path, name: &TemplateName) -> PathBuf {
    root.join(&name.0)
}

/// `<root>/<name>/template.yaml`
pub fn descriptor_path_at(root: &Path, name: &TemplateName) -> PathBuf {
    template_dir_at(root, name).join(DESCRIPTOR_FILE)
}

/// `<root>/<name>/files/`
pub fn files_dir_at(root: &Path, name: &TemplateName) -> PathBuf {
    template_dir_at(root, name).join(FILES_DIR)
}

/// `~/.stencil/templates`, or `None` when no home directory is known.
pub fn default_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".stencil").join("templates"))
}

/// Names are single path components; anything else cannot name a bundle.
fn is_valid_name(name: &TemplateName) -> bool {
    let s = name.as_str();
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load a single descriptor without resolving `extends`.
///
/// Returns `TemplateNotFound` if the bundle or its descriptor is absent and
/// `InvalidTemplateFormat` (with the YAML error) if it does not parse or its
/// `name` disagrees with the directory.
pub fn load_descriptor_at(
    root: &Path,
    name: &TemplateName,
) -> Result<TemplateDescriptor, GenerationError> {
    if !is_valid_name(name) {
        return Err(GenerationError::TemplateNotFound {
            name: name.0.clone(),
        });
    }
    let path = descriptor_path_at(root, name);
    if !path.exists() {
        return Err(GenerationError::TemplateNotFound {
            name: name.0.clone(),
        });
    }
    let contents =
        std::fs::read_to_string(&path).map_err(|e| io_err("read descriptor", &path, e))?;
    let descriptor: TemplateDescriptor =
        serde_yaml::from_str(&contents).map_err(|e| GenerationError::InvalidTemplateFormat {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    if &descriptor.name != name {
        return Err(GenerationError::InvalidTemplateFormat {
            path,
            reason: format!(
                "descriptor declares name '{}' but lives in directory '{}'",
                descriptor.name, name
            ),
        });
    }
    Ok(descriptor)
}

/// Names of every bundle under `root` that has a descriptor, sorted.
pub fn list_templates_at(root: &Path) -> Result<Vec<TemplateName>, GenerationError> {
    if !root.exists() {
        return Ok(vec![]);
    }
    let entries = std::fs::read_dir(root).map_err(|e| io_err("list templates", root, e))?;
    let mut names: Vec<TemplateName> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| e.path().join(DESCRIPTOR_FILE).is_file())
        .map(|e| TemplateName::from(e.file_name().to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------------
// 4. Inheritance
// ---------------------------------------------------------------------------

/// A descriptor merged with its ancestors.
///
/// `descriptor.variables` holds the merged schema (child wins) and
/// `descriptor.hooks` the chain's hooks, ancestors first. `own_hooks` keeps the
/// template's own declarations for [`HookInheritance::SelfOnly`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDescriptor {
    pub descriptor: TemplateDescriptor,
    pub own_hooks: BTreeMap<HookStage, Vec<HookDeclaration>>,
    /// Template names from the root ancestor down to this template.
    pub lineage: Vec<TemplateName>,
}

impl ResolvedDescriptor {
    /// Declared hooks for `stage` under the given inheritance mode.
    pub fn hooks(&self, stage: HookStage, inheritance: HookInheritance) -> Vec<HookDeclaration> {
        match inheritance {
            HookInheritance::Chain => self.descriptor.hooks_for(stage).to_vec(),
            HookInheritance::SelfOnly => self.own_hooks.get(&stage).cloned().unwrap_or_default(),
            HookInheritance::Disabled => Vec::new(),
        }
    }
}

/// Load `name` and merge every ancestor named through `extends`.
///
/// A missing parent or a cycle is reported as `InvalidTemplateFormat` on the
/// descriptor that references it.
pub fn resolve_at(root: &Path, name: &TemplateName) -> Result<ResolvedDescriptor, GenerationError> {
    let leaf = load_descriptor_at(root, name)?;
    let own_hooks = leaf.hooks.clone();

    let mut chain = vec![leaf];
    let mut seen: HashSet<TemplateName> = HashSet::from([name.clone()]);
    while let Some(parent) = chain.last().and_then(|d| d.extends.clone()) {
        let child_path = descriptor_path_at(root, &chain[chain.len() - 1].name);
        if !seen.insert(parent.clone()) {
            return Err(GenerationError::InvalidTemplateFormat {
                path: child_path,
                reason: format!("inheritance cycle through '{parent}'"),
            });
        }
        let loaded = match load_descriptor_at(root, &parent) {
            Ok(d) => d,
            Err(GenerationError::TemplateNotFound { .. }) => {
                return Err(GenerationError::InvalidTemplateFormat {
                    path: child_path,
                    reason: format!("parent template '{parent}' not found"),
                })
            }
            Err(e) => return Err(e),
        };
        chain.push(loaded);
    }

    // Fold from the root ancestor down so children override.
    chain.reverse();
    let lineage: Vec<TemplateName> = chain.iter().map(|d| d.name.clone()).collect();
    let mut merged = chain.pop().unwrap_or_else(|| TemplateDescriptor::empty(name.clone()));
    let mut variables = BTreeMap::new();
    let mut hooks: BTreeMap<HookStage, Vec<HookDeclaration>> = BTreeMap::new();
    for ancestor in chain.into_iter().chain(std::iter::once(merged.clone())) {
        variables.extend(ancestor.variables);
        for (stage, decls) in ancestor.hooks {
            hooks.entry(stage).or_default().extend(decls);
        }
    }
    merged.variables = variables;
    merged.hooks = hooks;

    Ok(ResolvedDescriptor {
        descriptor: merged,
        own_hooks,
        lineage,
    })
}

// ---------------------------------------------------------------------------
// 5. Scaffold
// ---------------------------------------------------------------------------

/// Write a minimal bundle for `name` under `root`.
///
/// Idempotent: an existing bundle is loaded and returned unchanged.
pub fn scaffold_minimal_at(
    root: &Path,
    name: &TemplateName,
) -> Result<TemplateDescriptor, GenerationError> {
    if !is_valid_name(name) {
        return Err(GenerationError::TemplateNotFound {
            name: name.0.clone(),
        });
    }
    if descriptor_path_at(root, name).exists() {
        return load_descriptor_at(root, name);
    }

    let mut descriptor = TemplateDescriptor::empty(name.clone());
    descriptor.description = format!("Scaffolded on {}", Utc::now().format("%Y-%m-%d"));
    descriptor.variables.insert(
        "project_name".to_string(),
        VariableSpec {
            var_type: VariableType::String,
            description: "Name of the generated project".to_string(),
            default: Some(serde_json::Value::String(name.0.clone())),
            required: false,
        },
    );

    let files = files_dir_at(root, name);
    std::fs::create_dir_all(&files).map_err(|e| io_err("create template", &files, e))?;
    let readme = files.join("README.md.tera");
    std::fs::write(&readme, "# {{ project_name }}\n\nGenerated from the `{{ template_name }}` template.\n")
        .map_err(|e| io_err("write template", &readme, e))?;

    let path = descriptor_path_at(root, name);
    let tmp = path.with_file_name(format!("{DESCRIPTOR_FILE}.tmp"));
    let yaml = serde_yaml::to_string(&descriptor).map_err(|e| {
        GenerationError::InvalidTemplateFormat {
            path: path.clone(),
            reason: e.to_string(),
        }
    })?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err("write descriptor", &tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err("write descriptor", &path, e))?;
    Ok(descriptor)
}

// ---------------------------------------------------------------------------
// 6. TemplateLibrary
// ---------------------------------------------------------------------------

/// A template library rooted at a directory.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    root: PathBuf,
}

impl TemplateLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<name>/files/`
    pub fn files_dir(&self, name: &TemplateName) -> PathBuf {
        files_dir_at(&self.root, name)
    }
}

impl TemplateLister for TemplateLibrary {
    fn available_templates(&self) -> Result<Vec<TemplateName>, GenerationError> {
        list_templates_at(&self.root)
    }
}

impl DescriptorSource for TemplateLibrary {
    fn load_descriptor(&self, name: &TemplateName) -> Result<ResolvedDescriptor, GenerationError> {
        resolve_at(&self.root, name)
    }
}

impl TemplateScaffolder for TemplateLibrary {
    fn scaffold(&self, name: &TemplateName) -> Result<TemplateDescriptor, GenerationError> {
        scaffold_minimal_at(&self.root, name)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn write_descriptor(root: &Path, name: &str, body: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join(FILES_DIR)).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), format!("name: {name}\n{body}")).unwrap();
    }

    #[test]
    fn descriptor_path_is_correct() {
        let path = descriptor_path_at(Path::new("/lib"), &TemplateName::from("api"));
        assert_eq!(path, PathBuf::from("/lib/api/template.yaml"));
    }

    #[test]
    fn load_missing_template_returns_not_found() {
        let root = TempDir::new().unwrap();
        let err = load_descriptor_at(root.path(), &TemplateName::from("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    }

    #[test]
    fn path_like_names_are_rejected() {
        let root = TempDir::new().unwrap();
        let err = load_descriptor_at(root.path(), &TemplateName::from("../etc")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    }

    #[test]
    fn name_mismatch_is_invalid_format() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("api");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), "name: web\n").unwrap();
        let err = load_descriptor_at(root.path(), &TemplateName::from("api")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplateFormat);
    }

    #[test]
    fn list_skips_dirs_without_descriptor() {
        let root = TempDir::new().unwrap();
        write_descriptor(root.path(), "b_tpl", "");
        write_descriptor(root.path(), "a_tpl", "");
        std::fs::create_dir_all(root.path().join("stray")).unwrap();
        let names = list_templates_at(root.path()).unwrap();
        assert_eq!(names, vec![TemplateName::from("a_tpl"), TemplateName::from("b_tpl")]);
    }

    #[test]
    fn list_missing_root_is_empty() {
        let root = TempDir::new().unwrap();
        assert!(list_templates_at(&root.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn resolve_merges_parent_schema_and_hooks() {
        let root = TempDir::new().unwrap();
        write_descriptor(
            root.path(),
            "base",
            "variables:\n  author:\n    default: anon\n  license:\n    default: MIT\nhooks:\n  post_gen:\n    - command: echo base\n",
        );
        write_descriptor(
            root.path(),
            "child",
            "extends: base\nvariables:\n  license:\n    default: Apache-2.0\nhooks:\n  post_gen:\n    - command: echo child\n",
        );
        let resolved = resolve_at(root.path(), &TemplateName::from("child")).unwrap();
        let d = &resolved.descriptor;
        assert_eq!(d.name, TemplateName::from("child"));
        assert_eq!(d.defaults()["license"], serde_json::json!("Apache-2.0"));
        assert_eq!(d.defaults()["author"], serde_json::json!("anon"));
        let chain: Vec<_> = resolved
            .hooks(HookStage::PostGen, HookInheritance::Chain)
            .into_iter()
            .map(|h| h.command)
            .collect();
        assert_eq!(chain, vec!["echo base", "echo child"]);
        assert_eq!(resolved.hooks(HookStage::PostGen, HookInheritance::SelfOnly).len(), 1);
        assert!(resolved.hooks(HookStage::PostGen, HookInheritance::Disabled).is_empty());
        assert_eq!(resolved.lineage, vec![TemplateName::from("base"), TemplateName::from("child")]);
    }

    #[test]
    fn resolve_detects_cycles() {
        let root = TempDir::new().unwrap();
        write_descriptor(root.path(), "a", "extends: b\n");
        write_descriptor(root.path(), "b", "extends: a\n");
        let err = resolve_at(root.path(), &TemplateName::from("a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplateFormat);
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn resolve_missing_parent_is_invalid_format() {
        let root = TempDir::new().unwrap();
        write_descriptor(root.path(), "orphan", "extends: ghost\n");
        let err = resolve_at(root.path(), &TemplateName::from("orphan")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplateFormat);
    }

    #[test]
    fn scaffold_is_idempotent() {
        let root = TempDir::new().unwrap();
        let name = TemplateName::from("fresh");
        let first = scaffold_minimal_at(root.path(), &name).unwrap();
        let second = scaffold_minimal_at(root.path(), &name).unwrap();
        assert_eq!(first, second);
        assert!(files_dir_at(root.path(), &name).join("README.md.tera").exists());
        assert_eq!(list_templates_at(root.path()).unwrap(), vec![name]);
    }
}
