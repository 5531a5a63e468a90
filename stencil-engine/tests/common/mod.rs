//! Template bundles written into temp dirs for engine integration tests.

#![allow(dead_code)]

use std::path::Path;

use stencil_core::TemplateLibrary;
use stencil_engine::{EngineConfig, StencilEngine};
use tempfile::TempDir;

pub fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write");
}

/// `<root>/<name>/template.yaml` plus one rendered README.
pub fn bundle(root: &Path, name: &str, yaml: &str) {
    let dir = root.join(name);
    write(&dir.join("template.yaml"), yaml);
    write(
        &dir.join("files/README.md.tera"),
        "# {{ template_name }}\n",
    );
}

pub fn rust_lib(root: &Path) {
    let dir = root.join("rust_lib");
    write(
        &dir.join("template.yaml"),
        r#"name: rust_lib
description: Minimal Rust library
variables:
  crate_name:
    type: string
    required: true
  with_tests:
    type: boolean
    default: true
"#,
    );
    write(
        &dir.join("files/Cargo.toml.tera"),
        "[package]\nname = \"{{ crate_name }}\"\nversion = \"0.1.0\"\n",
    );
    write(&dir.join("files/.gitignore"), "/target\n");
}

pub struct Fixture {
    pub templates: TempDir,
    pub out: TempDir,
    pub engine: StencilEngine,
}

pub fn fixture(config: EngineConfig, setup: impl FnOnce(&Path)) -> Fixture {
    let templates = TempDir::new().expect("templates dir");
    let out = TempDir::new().expect("output dir");
    setup(templates.path());
    let engine = StencilEngine::new(config, TemplateLibrary::new(templates.path()));
    Fixture {
        templates,
        out,
        engine,
    }
}
