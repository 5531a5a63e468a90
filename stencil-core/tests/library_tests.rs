//! Template library load, inheritance, and scaffold integration tests.
//! Layout: <root>/<template>/template.yaml + <root>/<template>/files/

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use stencil_core::{
    library::{self, DescriptorSource, TemplateLister, TemplateScaffolder},
    ErrorKind, GenerationError, HookInheritance, HookStage, TemplateLibrary, TemplateName,
};

fn bundle(root: &assert_fs::TempDir, name: &str, yaml: &str) {
    root.child(name).child("template.yaml").write_str(yaml).expect("write descriptor");
    root.child(name).child("files").create_dir_all().expect("files dir");
}

// ---------------------------------------------------------------------------
// 1. Load errors
// ---------------------------------------------------------------------------

#[test]
fn corrupt_descriptor_reports_path() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    bundle(&root, "broken", "name: broken\nvariables: [unclosed");

    let err = library::load_descriptor_at(root.path(), &TemplateName::from("broken")).unwrap_err();
    assert!(matches!(err, GenerationError::InvalidTemplateFormat { .. }), "got: {err}");
    assert!(err.to_string().contains("template.yaml"));
}

#[rstest]
#[case("")]
#[case("..")]
#[case("a/b")]
fn invalid_names_are_not_found(#[case] name: &str) {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let err = library::load_descriptor_at(root.path(), &TemplateName::from(name)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}

// ---------------------------------------------------------------------------
// 2. Capabilities through TemplateLibrary
// ---------------------------------------------------------------------------

#[test]
fn library_lists_and_resolves() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    bundle(
        &root,
        "service",
        "name: service\nvariables:\n  port:\n    type: integer\n    default: 8080\n",
    );
    bundle(
        &root,
        "grpc_service",
        "name: grpc_service\nextends: service\nhooks:\n  pre_gen:\n    - command: protoc --version\n      timeoutMs: 1000\n",
    );

    let lib = TemplateLibrary::new(root.path());
    let names = lib.available_templates().expect("list");
    assert_eq!(
        names,
        vec![TemplateName::from("grpc_service"), TemplateName::from("service")]
    );

    let resolved = lib
        .load_descriptor(&TemplateName::from("grpc_service"))
        .expect("resolve");
    assert_eq!(resolved.descriptor.declared_variables(), vec!["port"]);
    let pre = resolved.hooks(HookStage::PreGen, HookInheritance::Chain);
    assert_eq!(pre.len(), 1);
    assert_eq!(pre[0].timeout_ms, Some(1000));
}

#[test]
fn scaffold_creates_loadable_bundle() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    let lib = TemplateLibrary::new(root.path());
    let name = TemplateName::from("starter");

    let descriptor = lib.scaffold(&name).expect("scaffold");
    assert_eq!(descriptor.name, name);

    root.child("starter")
        .child("template.yaml")
        .assert(predicate::str::contains("name: starter"));
    root.child("starter")
        .child("files")
        .child("README.md.tera")
        .assert(predicate::str::contains("{{ project_name }}"));
    root.child("starter")
        .child("template.yaml.tmp")
        .assert(predicate::path::missing());

    let resolved = lib.load_descriptor(&name).expect("load scaffolded");
    assert_eq!(resolved.descriptor, descriptor);
}
