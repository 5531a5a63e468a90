//! End-to-end generation through `StencilEngine` with Tera bundles on disk.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{bundle, fixture, rust_lib};
use rstest::rstest;
use serde_json::json;
use stencil_core::{ErrorKind, HookInheritance, HookStage, TemplateName};
use stencil_engine::{EngineConfig, GenerationRequest, Hook, HookResult};

// ---------------------------------------------------------------------------
// 1. Plain generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_renders_bundle() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    let target = fx.out.path().join("widgets");

    let result = fx
        .engine
        .generate(GenerationRequest::new("rust_lib", &target).with_variable("crate_name", "widgets"))
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.generated_files.len(), 2);
    let manifest = std::fs::read_to_string(target.join("Cargo.toml")).expect("manifest");
    assert!(manifest.contains("name = \"widgets\""));
    assert_eq!(result.metadata.get("backend.backend"), Some(&json!("tera")));
}

#[tokio::test]
async fn plain_generate_reports_validation_without_recovery() {
    let fx = fixture(EngineConfig::default(), rust_lib);

    let result = fx
        .engine
        .generate(GenerationRequest::new("rust_lib", fx.out.path().join("widgets")))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::VariableValidationFailed));
    assert_eq!(fx.engine.stats().recovery.total, 0);
}

#[tokio::test]
async fn existing_output_needs_overwrite() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    let target = fx.out.path().join("widgets");
    std::fs::create_dir_all(&target).expect("mkdir");
    std::fs::write(target.join("keep.txt"), "mine").expect("write");

    let request = GenerationRequest::new("rust_lib", &target).with_variable("crate_name", "widgets");
    let refused = fx.engine.generate_with_hooks(request.clone()).await;
    assert_eq!(refused.error_kind, Some(ErrorKind::OutputPathConflict));
    assert!(!target.join("Cargo.toml").exists());
    assert!(refused.suggestion.is_some());

    let written = fx.engine.generate_with_hooks(request.overwrite(true)).await;
    assert!(written.success, "{written:?}");
    assert_eq!(std::fs::read_to_string(target.join("keep.txt")).expect("read"), "mine");
}

// ---------------------------------------------------------------------------
// 2. Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_variable_is_synthesized_and_retried() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    let target = fx.out.path().join("gadgets");

    let result = fx.engine.generate_with_hooks(GenerationRequest::new("rust_lib", &target)).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.metadata.get("retried"), Some(&json!(true)));
    let manifest = std::fs::read_to_string(target.join("Cargo.toml")).expect("manifest");
    assert!(manifest.contains("name = \"gadgets\""));

    let stats = fx.engine.stats().recovery;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.by_kind.get(&ErrorKind::VariableValidationFailed), Some(&1));
}

#[tokio::test]
async fn misspelled_template_suggests_closest_name() {
    let fx = fixture(EngineConfig::default(), |root| {
        bundle(root, "test_template", "name: test_template\n");
        rust_lib(root);
    });

    let result = fx
        .engine
        .generate_with_hooks(GenerationRequest::new("tset_template", fx.out.path().join("x")))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::TemplateNotFound));
    assert_eq!(result.suggestion.as_deref(), Some("test_template"));
    assert!(!fx.out.path().join("x").exists());
}

#[tokio::test]
async fn repeated_recovery_gives_the_same_advice() {
    let fx = fixture(EngineConfig::default(), |root| {
        bundle(root, "test_template", "name: test_template\n");
    });

    let mut suggestions = Vec::new();
    for i in 0..3 {
        let result = fx
            .engine
            .generate_with_hooks(GenerationRequest::new(
                "tset_template",
                fx.out.path().join(format!("x{i}")),
            ))
            .await;
        suggestions.push(result.suggestion);
    }

    assert!(suggestions.iter().all(|s| s.as_deref() == Some("test_template")));
    let stats = fx.engine.stats().recovery;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_kind.get(&ErrorKind::TemplateNotFound), Some(&3));
    assert_eq!(
        stats.by_strategy.get("template_suggestion").map(|s| s.attempts),
        Some(3)
    );
}

#[tokio::test]
async fn recurring_miss_scaffolds_when_enabled() {
    let config = EngineConfig {
        auto_scaffold: true,
        ..EngineConfig::default()
    };
    let fx = fixture(config, |_| {});

    // A miss only counts as recurring once it has been seen three times.
    for dir in ["a", "b"] {
        let miss = fx
            .engine
            .generate_with_hooks(GenerationRequest::new("starter", fx.out.path().join(dir)))
            .await;
        assert!(!miss.success);
        assert_eq!(miss.error_kind, Some(ErrorKind::TemplateNotFound));
    }
    assert!(!fx.templates.path().join("starter/template.yaml").exists());

    let third = fx
        .engine
        .generate_with_hooks(GenerationRequest::new("starter", fx.out.path().join("c")))
        .await;
    assert!(third.success, "{third:?}");
    assert_eq!(third.metadata["retried"], json!(true));
    assert!(fx.templates.path().join("starter/template.yaml").exists());
    assert_eq!(
        fx.engine.available_templates().expect("list"),
        vec![TemplateName::from("starter")]
    );
}

// ---------------------------------------------------------------------------
// 3. Hooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_result_short_circuits_the_stage() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    let reached = Arc::new(AtomicBool::new(false));

    fx.engine.register_hook(
        Hook::callback("gate", HookStage::PreGen, |_| async { HookResult::stop("enough") })
            .with_priority(1),
    );
    let flag = Arc::clone(&reached);
    fx.engine.register_hook(
        Hook::callback("never", HookStage::PreGen, move |_| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                HookResult::failure(ErrorKind::HookExecutionError, "should not run")
            }
        })
        .with_priority(2),
    );

    let result = fx
        .engine
        .generate_with_hooks(
            GenerationRequest::new("rust_lib", fx.out.path().join("w")).with_variable("crate_name", "w"),
        )
        .await;

    assert!(result.success, "{result:?}");
    assert!(!reached.load(Ordering::SeqCst));
}

#[tokio::test]
async fn pre_hook_variables_reach_the_bundle() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    fx.engine.register_hook(Hook::callback("name_it", HookStage::PreGen, |_| async {
        let mut vars = stencil_core::Variables::new();
        vars.insert("crate_name".into(), json!("from_hook"));
        HookResult::ok().with_variables(vars)
    }));
    let target = fx.out.path().join("w");

    let result = fx.engine.generate_with_hooks(GenerationRequest::new("rust_lib", &target)).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.metadata.get("retried"), Some(&json!(false)));
    let manifest = std::fs::read_to_string(target.join("Cargo.toml")).expect("manifest");
    assert!(manifest.contains("from_hook"));
    assert!(fx.engine.unregister_hook("name_it", HookStage::PreGen));
}

#[cfg(unix)]
#[tokio::test]
async fn declared_hooks_honour_conditions() {
    let fx = fixture(EngineConfig::default(), |root| {
        bundle(
            root,
            "svc",
            r#"name: svc
variables:
  with_tests:
    type: boolean
    default: true
hooks:
  post_gen:
    - command: touch tests.marker
      condition: with_tests
    - command: touch skipped.marker
      condition: '!with_tests'
"#,
        );
    });
    let target = fx.out.path().join("svc");

    let result = fx.engine.generate_with_hooks(GenerationRequest::new("svc", &target)).await;

    assert!(result.success, "{result:?}");
    assert!(target.join("tests.marker").exists());
    assert!(!target.join("skipped.marker").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn failing_post_hook_keeps_generated_files() {
    let fx = fixture(EngineConfig::default(), |root| {
        bundle(
            root,
            "svc",
            "name: svc\nhooks:\n  post_gen:\n    - command: exit 3\n",
        );
    });
    let target = fx.out.path().join("svc");

    let result = fx.engine.generate_with_hooks(GenerationRequest::new("svc", &target)).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::HookExecutionError));
    assert!(target.join("README.md").exists());
    assert_eq!(result.generated_files, vec![target.join("README.md")]);
}

#[cfg(unix)]
#[tokio::test]
async fn ignored_hook_failure_does_not_fail_generation() {
    let fx = fixture(EngineConfig::default(), |root| {
        bundle(
            root,
            "svc",
            "name: svc\nhooks:\n  post_gen:\n    - command: exit 1\n      ignoreErrors: true\n",
        );
    });

    let result = fx
        .engine
        .generate_with_hooks(GenerationRequest::new("svc", fx.out.path().join("svc")))
        .await;

    assert!(result.success, "{result:?}");
}

#[cfg(unix)]
#[rstest]
#[case(HookInheritance::Chain, true, true)]
#[case(HookInheritance::SelfOnly, false, true)]
#[case(HookInheritance::Disabled, false, false)]
#[tokio::test]
async fn inheritance_selects_declared_hooks(
    #[case] inheritance: HookInheritance,
    #[case] parent_ran: bool,
    #[case] child_ran: bool,
) {
    let fx = fixture(EngineConfig::default(), |root| {
        bundle(
            root,
            "base",
            "name: base\nhooks:\n  post_gen:\n    - command: touch base.marker\n",
        );
        bundle(
            root,
            "service",
            "name: service\nextends: base\nhooks:\n  post_gen:\n    - command: touch service.marker\n",
        );
    });
    let target = fx.out.path().join("service");

    let result = fx
        .engine
        .generate_with_hooks(GenerationRequest::new("service", &target).with_inheritance(inheritance))
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(target.join("base.marker").exists(), parent_ran);
    assert_eq!(target.join("service.marker").exists(), child_ran);
}

#[tokio::test]
async fn without_hooks_skips_registered_hooks() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    fx.engine.register_hook(Hook::callback("deny", HookStage::PreGen, |_| async {
        HookResult::failure(ErrorKind::HookExecutionError, "denied")
    }));

    let request = GenerationRequest::new("rust_lib", fx.out.path().join("w")).with_variable("crate_name", "w");
    let denied = fx.engine.generate_with_hooks(request.clone()).await;
    assert_eq!(denied.error_kind, Some(ErrorKind::HookExecutionError));
    assert!(denied.message.as_deref().unwrap_or_default().contains("deny"));

    let allowed = fx.engine.generate_with_hooks(request.without_hooks()).await;
    assert!(allowed.success, "{allowed:?}");
}

// ---------------------------------------------------------------------------
// 4. Cache through the engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cache_holds_at_most_max_size_templates() {
    let config = EngineConfig {
        max_cache_size: 2,
        ..EngineConfig::default()
    };
    let fx = fixture(config, |root| {
        for name in ["a", "b", "c"] {
            bundle(root, name, &format!("name: {name}\n"));
        }
    });

    for name in ["a", "b", "c"] {
        let result = fx.engine.generate(GenerationRequest::new(name, fx.out.path().join(name))).await;
        assert!(result.success, "{result:?}");
    }

    let stats = fx.engine.stats().cache;
    assert_eq!(stats.size, 2);
    let cached: Vec<&str> = stats
        .entries
        .iter()
        .filter(|e| e.cached)
        .map(|e| e.name.as_str())
        .collect();
    assert!(!cached.contains(&"a"), "cached: {cached:?}");
    assert_eq!(stats.misses, 3);
}

#[tokio::test]
async fn warmup_then_generate_hits_the_cache() {
    let fx = fixture(EngineConfig::default(), |root| {
        for name in ["a", "b", "c"] {
            bundle(root, name, &format!("name: {name}\n"));
        }
    });

    let report = fx.engine.warmup(None).await.expect("warm up");
    assert_eq!(report.warmed.len(), 3);
    assert!(report.failed.is_empty());

    let result = fx.engine.generate(GenerationRequest::new("b", fx.out.path().join("b"))).await;
    assert!(result.success);
    let stats = fx.engine.stats().cache;
    assert_eq!((stats.hits, stats.misses), (1, 0));

    fx.engine.clear_cache();
    assert_eq!(fx.engine.stats().cache.size, 0);
}

#[tokio::test]
async fn stats_serialize_for_reporting() {
    let fx = fixture(EngineConfig::default(), rust_lib);
    let value = serde_json::to_value(fx.engine.stats()).expect("serialize");
    assert!(value.get("cache").is_some());
    assert!(value.get("async").is_some());
    assert!(value.get("recovery").is_some());
}
