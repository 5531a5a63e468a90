//! One generation, end to end: conflict check, precompiled template,
//! defaults, pre-hooks, validation, backend, post-hooks, and recovery.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use stencil_core::{ErrorKind, GenerationError, HookStage, ResolvedDescriptor, Variables};

use crate::cache::{CacheManager, PrecompiledTemplate};
use crate::config::EngineConfig;
use crate::hooks::{
    run_hooks, ConditionPolicy, Hook, HookContext, HookRegistry, HookResult, FAILED_HOOK_KEY,
};
use crate::recovery::{ErrorRecoveryManager, RecoveryAction, RecoveryContext};
use crate::request::{GenerationRequest, GenerationResult};
use crate::scheduler::GenerationRunner;

#[derive(Debug, Clone, Copy)]
pub struct GeneratorSettings {
    pub hook_timeout: Duration,
    pub condition_policy: ConditionPolicy,
    pub auto_retry: bool,
}

impl From<&EngineConfig> for GeneratorSettings {
    fn from(config: &EngineConfig) -> Self {
        GeneratorSettings {
            hook_timeout: config.hook_timeout(),
            condition_policy: config.unknown_condition,
            auto_retry: config.auto_retry,
        }
    }
}

/// A successful attempt.
struct Generated {
    files: Vec<PathBuf>,
    metadata: BTreeMap<String, Value>,
}

/// A failed attempt, with whatever was known when it failed.
struct Failure {
    error: GenerationError,
    descriptor: Option<Arc<ResolvedDescriptor>>,
    variables: Variables,
    files: Vec<PathBuf>,
    metadata: BTreeMap<String, Value>,
}

impl Failure {
    fn bare(error: GenerationError, variables: &Variables) -> Self {
        Failure {
            error,
            descriptor: None,
            variables: variables.clone(),
            files: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

pub struct Generator {
    cache: Arc<CacheManager>,
    hooks: Arc<HookRegistry>,
    recovery: Arc<ErrorRecoveryManager>,
    settings: GeneratorSettings,
}

impl Generator {
    pub fn new(
        cache: Arc<CacheManager>,
        hooks: Arc<HookRegistry>,
        recovery: Arc<ErrorRecoveryManager>,
        settings: GeneratorSettings,
    ) -> Self {
        Generator {
            cache,
            hooks,
            recovery,
            settings,
        }
    }

    /// Generate without hooks or recovery.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        let result = match self.attempt(request, false).await {
            Ok(generated) => self.success(request, generated, started.elapsed()),
            Err(failure) => failed_result(request, &failure, started.elapsed()),
        };
        log_result(&result);
        result
    }

    /// Generate with hooks (unless the request disables them) and recover
    /// from failures, retrying once when recovery changed something that can
    /// make the retry succeed.
    pub async fn generate_with_hooks(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        let mut current = request.clone();
        let mut retried = false;

        let result = loop {
            let failure = match self.attempt(&current, current.with_hooks).await {
                Ok(generated) => {
                    let mut result = self.success(&current, generated, started.elapsed());
                    result.metadata.insert("retried".into(), json!(retried));
                    break result;
                }
                Err(failure) => failure,
            };

            let ctx = RecoveryContext {
                template: Some(current.template.clone()),
                output_path: Some(current.output_path.clone()),
                variables: failure.variables.clone(),
                descriptor: failure.descriptor.clone(),
            };
            let attempt = self.recovery.recover(&failure.error, &ctx).await;
            let outcome = &attempt.outcome;

            if !retried && self.settings.auto_retry && outcome.success && outcome.action.is_actionable() {
                if let RecoveryAction::SynthesizedVariables { variables } = &outcome.action {
                    for (name, value) in variables {
                        current.variables.insert(name.clone(), value.clone());
                    }
                }
                info!(
                    template = %current.template,
                    strategy = %outcome.strategy,
                    "retrying generation after recovery"
                );
                retried = true;
                continue;
            }

            let mut result = failed_result(&current, &failure, started.elapsed())
                .with_suggestion(outcome.suggestions.first().cloned());
            result
                .metadata
                .insert("recovery".into(), json!(attempt));
            result.metadata.insert("retried".into(), json!(retried));
            break result;
        };

        log_result(&result);
        result
    }

    async fn attempt(&self, request: &GenerationRequest, with_hooks: bool) -> Result<Generated, Failure> {
        if !request.overwrite && is_non_empty_dir(&request.output_path) {
            return Err(Failure::bare(
                GenerationError::OutputPathConflict {
                    path: request.output_path.clone(),
                },
                &request.variables,
            ));
        }

        let template = self
            .cache
            .get(&request.template)
            .await
            .map_err(|e| Failure::bare(e, &request.variables))?;
        let descriptor = Arc::clone(&template.descriptor);

        let variables = descriptor.descriptor.apply_defaults(&request.variables);
        let mut ctx = HookContext::new(request.template.clone(), &request.output_path, variables);
        let fail = |error: GenerationError, ctx: &HookContext, files: Vec<PathBuf>| Failure {
            error,
            descriptor: Some(Arc::clone(&descriptor)),
            variables: ctx.variables.clone(),
            files,
            metadata: ctx.metadata.clone(),
        };

        if with_hooks {
            let hooks = self.stage_hooks(HookStage::PreGen, &template, request);
            let outcome = run_hooks(HookStage::PreGen, hooks, &mut ctx).await;
            if !outcome.success {
                let error = hook_error(request, &outcome, &ctx);
                return Err(fail(error, &ctx, Vec::new()));
            }
        }

        let issues = descriptor.descriptor.validate(&ctx.variables);
        if !issues.is_empty() {
            let error = GenerationError::VariableValidation {
                template: request.template.to_string(),
                issues,
            };
            return Err(fail(error, &ctx, Vec::new()));
        }

        let files = match self.run_backend(&template, &request.output_path, &ctx.variables).await {
            Ok(files) => files,
            Err(error) => return Err(fail(error, &ctx, Vec::new())),
        };

        if with_hooks {
            let hooks = self.stage_hooks(HookStage::PostGen, &template, request);
            let outcome = run_hooks(HookStage::PostGen, hooks, &mut ctx).await;
            if !outcome.success {
                // Generated files stay on disk.
                let error = hook_error(request, &outcome, &ctx);
                return Err(fail(error, &ctx, files));
            }
        }

        let mut metadata = ctx.metadata;
        for (key, value) in &template.metadata {
            metadata.insert(format!("backend.{key}"), json!(value));
        }
        Ok(Generated { files, metadata })
    }

    /// Registered hooks, then declared hooks, then the request's extra hooks;
    /// `run_hooks` orders them by priority with this order breaking ties.
    fn stage_hooks(
        &self,
        stage: HookStage,
        template: &PrecompiledTemplate,
        request: &GenerationRequest,
    ) -> Vec<Arc<Hook>> {
        let mut hooks = self.hooks.hooks_for(stage);
        for (i, decl) in template
            .descriptor
            .hooks(stage, request.inheritance)
            .iter()
            .enumerate()
        {
            hooks.push(Arc::new(Hook::from_declaration(
                format!("{}:{stage}[{i}]", template.name),
                stage,
                decl,
                self.settings.hook_timeout,
                self.settings.condition_policy,
            )));
        }
        hooks.extend(
            request
                .extra_hooks
                .iter()
                .filter(|h| h.stage == stage)
                .cloned()
                .map(Arc::new),
        );
        hooks
    }

    /// Run the backend on the blocking pool. If it fails, every path it added
    /// under `output` is removed again; entries that existed before are left
    /// alone.
    async fn run_backend(
        &self,
        template: &PrecompiledTemplate,
        output: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, GenerationError> {
        let before = snapshot_tree(output);
        let backend = Arc::clone(self.cache.backend());
        let handle = template.handle.clone();
        let target = output.to_path_buf();
        let vars = variables.clone();

        let result = tokio::task::spawn_blocking(move || backend.generate(&handle, &target, &vars))
            .await
            .unwrap_or_else(|e| {
                Err(GenerationError::Backend {
                    template: template.name.to_string(),
                    message: format!("generation task failed: {e}"),
                })
            });

        if result.is_err() {
            remove_partial_output(output, before.as_ref());
        }
        result
    }

    fn success(&self, request: &GenerationRequest, generated: Generated, elapsed: Duration) -> GenerationResult {
        let mut result = GenerationResult::succeeded(
            request.template.clone(),
            request.output_path.clone(),
            generated.files,
            elapsed,
        );
        result.metadata = generated.metadata;
        result
    }
}

#[async_trait]
impl GenerationRunner for Generator {
    async fn run(&self, request: GenerationRequest) -> GenerationResult {
        self.generate_with_hooks(&request).await
    }
}

fn hook_error(request: &GenerationRequest, outcome: &HookResult, ctx: &HookContext) -> GenerationError {
    let message = outcome
        .message
        .clone()
        .unwrap_or_else(|| "hook failed".to_string());
    match outcome.error_kind {
        Some(ErrorKind::HookTimeout) => GenerationError::Failed {
            template: request.template.to_string(),
            kind: ErrorKind::HookTimeout,
            message,
        },
        _ => GenerationError::HookExecution {
            hook: ctx
                .metadata
                .get(FAILED_HOOK_KEY)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            message,
        },
    }
}

fn failed_result(request: &GenerationRequest, failure: &Failure, elapsed: Duration) -> GenerationResult {
    let mut result = GenerationResult::from_error(
        request.template.clone(),
        request.output_path.clone(),
        &failure.error,
        elapsed,
    );
    result.generated_files = failure.files.clone();
    result.metadata = failure.metadata.clone();
    result
}

fn log_result(result: &GenerationResult) {
    if result.success {
        info!(
            template = %result.template,
            output = %result.output_path.display(),
            files = result.generated_files.len(),
            duration_ms = result.duration.as_millis() as u64,
            "generation finished"
        );
    } else {
        warn!(
            template = %result.template,
            output = %result.output_path.display(),
            kind = ?result.error_kind,
            error = result.message.as_deref().unwrap_or(""),
            "generation failed"
        );
    }
}

// ---------------------------------------------------------------------------
// Partial output cleanup
// ---------------------------------------------------------------------------

/// Every path under `root`, or `None` when `root` does not exist yet.
fn snapshot_tree(root: &Path) -> Option<HashSet<PathBuf>> {
    if !root.exists() {
        return None;
    }
    let mut paths = HashSet::new();
    collect_tree(root, &mut paths);
    Some(paths)
}

fn collect_tree(dir: &Path, paths: &mut HashSet<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        paths.insert(path.clone());
        if is_dir {
            collect_tree(&path, paths);
        }
    }
}

/// Best effort: remove what a failed backend run left behind. A directory
/// that did not exist before is removed whole.
fn remove_partial_output(root: &Path, before: Option<&HashSet<PathBuf>>) {
    let Some(before) = before else {
        if root.exists() {
            match std::fs::remove_dir_all(root) {
                Ok(()) => debug!(path = %root.display(), "removed partial output"),
                Err(e) => warn!(path = %root.display(), error = %e, "could not remove partial output"),
            }
        }
        return;
    };
    let mut removed = 0usize;
    remove_new_entries(root, before, &mut removed);
    if removed > 0 {
        debug!(path = %root.display(), removed, "removed partial output");
    }
}

fn remove_new_entries(dir: &Path, before: &HashSet<PathBuf>, removed: &mut usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if before.contains(&path) {
            if is_dir {
                remove_new_entries(&path, before, removed);
            }
            continue;
        }
        let outcome = if is_dir {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match outcome {
            Ok(()) => *removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial output"),
        }
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
