//! Hook registry and stage execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use tracing::{debug, warn};

use stencil_core::{ErrorKind, HookStage, Variables};

use super::types::{Hook, HookContext, HookResult};
use crate::lock;

/// Context metadata key naming the hook that aborted a stage.
pub const FAILED_HOOK_KEY: &str = "failed_hook";

struct Registered {
    seq: u64,
    hook: Arc<Hook>,
}

/// Hooks registered for the lifetime of an engine, per stage.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<Vec<Registered>>,
    seq: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `hook`. A hook with the same name and stage is replaced and moves
    /// to the back of its priority tier.
    pub fn register(&self, hook: Hook) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut hooks = lock(&self.hooks);
        hooks.retain(|r| !(r.hook.name == hook.name && r.hook.stage == hook.stage));
        debug!(hook = %hook.name, stage = %hook.stage, priority = hook.priority, "hook registered");
        hooks.push(Registered {
            seq,
            hook: Arc::new(hook),
        });
    }

    /// Returns `true` if a hook was removed.
    pub fn unregister(&self, name: &str, stage: HookStage) -> bool {
        let mut hooks = lock(&self.hooks);
        let before = hooks.len();
        hooks.retain(|r| !(r.hook.name == name && r.hook.stage == stage));
        before != hooks.len()
    }

    pub fn clear(&self) {
        lock(&self.hooks).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.hooks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hooks of `stage` in execution order: ascending priority, then
    /// registration order.
    pub fn hooks_for(&self, stage: HookStage) -> Vec<Arc<Hook>> {
        let hooks = lock(&self.hooks);
        let mut staged: Vec<&Registered> = hooks.iter().filter(|r| r.hook.stage == stage).collect();
        staged.sort_by_key(|r| (r.hook.priority, r.seq));
        staged.into_iter().map(|r| Arc::clone(&r.hook)).collect()
    }

    pub async fn run(&self, stage: HookStage, ctx: &mut HookContext) -> HookResult {
        let hooks = self.hooks_for(stage);
        run_hooks(stage, hooks, ctx).await
    }
}

/// Run `hooks` sequentially against `ctx`.
///
/// The list is stably sorted by priority, so callers pass hooks in the order
/// they were registered. Each hook's `modified_variables` are merged into
/// `ctx.variables` before the next hook runs and are also accumulated into
/// the returned result. A failure aborts the chain and is returned;
/// `should_continue = false` stops it with a success.
pub async fn run_hooks(
    stage: HookStage,
    mut hooks: Vec<Arc<Hook>>,
    ctx: &mut HookContext,
) -> HookResult {
    hooks.sort_by_key(|h| h.priority);
    let mut accumulated = Variables::new();
    let mut ran = 0usize;

    for hook in &hooks {
        let started = Instant::now();
        let mut result = hook.execute(ctx.clone()).await;
        ran += 1;
        ctx.metadata.insert(
            format!("hook.{stage}.{}", hook.name),
            json!({
                "success": result.success,
                "message": result.message,
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
        );

        if let Some(vars) = result.modified_variables.take() {
            for (name, value) in vars {
                ctx.variables.insert(name.clone(), value.clone());
                accumulated.insert(name, value);
            }
        }

        if !result.success {
            warn!(
                hook = %hook.name,
                %stage,
                error = result.message.as_deref().unwrap_or(""),
                "hook failed, aborting stage"
            );
            ctx.metadata
                .insert(FAILED_HOOK_KEY.to_string(), json!(hook.name));
            result.error_kind.get_or_insert(ErrorKind::HookExecutionError);
            result.should_continue = false;
            result.modified_variables = non_empty(accumulated);
            return result;
        }
        if !result.should_continue {
            debug!(hook = %hook.name, %stage, "hook stopped the stage");
            result.modified_variables = non_empty(accumulated);
            return result;
        }
        debug!(hook = %hook.name, %stage, "hook finished");
    }

    let mut done = HookResult::ok_with(format!("{ran} {stage} hook(s) completed"));
    done.modified_variables = non_empty(accumulated);
    done
}

fn non_empty(vars: Variables) -> Option<Variables> {
    (!vars.is_empty()).then_some(vars)
}
