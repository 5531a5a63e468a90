//! Hook data model and decorator execution.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use stencil_core::{ErrorKind, HookDeclaration, HookStage, TemplateName, Variables};

use super::condition::{Condition, ConditionPolicy};
use super::script::ScriptHook;

pub const DEFAULT_PRIORITY: i32 = 100;

/// State handed to each hook of one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookContext {
    pub template_name: TemplateName,
    pub output_path: PathBuf,
    pub variables: Variables,
    pub metadata: BTreeMap<String, Value>,
}

impl HookContext {
    pub fn new(
        template_name: TemplateName,
        output_path: impl Into<PathBuf>,
        variables: Variables,
    ) -> Self {
        HookContext {
            template_name,
            output_path: output_path.into(),
            variables,
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Bindings to merge into the context for later hooks and generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_variables: Option<Variables>,
    pub should_continue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl HookResult {
    pub fn ok() -> Self {
        HookResult {
            success: true,
            message: None,
            modified_variables: None,
            should_continue: true,
            error_kind: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        HookResult {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        HookResult {
            success: false,
            message: Some(message.into()),
            modified_variables: None,
            should_continue: false,
            error_kind: Some(kind),
        }
    }

    /// Successful, but later hooks of the stage are not run.
    pub fn stop(message: impl Into<String>) -> Self {
        HookResult {
            should_continue: false,
            ..Self::ok_with(message)
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.modified_variables = Some(variables);
        self
    }
}

pub type HookFuture = BoxFuture<'static, HookResult>;
pub type HookCallback = Arc<dyn Fn(HookContext) -> HookFuture + Send + Sync>;
/// Maps a failed result to a replacement result.
pub type RecoveryFn = Arc<dyn Fn(&HookContext, &HookResult) -> HookResult + Send + Sync>;

/// What a hook does. Decorators wrap an inner action.
#[derive(Clone)]
pub enum HookAction {
    Script(ScriptHook),
    Callback(HookCallback),
    /// Run `inner` only when `condition` holds; otherwise a successful no-op.
    Conditional {
        condition: Condition,
        inner: Box<HookAction>,
    },
    /// Fail with [`ErrorKind::HookTimeout`] if `inner` runs longer than `limit`.
    Timeout {
        limit: Duration,
        inner: Box<HookAction>,
    },
    /// Turn a failure of `inner` into the recovery function's result, or into
    /// a success when `ignore_errors` is set.
    Recover {
        recovery: Option<RecoveryFn>,
        ignore_errors: bool,
        inner: Box<HookAction>,
    },
}

impl fmt::Debug for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookAction::Script(script) => f.debug_tuple("Script").field(script).finish(),
            HookAction::Callback(_) => f.write_str("Callback(..)"),
            HookAction::Conditional { condition, inner } => f
                .debug_struct("Conditional")
                .field("condition", &condition.source())
                .field("inner", inner)
                .finish(),
            HookAction::Timeout { limit, inner } => f
                .debug_struct("Timeout")
                .field("limit", limit)
                .field("inner", inner)
                .finish(),
            HookAction::Recover {
                recovery,
                ignore_errors,
                inner,
            } => f
                .debug_struct("Recover")
                .field("recovery", &recovery.is_some())
                .field("ignore_errors", ignore_errors)
                .field("inner", inner)
                .finish(),
        }
    }
}

impl HookAction {
    pub fn execute<'a>(&'a self, hook: &'a str, ctx: HookContext) -> BoxFuture<'a, HookResult> {
        async move {
            match self {
                HookAction::Script(script) => script.run(hook, &ctx).await,
                HookAction::Callback(callback) => callback(ctx).await,
                HookAction::Conditional { condition, inner } => {
                    if condition.evaluate(&ctx.variables) {
                        inner.execute(hook, ctx).await
                    } else {
                        debug!(hook, condition = %condition, "condition not met, skipping hook");
                        HookResult::ok_with(format!("skipped: condition '{condition}' not met"))
                    }
                }
                HookAction::Timeout { limit, inner } => {
                    match tokio::time::timeout(*limit, inner.execute(hook, ctx)).await {
                        Ok(result) => result,
                        Err(_) => HookResult::failure(
                            ErrorKind::HookTimeout,
                            format!("hook '{hook}' timed out after {}ms", limit.as_millis()),
                        ),
                    }
                }
                HookAction::Recover {
                    recovery,
                    ignore_errors,
                    inner,
                } => {
                    let snapshot = ctx.clone();
                    let result = inner.execute(hook, ctx).await;
                    if result.success {
                        return result;
                    }
                    if let Some(recover) = recovery {
                        debug!(hook, "running hook recovery function");
                        return recover(&snapshot, &result);
                    }
                    if *ignore_errors {
                        warn!(
                            hook,
                            error = result.message.as_deref().unwrap_or(""),
                            "hook failed, ignoring"
                        );
                        return HookResult::ok_with(format!(
                            "ignored failure: {}",
                            result.message.as_deref().unwrap_or("hook failed")
                        ));
                    }
                    result
                }
            }
        }
        .boxed()
    }
}

/// A named, staged, prioritized hook.
#[derive(Debug, Clone)]
pub struct Hook {
    pub name: String,
    pub stage: HookStage,
    /// Lower runs first.
    pub priority: i32,
    pub description: String,
    pub action: HookAction,
}

impl Hook {
    pub fn new(name: impl Into<String>, stage: HookStage, action: HookAction) -> Self {
        Hook {
            name: name.into(),
            stage,
            priority: DEFAULT_PRIORITY,
            description: String::new(),
            action,
        }
    }

    /// A hook backed by an async closure.
    pub fn callback<F, Fut>(name: impl Into<String>, stage: HookStage, f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let callback: HookCallback = Arc::new(move |ctx| f(ctx).boxed());
        Self::new(name, stage, HookAction::Callback(callback))
    }

    pub fn script(name: impl Into<String>, stage: HookStage, script: ScriptHook) -> Self {
        Self::new(name, stage, HookAction::Script(script))
    }

    /// Build from a descriptor declaration: script, then condition, then
    /// `ignoreErrors`.
    pub fn from_declaration(
        name: impl Into<String>,
        stage: HookStage,
        decl: &HookDeclaration,
        default_timeout: Duration,
        policy: ConditionPolicy,
    ) -> Self {
        let timeout = decl
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);
        let mut hook = Self::script(name, stage, ScriptHook::new(&decl.command, timeout));
        hook.description = decl.description.clone();
        if let Some(source) = &decl.condition {
            hook = hook.when(Condition::lenient(source, policy));
        }
        if decl.ignore_errors {
            hook = hook.ignore_errors();
        }
        hook
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn when(self, condition: Condition) -> Self {
        self.wrap(|inner| HookAction::Conditional { condition, inner })
    }

    pub fn with_timeout(self, limit: Duration) -> Self {
        self.wrap(|inner| HookAction::Timeout { limit, inner })
    }

    pub fn recover_with<F>(self, f: F) -> Self
    where
        F: Fn(&HookContext, &HookResult) -> HookResult + Send + Sync + 'static,
    {
        let recovery: RecoveryFn = Arc::new(f);
        self.wrap(|inner| HookAction::Recover {
            recovery: Some(recovery),
            ignore_errors: false,
            inner,
        })
    }

    pub fn ignore_errors(self) -> Self {
        self.wrap(|inner| HookAction::Recover {
            recovery: None,
            ignore_errors: true,
            inner,
        })
    }

    pub async fn execute(&self, ctx: HookContext) -> HookResult {
        self.action.execute(&self.name, ctx).await
    }

    fn wrap(mut self, f: impl FnOnce(Box<HookAction>) -> HookAction) -> Self {
        self.action = f(Box::new(self.action));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> HookContext {
        let mut vars = Variables::new();
        vars.insert("publish".into(), json!(false));
        HookContext::new(TemplateName::from("lib"), "/tmp/out", vars)
    }

    fn failing(name: &str) -> Hook {
        Hook::callback(name, HookStage::PreGen, |_| async {
            HookResult::failure(ErrorKind::HookExecutionError, "boom")
        })
    }

    #[tokio::test]
    async fn conditional_skip_is_success() {
        let hook = failing("guarded").when(Condition::parse("publish").unwrap());
        let result = hook.execute(ctx()).await;
        assert!(result.success);
        assert!(result.should_continue);
        assert!(result.message.unwrap().starts_with("skipped"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_tagged() {
        let hook = Hook::callback("slow", HookStage::PreGen, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HookResult::ok()
        })
        .with_timeout(Duration::from_millis(50));
        let result = hook.execute(ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::HookTimeout));
    }

    #[tokio::test]
    async fn ignore_errors_turns_failure_into_success() {
        let result = failing("flaky").ignore_errors().execute(ctx()).await;
        assert!(result.success);
        assert!(result.message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn recovery_function_replaces_result() {
        let hook = failing("flaky").recover_with(|ctx, failed| {
            let mut vars = Variables::new();
            vars.insert("recovered_from".into(), json!(failed.message.clone()));
            vars.insert("template".into(), json!(ctx.template_name.as_str()));
            HookResult::ok().with_variables(vars)
        });
        let result = hook.execute(ctx()).await;
        assert!(result.success);
        let vars = result.modified_variables.unwrap();
        assert_eq!(vars["recovered_from"], json!("boom"));
        assert_eq!(vars["template"], json!("lib"));
    }

    #[tokio::test]
    async fn declaration_with_unparseable_condition_is_skipped() {
        let decl = HookDeclaration {
            description: "never".into(),
            command: "exit 1".into(),
            condition: Some("publish &&".into()),
            timeout_ms: None,
            ignore_errors: false,
        };
        let hook = Hook::from_declaration(
            "pre_gen[0]",
            HookStage::PreGen,
            &decl,
            Duration::from_secs(5),
            ConditionPolicy::FailClosed,
        );
        assert_eq!(hook.description, "never");
        assert!(hook.execute(ctx()).await.success);
    }
}
