//! Recovery strategies, one per family of error kinds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use stencil_core::{
    ErrorKind, GenerationError, ResolvedDescriptor, TemplateLister, TemplateName,
    TemplateScaffolder, VariableType, Variables,
};

use super::pattern::ErrorPattern;
use crate::cache::CacheInvalidator;

/// What the engine knew about the failed generation.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    pub template: Option<TemplateName>,
    pub output_path: Option<PathBuf>,
    pub variables: Variables,
    pub descriptor: Option<Arc<ResolvedDescriptor>>,
}

/// A concrete change made (or proposed) by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryAction {
    None,
    ScaffoldedTemplate { name: TemplateName },
    CreatedDirectory { path: PathBuf },
    RepairedPermissions { path: PathBuf },
    AlternateOutput { path: PathBuf },
    SynthesizedVariables { variables: Variables },
    InvalidatedCache { name: TemplateName },
}

impl RecoveryAction {
    /// Whether retrying the same request right away can now succeed.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            RecoveryAction::ScaffoldedTemplate { .. }
                | RecoveryAction::CreatedDirectory { .. }
                | RecoveryAction::RepairedPermissions { .. }
                | RecoveryAction::SynthesizedVariables { .. }
                | RecoveryAction::InvalidatedCache { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub strategy: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub action: RecoveryAction,
}

impl RecoveryOutcome {
    pub fn new(strategy: &str, success: bool, message: impl Into<String>) -> Self {
        RecoveryOutcome {
            success,
            strategy: strategy.to_string(),
            message: message.into(),
            suggestions: Vec::new(),
            action: RecoveryAction::None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_action(mut self, action: RecoveryAction) -> Self {
        self.action = action;
        self
    }

    /// First suggestion, or the message when there is none.
    pub fn hint(&self) -> String {
        self.suggestions
            .first()
            .cloned()
            .unwrap_or_else(|| self.message.clone())
    }
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn handles(&self, kind: ErrorKind) -> bool;

    async fn recover(
        &self,
        error: &GenerationError,
        ctx: &RecoveryContext,
        pattern: &ErrorPattern,
    ) -> RecoveryOutcome;
}

// ---------------------------------------------------------------------------
// Template not found
// ---------------------------------------------------------------------------

/// Suggests similarly named templates; optionally scaffolds a missing one
/// once the miss keeps recurring.
pub struct TemplateSuggestionStrategy {
    lister: Arc<dyn TemplateLister>,
    scaffolder: Arc<dyn TemplateScaffolder>,
    threshold: f64,
    auto_scaffold: bool,
}

impl TemplateSuggestionStrategy {
    pub const NAME: &'static str = "template_suggestion";

    pub fn new(
        lister: Arc<dyn TemplateLister>,
        scaffolder: Arc<dyn TemplateScaffolder>,
        threshold: f64,
        auto_scaffold: bool,
    ) -> Self {
        TemplateSuggestionStrategy {
            lister,
            scaffolder,
            threshold,
            auto_scaffold,
        }
    }
}

/// Names in `available` whose normalized Levenshtein similarity to
/// `requested` is at least `threshold`, best match first.
pub fn similar_names(requested: &str, available: &[TemplateName], threshold: f64) -> Vec<TemplateName> {
    let mut scored: Vec<(f64, &TemplateName)> = available
        .iter()
        .filter(|candidate| candidate.as_str() != requested)
        .map(|candidate| (strsim::normalized_levenshtein(requested, candidate.as_str()), candidate))
        .filter(|(score, _)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().map(|(_, name)| name.clone()).collect()
}

#[async_trait]
impl RecoveryStrategy for TemplateSuggestionStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::TemplateNotFound
    }

    async fn recover(
        &self,
        error: &GenerationError,
        ctx: &RecoveryContext,
        pattern: &ErrorPattern,
    ) -> RecoveryOutcome {
        let requested = match (error, &ctx.template) {
            (GenerationError::TemplateNotFound { name }, _) => TemplateName::from(name.as_str()),
            (_, Some(name)) => name.clone(),
            (_, None) => {
                return RecoveryOutcome::new(Self::NAME, false, "no template name to match against")
            }
        };

        let lister = Arc::clone(&self.lister);
        let available = match tokio::task::spawn_blocking(move || lister.available_templates()).await {
            Ok(Ok(available)) => available,
            Ok(Err(e)) => {
                return RecoveryOutcome::new(Self::NAME, false, format!("could not list templates: {e}"))
            }
            Err(e) => {
                return RecoveryOutcome::new(Self::NAME, false, format!("template listing failed: {e}"))
            }
        };

        let matches = similar_names(requested.as_str(), &available, self.threshold);
        if !matches.is_empty() {
            let suggestions: Vec<String> = matches.iter().map(ToString::to_string).collect();
            return RecoveryOutcome::new(
                Self::NAME,
                true,
                format!("did you mean '{}'?", suggestions[0]),
            )
            .with_suggestions(suggestions);
        }

        if self.auto_scaffold && pattern.is_recurring {
            let scaffolder = Arc::clone(&self.scaffolder);
            let name = requested.clone();
            return match tokio::task::spawn_blocking(move || scaffolder.scaffold(&name)).await {
                Ok(Ok(_)) => RecoveryOutcome::new(
                    Self::NAME,
                    true,
                    format!("scaffolded a minimal template '{requested}'"),
                )
                .with_action(RecoveryAction::ScaffoldedTemplate { name: requested }),
                Ok(Err(e)) => RecoveryOutcome::new(Self::NAME, false, format!("scaffold failed: {e}")),
                Err(e) => RecoveryOutcome::new(Self::NAME, false, format!("scaffold task failed: {e}")),
            };
        }

        let mut outcome = RecoveryOutcome::new(
            Self::NAME,
            false,
            format!("no template resembles '{requested}'"),
        );
        if !available.is_empty() {
            let listed: Vec<&str> = available.iter().map(TemplateName::as_str).collect();
            outcome = outcome.with_suggestions(vec![format!("available templates: {}", listed.join(", "))]);
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Filesystem and permissions
// ---------------------------------------------------------------------------

/// Creates missing parent directories, repairs read-only output
/// directories, and otherwise proposes a writable alternate output path.
#[derive(Debug, Default)]
pub struct FileSystemStrategy;

impl FileSystemStrategy {
    pub const NAME: &'static str = "filesystem_repair";
}

#[async_trait]
impl RecoveryStrategy for FileSystemStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::FileSystemError | ErrorKind::PermissionError)
    }

    async fn recover(
        &self,
        error: &GenerationError,
        ctx: &RecoveryContext,
        _pattern: &ErrorPattern,
    ) -> RecoveryOutcome {
        let Some(output) = ctx.output_path.clone().or_else(|| error.path().map(Path::to_path_buf)) else {
            return RecoveryOutcome::new(Self::NAME, false, "no path to repair");
        };
        let kind = error.kind();
        match tokio::task::spawn_blocking(move || repair_path(kind, &output)).await {
            Ok(outcome) => outcome,
            Err(e) => RecoveryOutcome::new(Self::NAME, false, format!("repair task failed: {e}")),
        }
    }
}

fn repair_path(kind: ErrorKind, output: &Path) -> RecoveryOutcome {
    if kind == ErrorKind::FileSystemError {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty() && !p.exists()) {
            return match std::fs::create_dir_all(parent) {
                Ok(()) => RecoveryOutcome::new(
                    FileSystemStrategy::NAME,
                    true,
                    format!("created missing directory {}", parent.display()),
                )
                .with_action(RecoveryAction::CreatedDirectory {
                    path: parent.to_path_buf(),
                }),
                Err(e) => alternate_output(output, format!("could not create {}: {e}", parent.display())),
            };
        }
    }

    if kind == ErrorKind::PermissionError {
        if let Some(dir) = nearest_existing(output) {
            if grant_owner_write(&dir) && is_writable(&dir) {
                return RecoveryOutcome::new(
                    FileSystemStrategy::NAME,
                    true,
                    format!("made {} writable", dir.display()),
                )
                .with_action(RecoveryAction::RepairedPermissions { path: dir });
            }
        }
    }

    alternate_output(output, format!("{} is not writable", output.display()))
}

/// Propose the first writable alternate: a `-generated` sibling, then a
/// directory under the system temp dir.
fn alternate_output(output: &Path, reason: String) -> RecoveryOutcome {
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let candidates = [
        output.with_file_name(format!("{file_name}-generated")),
        std::env::temp_dir().join("stencil").join(&file_name),
    ];

    for candidate in candidates {
        let probe_dir = nearest_existing(&candidate);
        if probe_dir.as_deref().map(is_writable).unwrap_or(false) && !non_empty_dir(&candidate) {
            debug!(path = %candidate.display(), "alternate output path is writable");
            return RecoveryOutcome::new(FileSystemStrategy::NAME, true, reason)
                .with_suggestions(vec![format!("retry with output path {}", candidate.display())])
                .with_action(RecoveryAction::AlternateOutput { path: candidate });
        }
    }
    RecoveryOutcome::new(FileSystemStrategy::NAME, false, reason)
        .with_suggestions(vec![format!("check write permissions on {}", output.display())])
}

/// Add owner read/write/search to `dir` when it lacks them; group and other
/// bits are untouched. Returns whether the mode changed.
#[cfg(unix)]
fn grant_owner_write(dir: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = std::fs::metadata(dir) else {
        return false;
    };
    let mode = meta.permissions().mode();
    let repaired = mode | 0o700;
    repaired != mode && std::fs::set_permissions(dir, std::fs::Permissions::from_mode(repaired)).is_ok()
}

#[cfg(not(unix))]
fn grant_owner_write(dir: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(dir) else {
        return false;
    };
    let mut perms = meta.permissions();
    if !perms.readonly() {
        return false;
    }
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(dir, perms).is_ok()
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}

fn non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".stencil-probe-{}", std::process::id()));
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Variable validation
// ---------------------------------------------------------------------------

/// Fills missing or mistyped variables with declared defaults, coerced
/// values, or values synthesized from the variable's name and type.
#[derive(Debug, Default)]
pub struct VariableDefaultsStrategy;

impl VariableDefaultsStrategy {
    pub const NAME: &'static str = "variable_defaults";
}

#[async_trait]
impl RecoveryStrategy for VariableDefaultsStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::VariableValidationFailed
    }

    async fn recover(
        &self,
        error: &GenerationError,
        ctx: &RecoveryContext,
        _pattern: &ErrorPattern,
    ) -> RecoveryOutcome {
        let GenerationError::VariableValidation { issues, .. } = error else {
            return RecoveryOutcome::new(Self::NAME, false, "no variable issues to repair");
        };

        let mut synthesized = Variables::new();
        for issue in issues {
            let declared_default = ctx
                .descriptor
                .as_ref()
                .and_then(|d| d.descriptor.variables.get(&issue.name))
                .and_then(|spec| spec.default.clone());
            let value = declared_default
                .or_else(|| {
                    ctx.variables
                        .get(&issue.name)
                        .and_then(|v| coerce(v, issue.expected))
                })
                .unwrap_or_else(|| synthesize(&issue.name, issue.expected, ctx));
            synthesized.insert(issue.name.clone(), value);
        }

        if synthesized.is_empty() {
            return RecoveryOutcome::new(Self::NAME, false, "nothing to synthesize");
        }
        let names: Vec<&str> = synthesized.keys().map(String::as_str).collect();
        let suggestions = synthesized
            .iter()
            .map(|(name, value)| format!("--var {name}={}", plain(value)))
            .collect();
        RecoveryOutcome::new(
            Self::NAME,
            true,
            format!("synthesized values for {}", names.join(", ")),
        )
        .with_suggestions(suggestions)
        .with_action(RecoveryAction::SynthesizedVariables {
            variables: synthesized,
        })
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a mistyped value when it has an obvious reading.
fn coerce(value: &Value, expected: VariableType) -> Option<Value> {
    let text = value.as_str()?.trim().to_ascii_lowercase();
    match expected {
        VariableType::Boolean => match text.as_str() {
            "yes" | "y" | "on" | "1" => Some(json!(true)),
            "no" | "n" | "off" | "0" => Some(json!(false)),
            _ => None,
        },
        VariableType::List => Some(json!(text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>())),
        _ => None,
    }
}

fn synthesize(name: &str, expected: VariableType, ctx: &RecoveryContext) -> Value {
    match expected {
        VariableType::Boolean => json!(false),
        VariableType::Integer => json!(0),
        VariableType::Number => json!(0.0),
        VariableType::List => json!([]),
        VariableType::String => {
            let lower = name.to_ascii_lowercase();
            if lower.contains("name") {
                let from_output = ctx
                    .output_path
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned());
                let fallback = ctx
                    .template
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "project".to_string());
                json!(from_output.unwrap_or(fallback))
            } else if lower.contains("version") {
                json!("0.1.0")
            } else if lower.contains("license") {
                json!("MIT")
            } else if lower.contains("author") {
                json!(std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()))
            } else {
                json!("")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Drops the cached handle so the retry reloads the template from disk.
pub struct BackendRetryStrategy {
    invalidator: Arc<dyn CacheInvalidator>,
}

impl BackendRetryStrategy {
    pub const NAME: &'static str = "backend_retry";

    pub fn new(invalidator: Arc<dyn CacheInvalidator>) -> Self {
        BackendRetryStrategy { invalidator }
    }
}

#[async_trait]
impl RecoveryStrategy for BackendRetryStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::BackendFailure
    }

    async fn recover(
        &self,
        error: &GenerationError,
        ctx: &RecoveryContext,
        pattern: &ErrorPattern,
    ) -> RecoveryOutcome {
        let name = match (&ctx.template, error) {
            (Some(name), _) => name.clone(),
            (None, GenerationError::Backend { template, .. }) => TemplateName::from(template.as_str()),
            _ => return RecoveryOutcome::new(Self::NAME, false, "no template to invalidate"),
        };
        if pattern.is_recurring && pattern.frequency > 2 * super::pattern::RECURRING_THRESHOLD {
            return RecoveryOutcome::new(
                Self::NAME,
                false,
                format!("backend keeps failing for '{name}'; not retrying"),
            )
            .with_suggestions(vec![format!("inspect the template bundle for '{name}'")]);
        }
        let removed = self.invalidator.invalidate(&name);
        debug!(template = %name, removed, "invalidated cache entry for retry");
        RecoveryOutcome::new(Self::NAME, true, format!("reloading '{name}' on retry"))
            .with_action(RecoveryAction::InvalidatedCache { name })
    }
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Advisory only. Always succeeds with a suggestion.
#[derive(Debug, Default)]
pub struct FallbackStrategy;

impl FallbackStrategy {
    pub const NAME: &'static str = "fallback";
}

#[async_trait]
impl RecoveryStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handles(&self, _kind: ErrorKind) -> bool {
        true
    }

    async fn recover(
        &self,
        error: &GenerationError,
        _ctx: &RecoveryContext,
        pattern: &ErrorPattern,
    ) -> RecoveryOutcome {
        let suggestion = error.suggestion().unwrap_or_else(|| match error.kind() {
            ErrorKind::HookExecutionError => "check the hook command, or mark it ignoreErrors".to_string(),
            ErrorKind::HookTimeout => "raise the hook's timeoutMs".to_string(),
            ErrorKind::NetworkError => "check connectivity and retry".to_string(),
            ErrorKind::InvalidTemplateFormat => "fix the template descriptor".to_string(),
            _ => "retry the generation; run with RUST_LOG=debug for details".to_string(),
        });
        RecoveryOutcome::new(
            Self::NAME,
            true,
            format!("{} ({} approach)", error.kind(), pattern.approach),
        )
        .with_suggestions(vec![suggestion])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::pattern::{Severity, SuggestedApproach};
    use crate::testing::FakeLibrary;
    use stencil_core::VariableIssue;

    fn pattern(kind: ErrorKind, frequency: usize) -> ErrorPattern {
        ErrorPattern {
            kind,
            frequency,
            success_rate: 0.0,
            is_recurring: frequency > 2,
            severity: Severity::Low,
            approach: SuggestedApproach::Retry,
        }
    }

    #[test]
    fn transposed_name_is_suggested() {
        let available: Vec<TemplateName> = ["api_server", "test_template", "web_app"]
            .into_iter()
            .map(TemplateName::from)
            .collect();
        let found = similar_names("tset_template", &available, 0.6);
        assert_eq!(found, vec![TemplateName::from("test_template")]);
    }

    #[tokio::test]
    async fn auto_scaffolds_only_when_recurring() {
        let library = Arc::new(FakeLibrary::with_templates(&["web_app"]));
        let strategy = TemplateSuggestionStrategy::new(library.clone(), library.clone(), 0.6, true);
        let error = GenerationError::TemplateNotFound {
            name: "zzz".into(),
        };
        let ctx = RecoveryContext::default();

        let first = strategy.recover(&error, &ctx, &pattern(ErrorKind::TemplateNotFound, 1)).await;
        assert!(!first.success);
        assert_eq!(first.suggestions, vec!["available templates: web_app".to_string()]);

        let third = strategy.recover(&error, &ctx, &pattern(ErrorKind::TemplateNotFound, 3)).await;
        assert!(third.success);
        assert_eq!(
            third.action,
            RecoveryAction::ScaffoldedTemplate {
                name: TemplateName::from("zzz")
            }
        );
        assert!(library.contains("zzz"));
    }

    #[tokio::test]
    async fn variables_use_defaults_coercion_and_heuristics() {
        let error = GenerationError::VariableValidation {
            template: "lib".into(),
            issues: vec![
                VariableIssue {
                    name: "project_name".into(),
                    expected: VariableType::String,
                    reason: "required variable is missing".into(),
                },
                VariableIssue {
                    name: "publish".into(),
                    expected: VariableType::Boolean,
                    reason: "expected boolean".into(),
                },
                VariableIssue {
                    name: "port".into(),
                    expected: VariableType::Integer,
                    reason: "expected integer".into(),
                },
            ],
        };
        let mut vars = Variables::new();
        vars.insert("publish".into(), json!("yes"));
        vars.insert("port".into(), json!("eighty"));
        let ctx = RecoveryContext {
            template: Some(TemplateName::from("lib")),
            output_path: Some(PathBuf::from("/work/my-app")),
            variables: vars,
            descriptor: None,
        };

        let outcome = VariableDefaultsStrategy
            .recover(&error, &ctx, &pattern(ErrorKind::VariableValidationFailed, 1))
            .await;
        assert!(outcome.success);
        let RecoveryAction::SynthesizedVariables { variables } = outcome.action else {
            panic!("expected synthesized variables");
        };
        assert_eq!(variables["project_name"], json!("my-app"));
        assert_eq!(variables["publish"], json!(true));
        assert_eq!(variables["port"], json!(0));
    }

    #[tokio::test]
    async fn missing_parent_is_created_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("a").join("b").join("out");
        let error = stencil_core::io_err(
            "create directory",
            &output,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        let ctx = RecoveryContext {
            output_path: Some(output.clone()),
            ..RecoveryContext::default()
        };

        let first = FileSystemStrategy
            .recover(&error, &ctx, &pattern(ErrorKind::FileSystemError, 1))
            .await;
        assert!(first.action.is_actionable());
        assert!(output.parent().unwrap().is_dir());

        let second = FileSystemStrategy
            .recover(&error, &ctx, &pattern(ErrorKind::FileSystemError, 2))
            .await;
        assert!(matches!(second.action, RecoveryAction::AlternateOutput { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn permission_repair_only_grants_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();
        let output = locked.join("out");
        let error = stencil_core::io_err(
            "create directory",
            &output,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let ctx = RecoveryContext {
            output_path: Some(output),
            ..RecoveryContext::default()
        };

        let outcome = FileSystemStrategy
            .recover(&error, &ctx, &pattern(ErrorKind::PermissionError, 1))
            .await;
        assert_eq!(
            outcome.action,
            RecoveryAction::RepairedPermissions {
                path: locked.clone()
            }
        );
        let mode = std::fs::metadata(&locked).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(mode & 0o002, 0, "other-write stays clear");
    }

    #[tokio::test]
    async fn fallback_always_succeeds() {
        let error = GenerationError::unknown("weird");
        let outcome = FallbackStrategy
            .recover(&error, &RecoveryContext::default(), &pattern(ErrorKind::Unknown, 1))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.suggestions.len(), 1);
    }
}
