//! Shell hooks declared in template descriptors.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use stencil_core::ErrorKind;

use super::types::{HookContext, HookResult};

/// Bytes of stderr kept in a failure message.
const STDERR_TAIL: usize = 2048;

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static placeholder regex")
    })
}

/// Replace `{{name}}` with the bound value, shell-quoted.
///
/// `template_name` and `output_path` resolve to the context's fields unless a
/// variable of the same name is bound. Unknown placeholders are left as-is.
/// Every substituted value is a single shell word, so a placeholder must not
/// sit inside quotes of its own in the command.
pub fn interpolate(command: &str, ctx: &HookContext) -> String {
    placeholder_regex()
        .replace_all(command, |caps: &Captures<'_>| {
            let name = &caps[1];
            let text = match ctx.variables.get(name) {
                Some(value) => value_text(value),
                None => match name {
                    "template_name" => ctx.template_name.to_string(),
                    "output_path" => ctx.output_path.display().to_string(),
                    _ => return caps[0].to_string(),
                },
            };
            shell_quote(&text)
        })
        .into_owned()
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c)
}

/// POSIX single-quoting; words made only of safe characters pass through.
#[cfg(not(windows))]
fn shell_quote(text: &str) -> String {
    if !text.is_empty() && text.chars().all(is_shell_safe) {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// `cmd` has no single quotes; double-quote and drop embedded quotes.
#[cfg(windows)]
fn shell_quote(text: &str) -> String {
    if !text.is_empty() && text.chars().all(is_shell_safe) {
        return text.to_string();
    }
    format!("\"{}\"", text.replace('"', ""))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A shell command run through `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHook {
    pub command: String,
    pub timeout: Duration,
}

impl ScriptHook {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        ScriptHook {
            command: command.into(),
            timeout,
        }
    }

    /// Run the interpolated command. Exit status 0 is success.
    ///
    /// The working directory is the output path once it exists. A command
    /// still running at the timeout is killed.
    pub async fn run(&self, hook: &str, ctx: &HookContext) -> HookResult {
        let command = interpolate(&self.command, ctx);
        debug!(hook, command = %command, "running script hook");

        let mut cmd = shell(&command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if ctx.output_path.is_dir() {
            cmd.current_dir(&ctx.output_path);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return HookResult::failure(
                    ErrorKind::HookExecutionError,
                    format!("hook '{hook}' could not start: {e}"),
                )
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!(hook, timeout_ms = self.timeout.as_millis() as u64, "script hook timed out");
                HookResult::failure(
                    ErrorKind::HookTimeout,
                    format!(
                        "hook '{hook}' timed out after {}ms",
                        self.timeout.as_millis()
                    ),
                )
            }
            Ok(Err(e)) => HookResult::failure(
                ErrorKind::HookExecutionError,
                format!("hook '{hook}' failed while running: {e}"),
            ),
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if stdout.is_empty() {
                    HookResult::ok()
                } else {
                    HookResult::ok_with(stdout)
                }
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = stderr.trim();
                let tail = &stderr[floor_char_boundary(stderr, stderr.len().saturating_sub(STDERR_TAIL))..];
                let code = output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let mut message = format!("hook '{hook}' exited with status {code}");
                if !tail.is_empty() {
                    message.push_str(": ");
                    message.push_str(tail);
                }
                HookResult::failure(ErrorKind::HookExecutionError, message)
            }
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
