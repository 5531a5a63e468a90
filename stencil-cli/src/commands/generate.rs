//! `stencil generate`: one generation with hooks and recovery.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use stencil_core::Variables;
use stencil_engine::GenerationRequest;

use super::EngineArgs;

/// Arguments for `stencil generate`.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Template to generate.
    pub template: String,

    /// Output directory.
    pub output: PathBuf,

    /// Template variable as `key=value`; values parse as JSON, else string.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, Value)>,

    /// Write into an existing non-empty output directory.
    #[arg(long)]
    pub overwrite: bool,

    /// Skip declared and registered hooks.
    #[arg(long)]
    pub no_hooks: bool,

    /// Scheduling priority; higher runs first.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Emit the result as JSON.
    #[arg(long)]
    pub json: bool,
}

impl GenerateArgs {
    pub async fn run(self, engine_args: &EngineArgs) -> Result<()> {
        let engine = engine_args.engine()?;

        let variables: Variables = self.vars.into_iter().collect();
        let mut request = GenerationRequest::new(self.template.as_str(), &self.output)
            .with_variables(variables)
            .with_priority(self.priority)
            .overwrite(self.overwrite);
        if self.no_hooks {
            request = request.without_hooks();
        }

        let result = engine.generate_async(request).await;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("failed to serialize result")?
            );
        } else if result.success {
            println!(
                "{} {} → {} ({} files, {} ms)",
                "✓".green(),
                result.template.as_str().bold(),
                result.output_path.display(),
                result.generated_files.len(),
                result.duration.as_millis(),
            );
            for file in &result.generated_files {
                let shown = file.strip_prefix(&result.output_path).unwrap_or(file);
                println!("  {}", shown.display());
            }
        } else {
            eprintln!(
                "{} {}",
                "✗".red(),
                result.message.as_deref().unwrap_or("generation failed")
            );
            if let Some(suggestion) = &result.suggestion {
                eprintln!("  {} {suggestion}", "hint:".yellow());
            }
        }

        if !result.success {
            let kind = result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            bail!("generation of '{}' failed ({kind})", result.template);
        }
        Ok(())
    }
}

/// `key=value`, with the value read as JSON when it parses and as a plain
/// string otherwise.
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
