//! `stencil warmup`: precompile templates.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use stencil_core::TemplateName;

use super::EngineArgs;

/// Arguments for `stencil warmup`.
#[derive(Args, Debug)]
pub struct WarmupArgs {
    /// Templates to precompile; defaults to the most used ones.
    pub names: Vec<String>,
}

impl WarmupArgs {
    pub async fn run(self, engine_args: &EngineArgs) -> Result<()> {
        let engine = engine_args.engine()?;
        let names = if self.names.is_empty() {
            None
        } else {
            Some(self.names.into_iter().map(TemplateName::from).collect())
        };

        let report = engine.warmup(names).await?;
        for name in &report.warmed {
            println!("{} {name}", "✓".green());
        }
        for (name, reason) in &report.failed {
            println!("{} {name}: {reason}", "✗".red());
        }
        println!(
            "warmed {} template(s), {} failed",
            report.warmed.len(),
            report.failed.len()
        );
        Ok(())
    }
}
