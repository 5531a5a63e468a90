//! `stencil list`: templates in the library.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use stencil_core::library::{DescriptorSource, TemplateLister};

use super::EngineArgs;

/// Arguments for `stencil list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct TemplateRow {
    #[tabled(rename = "template")]
    name: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "extends")]
    extends: String,
    #[tabled(rename = "variables")]
    variables: usize,
    #[tabled(rename = "description")]
    description: String,
}

impl ListArgs {
    pub fn run(self, engine_args: &EngineArgs) -> Result<()> {
        let config = engine_args.config()?;
        let library = engine_args.library(&config)?;

        let names = library
            .available_templates()
            .with_context(|| format!("failed to list templates in {}", library.root().display()))?;

        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            let resolved = library
                .load_descriptor(&name)
                .with_context(|| format!("failed to load template '{name}'"))?;
            let descriptor = resolved.descriptor;
            rows.push(TemplateRow {
                name: name.to_string(),
                version: descriptor.version,
                extends: descriptor.extends.map(|p| p.to_string()).unwrap_or_default(),
                variables: descriptor.variables.len(),
                description: descriptor.description,
            });
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize template list")?
            );
            return Ok(());
        }

        if rows.is_empty() {
            println!("No templates in {}.", library.root().display());
            return Ok(());
        }
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
