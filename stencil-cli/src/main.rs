//! Stencil: template scaffolding CLI.
//!
//! # Usage
//!
//! ```text
//! stencil generate <template> <output> [--var key=value]... [--overwrite] [--no-hooks] [--priority N] [--json]
//! stencil list [--json]
//! stencil warmup [names...]
//! stencil stats [--warm] [--json]
//! ```
//!
//! Global options: `--templates <dir>` (env `STENCIL_TEMPLATES`, default
//! `~/.stencil/templates`) and `--config <file>` (default
//! `~/.stencil/config.yaml`).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    generate::GenerateArgs, list::ListArgs, stats::StatsArgs, warmup::WarmupArgs, EngineArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stencil",
    version,
    about = "Generate projects from template bundles",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a template into an output directory.
    Generate(GenerateArgs),

    /// List available templates.
    List(ListArgs),

    /// Precompile templates into the cache.
    Warmup(WarmupArgs),

    /// Show cache, scheduler, and recovery statistics.
    Stats(StatsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Generate(args) => args.run(&cli.engine).await,
            Commands::List(args) => args.run(&cli.engine),
            Commands::Warmup(args) => args.run(&cli.engine).await,
            Commands::Stats(args) => args.run(&cli.engine).await,
        }
    })
}
