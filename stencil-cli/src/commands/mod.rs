pub mod generate;
pub mod list;
pub mod stats;
pub mod warmup;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use stencil_core::{library, TemplateLibrary};
use stencil_engine::{EngineConfig, StencilEngine};

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct EngineArgs {
    /// Template library root.
    #[arg(long, global = true, env = "STENCIL_TEMPLATES")]
    pub templates: Option<PathBuf>,

    /// Engine config file (YAML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl EngineArgs {
    /// Config file, then `STENCIL_*` overrides, then `--templates`.
    pub fn config(&self) -> Result<EngineConfig> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::home_dir().map(|home| home.join(".stencil").join("config.yaml")),
        };
        let config = match path {
            Some(path) => EngineConfig::load_at(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        let mut config = config
            .with_env_overrides()
            .context("invalid STENCIL_* environment override")?;
        if let Some(root) = &self.templates {
            config.template_root = Some(root.clone());
        }
        Ok(config)
    }

    pub fn library(&self, config: &EngineConfig) -> Result<TemplateLibrary> {
        let root = match &config.template_root {
            Some(root) => root.clone(),
            None => library::default_root().context("could not determine home directory")?,
        };
        tracing::debug!(root = %root.display(), "template library");
        Ok(TemplateLibrary::new(root))
    }

    pub fn engine(&self) -> Result<StencilEngine> {
        let config = self.config()?;
        let library = self.library(&config)?;
        Ok(StencilEngine::new(config, library))
    }
}
