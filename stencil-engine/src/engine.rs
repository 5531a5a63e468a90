//! The engine facade: wiring only, no state of its own.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Serialize;
use tracing::info;

use stencil_core::{
    DescriptorSource, GenerationError, HookStage, TemplateLibrary, TemplateLister, TemplateName,
    TemplateScaffolder,
};
use stencil_renderer::{GenerationBackend, TeraBackend};

use crate::cache::{CacheManager, CacheSettings, CacheStats, WarmupReport};
use crate::config::EngineConfig;
use crate::generator::{Generator, GeneratorSettings};
use crate::hooks::{Hook, HookRegistry};
use crate::recovery::{
    BackendRetryStrategy, ErrorRecoveryManager, FileSystemStrategy, RecoveryStats,
    RecoveryStrategy, TemplateSuggestionStrategy, VariableDefaultsStrategy,
};
use crate::request::{GenerationRequest, GenerationResult};
use crate::scheduler::{AsyncGenerationManager, GenerationHandle, SchedulerSettings, SchedulerStats};

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: CacheStats,
    #[serde(rename = "async")]
    pub scheduler: SchedulerStats,
    pub recovery: RecoveryStats,
    pub registered_hooks: usize,
}

pub struct StencilEngine {
    config: EngineConfig,
    lister: Arc<dyn TemplateLister>,
    cache: Arc<CacheManager>,
    hooks: Arc<HookRegistry>,
    recovery: Arc<ErrorRecoveryManager>,
    generator: Arc<Generator>,
    scheduler: AsyncGenerationManager,
}

impl StencilEngine {
    /// An engine over an on-disk template library, rendered with Tera.
    pub fn new(config: EngineConfig, library: TemplateLibrary) -> Self {
        let backend = Arc::new(TeraBackend::new(library.clone()));
        Self::with_backend(config, Arc::new(library), backend)
    }

    /// An engine over any template source and backend.
    pub fn with_backend<L>(config: EngineConfig, library: Arc<L>, backend: Arc<dyn GenerationBackend>) -> Self
    where
        L: TemplateLister + DescriptorSource + TemplateScaffolder + 'static,
    {
        let lister: Arc<dyn TemplateLister> = library.clone();
        let descriptors: Arc<dyn DescriptorSource> = library.clone();
        let scaffolder: Arc<dyn TemplateScaffolder> = library;

        let cache = Arc::new(CacheManager::new(
            backend,
            descriptors,
            Arc::clone(&lister),
            CacheSettings::from(&config),
        ));

        let recovery = Arc::new(ErrorRecoveryManager::new(
            config.history_capacity,
            config.pattern_window(),
        ));
        recovery.register_strategy(Arc::new(TemplateSuggestionStrategy::new(
            Arc::clone(&lister),
            scaffolder,
            config.similarity_threshold,
            config.auto_scaffold,
        )));
        recovery.register_strategy(Arc::new(FileSystemStrategy));
        recovery.register_strategy(Arc::new(VariableDefaultsStrategy));
        recovery.register_strategy(Arc::new(BackendRetryStrategy::new(cache.clone())));

        let hooks = Arc::new(HookRegistry::new());
        let generator = Arc::new(Generator::new(
            Arc::clone(&cache),
            Arc::clone(&hooks),
            Arc::clone(&recovery),
            GeneratorSettings::from(&config),
        ));
        let scheduler = AsyncGenerationManager::new(generator.clone(), SchedulerSettings::from(&config));

        info!(
            max_cache_size = config.max_cache_size,
            max_concurrent = config.max_concurrent_generations,
            "engine ready"
        );

        StencilEngine {
            config,
            lister,
            cache,
            hooks,
            recovery,
            generator,
            scheduler,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Cache plus backend only: no hooks, no recovery.
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        self.generator.generate(&request).await
    }

    /// Pre-hooks, generation, post-hooks, and recovery on failure. Extra
    /// hooks and the inheritance mode come from the request.
    pub async fn generate_with_hooks(&self, request: GenerationRequest) -> GenerationResult {
        self.generator.generate_with_hooks(&request).await
    }

    /// Queue through the scheduler; each unit runs as
    /// [`generate_with_hooks`](Self::generate_with_hooks).
    pub fn generate_async(&self, request: GenerationRequest) -> GenerationHandle {
        self.scheduler.submit(request)
    }

    pub async fn generate_batch(
        &self,
        requests: Vec<GenerationRequest>,
        allow_partial_failure: bool,
    ) -> Result<Vec<GenerationResult>, GenerationError> {
        self.scheduler.submit_batch(requests, allow_partial_failure).await
    }

    /// Results in completion order.
    pub fn generate_stream(
        &self,
        requests: Vec<GenerationRequest>,
        max_concurrency: Option<usize>,
    ) -> BoxStream<'static, GenerationResult> {
        self.scheduler.stream(requests, max_concurrency)
    }

    pub fn cancel_pending(&self) -> usize {
        self.scheduler.cancel_pending()
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    pub async fn warmup(&self, names: Option<Vec<TemplateName>>) -> Result<WarmupReport, GenerationError> {
        self.cache.warm_up(names).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // -----------------------------------------------------------------------
    // Hooks and recovery
    // -----------------------------------------------------------------------

    pub fn register_hook(&self, hook: Hook) {
        self.hooks.register(hook);
    }

    pub fn unregister_hook(&self, name: &str, stage: HookStage) -> bool {
        self.hooks.unregister(name, stage)
    }

    pub fn clear_hooks(&self) {
        self.hooks.clear();
    }

    pub fn register_recovery_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        self.recovery.register_strategy(strategy);
    }

    pub fn clear_error_history(&self) {
        self.recovery.clear_history();
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn available_templates(&self) -> Result<Vec<TemplateName>, GenerationError> {
        self.lister.available_templates()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.cache.stats(),
            scheduler: self.scheduler.stats(),
            recovery: self.recovery.stats(),
            registered_hooks: self.hooks.len(),
        }
    }
}
