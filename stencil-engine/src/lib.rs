//! # stencil-engine
//!
//! Orchestration around the generation backend:
//!
//! - [`cache`]: precompiled templates with expiry, eviction and warm-up
//! - [`hooks`]: pre/post-generation hooks and their decorators
//! - [`recovery`]: error history, recurrence patterns, repair strategies
//! - [`scheduler`]: bounded-concurrency queue with deduplication
//! - [`generator`]: one generation end to end
//! - [`engine`]: [`StencilEngine`], the facade over all of the above
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stencil_core::TemplateLibrary;
//! use stencil_engine::{EngineConfig, GenerationRequest, StencilEngine};
//!
//! # async fn demo() {
//! let engine = StencilEngine::new(EngineConfig::default(), TemplateLibrary::new("/templates"));
//! let request = GenerationRequest::new("rust_lib", "/work/widgets")
//!     .with_variable("crate_name", "widgets");
//! let result = engine.generate_with_hooks(request).await;
//! if !result.success {
//!     eprintln!("{:?}: {:?}", result.message, result.suggestion);
//! }
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod generator;
pub mod hooks;
pub mod recovery;
pub mod request;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheInvalidator, CacheManager, CacheStats, PrecompiledTemplate, WarmupReport};
pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineStats, StencilEngine};
pub use hooks::{Condition, ConditionPolicy, Hook, HookContext, HookRegistry, HookResult};
pub use recovery::{ErrorRecoveryManager, RecoveryOutcome, RecoveryStats};
pub use request::{GenerationRequest, GenerationResult};
pub use scheduler::{AsyncGenerationManager, GenerationHandle, GenerationRunner, SchedulerStats};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
