//! Pre- and post-generation hooks.
//!
//! - [`types`]: [`Hook`], [`HookAction`] and the decorator wrappers
//! - [`condition`]: the boolean condition language used by `when`
//! - [`script`]: shell hooks from template descriptors
//! - [`pipeline`]: [`HookRegistry`] and ordered stage execution

pub mod condition;
pub mod pipeline;
pub mod script;
pub mod types;

pub use condition::{Condition, ConditionError, ConditionPolicy};
pub use pipeline::{run_hooks, HookRegistry, FAILED_HOOK_KEY};
pub use script::ScriptHook;
pub use types::{Hook, HookAction, HookContext, HookResult, DEFAULT_PRIORITY};
