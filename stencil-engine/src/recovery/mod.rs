//! Error recovery: history, recurrence patterns, and repair strategies.

pub mod history;
pub mod manager;
pub mod pattern;
pub mod strategy;

pub use history::{ErrorHistory, ErrorRecord, RecordedOutcome};
pub use manager::{DailyCount, ErrorRecoveryManager, RecoveryAttempt, RecoveryStats, StrategyStats};
pub use pattern::{compute_pattern, ErrorPattern, Severity, SuggestedApproach};
pub use strategy::{
    similar_names, BackendRetryStrategy, FallbackStrategy, FileSystemStrategy, RecoveryAction,
    RecoveryContext, RecoveryOutcome, RecoveryStrategy, TemplateSuggestionStrategy,
    VariableDefaultsStrategy,
};
