//! Classify, record, and dispatch failures to a recovery strategy.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use stencil_core::{ErrorKind, GenerationError};

use super::history::{ErrorHistory, RecordedOutcome};
use super::pattern::{compute_pattern, ErrorPattern};
use super::strategy::{FallbackStrategy, RecoveryContext, RecoveryOutcome, RecoveryStrategy};
use crate::lock;

const TREND_DAYS: i64 = 7;

/// One `recover` call: the outcome plus the pattern it was chosen under.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub record_id: u64,
    pub kind: ErrorKind,
    pub pattern: ErrorPattern,
    pub outcome: RecoveryOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyStats {
    pub attempts: usize,
    pub successes: usize,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub errors: usize,
    pub recovered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub total: usize,
    pub recovered: usize,
    pub success_rate: f64,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub by_strategy: BTreeMap<String, StrategyStats>,
    /// Oldest day first; always `TREND_DAYS` entries ending today.
    pub daily_trend: Vec<DailyCount>,
}

pub struct ErrorRecoveryManager {
    history: ErrorHistory,
    strategies: Mutex<Vec<Arc<dyn RecoveryStrategy>>>,
    fallback: Arc<dyn RecoveryStrategy>,
    window: Duration,
}

impl ErrorRecoveryManager {
    pub fn new(history_capacity: usize, window: Duration) -> Self {
        ErrorRecoveryManager {
            history: ErrorHistory::new(history_capacity),
            strategies: Mutex::new(Vec::new()),
            fallback: Arc::new(FallbackStrategy),
            window,
        }
    }

    /// Add a strategy. Later registrations take precedence for the kinds
    /// they handle.
    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        lock(&self.strategies).insert(0, strategy);
    }

    pub fn history(&self) -> &ErrorHistory {
        &self.history
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    /// Pattern for `kind` over the current window.
    pub fn pattern(&self, kind: ErrorKind) -> ErrorPattern {
        compute_pattern(kind, &self.history.snapshot(), Utc::now(), self.window)
    }

    pub async fn recover(&self, error: &GenerationError, ctx: &RecoveryContext) -> RecoveryAttempt {
        self.recover_at(error, ctx, Utc::now()).await
    }

    /// [`recover`](Self::recover) with an explicit clock, for tests.
    pub async fn recover_at(
        &self,
        error: &GenerationError,
        ctx: &RecoveryContext,
        now: DateTime<Utc>,
    ) -> RecoveryAttempt {
        let kind = error.kind();
        let record_id = self
            .history
            .append(kind, ctx.template.clone(), error.to_string(), now);
        let pattern = compute_pattern(kind, &self.history.snapshot(), now, self.window);

        let outcome = if kind == ErrorKind::OutputPathConflict {
            RecoveryOutcome::new("none", false, "output path conflicts are not recovered automatically")
                .with_suggestions(error.suggestion().into_iter().collect())
        } else {
            let strategy = self.select(kind);
            strategy.recover(error, ctx, &pattern).await
        };

        info!(
            %kind,
            strategy = %outcome.strategy,
            success = outcome.success,
            frequency = pattern.frequency,
            severity = %pattern.severity,
            approach = %pattern.approach,
            template = ctx.template.as_ref().map(|t| t.as_str()).unwrap_or(""),
            "recovery attempted"
        );

        self.history.set_outcome(
            record_id,
            RecordedOutcome {
                success: outcome.success,
                strategy: outcome.strategy.clone(),
                message: outcome.message.clone(),
            },
        );

        RecoveryAttempt {
            record_id,
            kind,
            pattern,
            outcome,
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> RecoveryStats {
        let records = self.history.snapshot();
        let total = records.len();
        let recovered = records
            .iter()
            .filter(|r| r.outcome.as_ref().is_some_and(|o| o.success))
            .count();

        let mut by_kind: BTreeMap<ErrorKind, usize> = BTreeMap::new();
        let mut by_strategy: BTreeMap<String, StrategyStats> = BTreeMap::new();
        for record in &records {
            *by_kind.entry(record.kind).or_default() += 1;
            if let Some(outcome) = &record.outcome {
                let entry = by_strategy.entry(outcome.strategy.clone()).or_default();
                entry.attempts += 1;
                if outcome.success {
                    entry.successes += 1;
                }
            }
        }
        for entry in by_strategy.values_mut() {
            entry.effectiveness = ratio(entry.successes, entry.attempts);
        }

        let today = now.date_naive();
        let daily_trend = (0..TREND_DAYS)
            .rev()
            .map(|days_ago| {
                let date = today - chrono::Duration::days(days_ago);
                let day: Vec<_> = records
                    .iter()
                    .filter(|r| r.timestamp.date_naive() == date)
                    .collect();
                DailyCount {
                    date,
                    errors: day.len(),
                    recovered: day
                        .iter()
                        .filter(|r| r.outcome.as_ref().is_some_and(|o| o.success))
                        .count(),
                }
            })
            .collect();

        RecoveryStats {
            total,
            recovered,
            success_rate: ratio(recovered, total),
            by_kind,
            by_strategy,
            daily_trend,
        }
    }

    fn select(&self, kind: ErrorKind) -> Arc<dyn RecoveryStrategy> {
        lock(&self.strategies)
            .iter()
            .find(|s| s.handles(kind))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
