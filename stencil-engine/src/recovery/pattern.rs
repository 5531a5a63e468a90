//! Recurrence analysis over the recent error history.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stencil_core::ErrorKind;

use super::history::ErrorRecord;

/// Occurrences within the window above which a kind is recurring.
pub const RECURRING_THRESHOLD: usize = 2;
const ESCALATE_ONCE: usize = 5;
const ESCALATE_TWICE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedApproach {
    /// Isolated failure; trying again is reasonable.
    Retry,
    /// Recurring but usually repaired; keep applying the strategy.
    Adaptive,
    /// Recurring and rarely repaired; fix the cause before the next run.
    Preventive,
    /// Needs a person.
    Manual,
}

impl fmt::Display for SuggestedApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuggestedApproach::Retry => "retry",
            SuggestedApproach::Adaptive => "adaptive",
            SuggestedApproach::Preventive => "preventive",
            SuggestedApproach::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPattern {
    pub kind: ErrorKind,
    /// Records of `kind` inside the window.
    pub frequency: usize,
    /// Share of the windowed records with an outcome that were recovered.
    pub success_rate: f64,
    pub is_recurring: bool,
    pub severity: Severity,
    pub approach: SuggestedApproach,
}

/// Derive the pattern for `kind` from `records` within `window` of `now`.
pub fn compute_pattern(
    kind: ErrorKind,
    records: &[ErrorRecord],
    now: DateTime<Utc>,
    window: Duration,
) -> ErrorPattern {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(3650));
    let cutoff = now - window;
    let recent: Vec<&ErrorRecord> = records
        .iter()
        .filter(|r| r.kind == kind && r.timestamp >= cutoff)
        .collect();

    let frequency = recent.len();
    let resolved: Vec<bool> = recent
        .iter()
        .filter_map(|r| r.outcome.as_ref().map(|o| o.success))
        .collect();
    let success_rate = if resolved.is_empty() {
        0.0
    } else {
        resolved.iter().filter(|s| **s).count() as f64 / resolved.len() as f64
    };
    let is_recurring = frequency > RECURRING_THRESHOLD;
    let severity = severity_for(kind, frequency);

    ErrorPattern {
        kind,
        frequency,
        success_rate,
        is_recurring,
        severity,
        approach: approach_for(kind, is_recurring, success_rate, severity, !resolved.is_empty()),
    }
}

fn severity_for(kind: ErrorKind, frequency: usize) -> Severity {
    let mut severity = match kind {
        ErrorKind::FileSystemError | ErrorKind::PermissionError => Severity::High,
        ErrorKind::BackendFailure | ErrorKind::InvalidTemplateFormat => Severity::Medium,
        _ => Severity::Low,
    };
    if frequency >= ESCALATE_ONCE {
        severity = severity.escalate();
    }
    if frequency >= ESCALATE_TWICE {
        severity = severity.escalate();
    }
    severity
}

fn approach_for(
    kind: ErrorKind,
    is_recurring: bool,
    success_rate: f64,
    severity: Severity,
    has_outcomes: bool,
) -> SuggestedApproach {
    match kind {
        ErrorKind::OutputPathConflict | ErrorKind::InvalidTemplateFormat => {
            return SuggestedApproach::Manual
        }
        _ => {}
    }
    if !is_recurring {
        return SuggestedApproach::Retry;
    }
    if has_outcomes && success_rate >= 0.5 {
        SuggestedApproach::Adaptive
    } else if severity == Severity::Critical {
        SuggestedApproach::Manual
    } else {
        SuggestedApproach::Preventive
    }
}
