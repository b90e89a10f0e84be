//! Operation outcomes and the run report
//!
//! The report is the only product of a run besides fatal errors: one
//! outcome per (repository, operation) pair, grouped by repository in
//! discovery order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::platform::Platform;

/// Result of one operation against one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The platform accepted the change
    Applied,
    /// Dry run: the operation would have been attempted
    Planned,
    /// The platform rejected the change or the call did not complete
    Failed { cause: String },
}

impl OutcomeStatus {
    pub fn failed(cause: impl Into<String>) -> Self {
        OutcomeStatus::Failed {
            cause: cause.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeStatus::Failed { .. })
    }
}

/// Reconciliation phase, in the order every repository goes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BranchProtection,
    TeamAccess,
    Settings,
}

/// One update applied to a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    BranchProtection { branch: String },
    TeamAccess { team: String, permission: String },
    RepositorySettings,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::BranchProtection => write!(f, "branch protection"),
            Phase::TeamAccess => write!(f, "team access"),
            Phase::Settings => write!(f, "settings"),
        }
    }
}

impl Operation {
    pub fn phase(&self) -> Phase {
        match self {
            Operation::BranchProtection { .. } => Phase::BranchProtection,
            Operation::TeamAccess { .. } => Phase::TeamAccess,
            Operation::RepositorySettings => Phase::Settings,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::BranchProtection { branch } => write!(f, "protect branch '{}'", branch),
            Operation::TeamAccess { team, permission } => {
                write!(f, "grant team '{}' {} access", team, permission)
            }
            Operation::RepositorySettings => write!(f, "update repository settings"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub repository: String,
    pub operation: Operation,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Every outcome recorded for one repository, in phase order
#[derive(Debug, Clone, Serialize)]
pub struct RepoReport {
    pub repository: String,
    pub outcomes: Vec<OperationOutcome>,
}

impl RepoReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status.is_failure())
    }
}

/// Aggregated counts for rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub repositories: usize,
    pub applied: usize,
    pub planned: usize,
    pub failed: usize,
}

/// Results from a complete run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub platform: Platform,
    pub organization: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Set when the run stopped early; `skipped` repositories were not touched
    pub cancelled: bool,
    pub skipped: usize,
    pub repositories: Vec<RepoReport>,
}

impl RunReport {
    /// All outcomes in discovery order, phase order within a repository
    pub fn outcomes(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.repositories.iter().flat_map(|r| r.outcomes.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes().filter(|o| o.status.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            repositories: self.repositories.len(),
            ..RunSummary::default()
        };

        for outcome in self.outcomes() {
            match outcome.status {
                OutcomeStatus::Applied => summary.applied += 1,
                OutcomeStatus::Planned => summary.planned += 1,
                OutcomeStatus::Failed { .. } => summary.failed += 1,
            }
        }

        summary
    }
}
