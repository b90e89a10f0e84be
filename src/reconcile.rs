//! Reconciler - applies the desired state across the discovered repositories
//!
//! Every repository goes through the same phases in order: branch
//! protection, team access, repository settings. Phases the platform does
//! not support are skipped. Each operation is attempted independently; a
//! failure (HTTP error, transport error or timeout) is recorded as an
//! outcome and never stops sibling operations or other repositories.
//!
//! Repositories are processed by a bounded pool. Only discovery failures and
//! capability misuse abort a run.

use anyhow::Result;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::RepositoryDiscovery;
use crate::platform::{Capabilities, PlatformClient, PlatformError, RepoDescriptor};
use crate::report::{Operation, OperationOutcome, OutcomeStatus, RepoReport, RunReport};

/// Conditions that abort a run
#[derive(Debug, Error)]
pub enum RunError {
    /// Enumeration failed; no operation was attempted
    #[error("repository discovery failed: {0}")]
    Discovery(#[source] PlatformError),

    /// An operation the platform does not support was invoked
    #[error("capability misuse: {0}")]
    Capability(#[source] PlatformError),
}

/// Cooperative cancellation, checked before each repository starts
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one run against one platform client
pub struct Reconciler {
    client: Arc<dyn PlatformClient>,
    config: Arc<Config>,
    discovery: RepositoryDiscovery,
    operation_timeout: Duration,
    max_parallel: usize,
    dry_run: bool,
    cancel: CancelFlag,
}

impl Reconciler {
    pub fn new(client: Arc<dyn PlatformClient>, config: Arc<Config>) -> Result<Self> {
        let discovery = RepositoryDiscovery::from_config(&config)?;

        Ok(Self {
            client,
            discovery,
            operation_timeout: Duration::from_secs(config.run.timeout),
            max_parallel: config.run.max_parallel.max(1),
            dry_run: false,
            cancel: CancelFlag::new(),
            config,
        })
    }

    /// Record planned operations instead of calling mutating endpoints
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve the target set without touching any repository
    pub async fn discover(&self) -> Result<Vec<RepoDescriptor>, RunError> {
        self.discovery
            .discover(self.client.as_ref())
            .await
            .map_err(RunError::Discovery)
    }

    /// The operations every repository receives, in phase order
    pub fn plan(&self, capabilities: Capabilities) -> Vec<Operation> {
        let mut plan: Vec<Operation> = self
            .config
            .protected_branches
            .iter()
            .map(|branch| Operation::BranchProtection {
                branch: branch.clone(),
            })
            .collect();

        if capabilities.team_access {
            plan.extend(self.config.team_access.iter().map(|(team, permission)| {
                Operation::TeamAccess {
                    team: team.clone(),
                    permission: permission.clone(),
                }
            }));
        } else if !self.config.team_access.is_empty() {
            info!(
                "Skipping team access: not supported on {}",
                self.client.platform()
            );
        }

        if capabilities.repository_settings {
            if !self.config.repo_settings.is_empty() {
                plan.push(Operation::RepositorySettings);
            }
        } else if !self.config.repo_settings.is_empty() {
            info!(
                "Skipping repository settings: not supported on {}",
                self.client.platform()
            );
        }

        debug_assert!(plan.windows(2).all(|pair| pair[0].phase() <= pair[1].phase()));
        plan
    }

    /// Run a complete reconciliation: discover, then update every repository
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let start_time = Instant::now();

        info!(
            "Starting {} on {} organization {}",
            if self.dry_run { "dry run" } else { "run" },
            self.client.platform(),
            self.client.organization()
        );

        let repositories = self.discover().await?;

        let ignored = self.client.ignored_protection_fields();
        if !ignored.is_empty() && !self.config.protected_branches.is_empty() {
            warn!(
                "{} cannot express these protection fields, they will not be applied: {}",
                self.client.platform(),
                ignored.join(", ")
            );
        }

        let plan = self.plan(self.client.capabilities());
        let (reports, skipped) = self.reconcile_all(&repositories, &plan).await?;

        let report = RunReport {
            platform: self.client.platform(),
            organization: self.client.organization().to_string(),
            dry_run: self.dry_run,
            started_at,
            duration_secs: start_time.elapsed().as_secs_f64(),
            cancelled: skipped > 0,
            skipped,
            repositories: reports,
        };

        let summary = report.summary();
        info!(
            "Run completed in {:.2}s: {} repositories, {} applied, {} planned, {} failed",
            report.duration_secs,
            summary.repositories,
            summary.applied,
            summary.planned,
            summary.failed
        );
        if report.cancelled {
            warn!("Run cancelled: {} repositories were not processed", skipped);
        }

        Ok(report)
    }

    /// Process every repository through the bounded pool.
    ///
    /// Returns the reports in discovery order and the number of repositories
    /// skipped because the run was cancelled.
    async fn reconcile_all(
        &self,
        repositories: &[RepoDescriptor],
        plan: &[Operation],
    ) -> Result<(Vec<RepoReport>, usize), RunError> {
        info!(
            "Reconciling {} repositories ({} operations each, max {} in flight)",
            repositories.len(),
            plan.len(),
            self.max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut futures = FuturesUnordered::new();

        for (index, repo) in repositories.iter().enumerate() {
            let semaphore = semaphore.clone();

            futures.push(async move {
                let _permit = semaphore.acquire().await;

                if self.cancel.is_cancelled() {
                    debug!("Cancelled before reaching {}", repo.name);
                    return (index, Ok(None));
                }

                let report = self.reconcile_repository(repo, plan).await;
                (index, report.map(Some))
            });
        }

        // One slot per repository, each written exactly once by this loop
        let mut slots: Vec<Option<RepoReport>> = vec![None; repositories.len()];
        let mut skipped = 0;

        while let Some((index, result)) = futures.next().await {
            match result? {
                Some(report) => slots[index] = Some(report),
                None => skipped += 1,
            }
        }

        Ok((slots.into_iter().flatten().collect(), skipped))
    }

    /// Apply every planned operation to one repository, in order
    async fn reconcile_repository(
        &self,
        repo: &RepoDescriptor,
        plan: &[Operation],
    ) -> Result<RepoReport, RunError> {
        info!("Updating {}", repo.name);

        let mut outcomes = Vec::with_capacity(plan.len());
        let mut phase = None;

        for operation in plan {
            if phase != Some(operation.phase()) {
                phase = Some(operation.phase());
                debug!("{}: {} phase", repo.name, operation.phase());
            }

            let status = if self.dry_run {
                OutcomeStatus::Planned
            } else {
                self.execute(&repo.name, operation).await?
            };

            match &status {
                OutcomeStatus::Applied => info!("{}: {}", repo.name, operation),
                OutcomeStatus::Planned => info!("{}: would {}", repo.name, operation),
                OutcomeStatus::Failed { cause } => {
                    warn!("{}: failed to {}: {}", repo.name, operation, cause)
                }
            }

            outcomes.push(OperationOutcome {
                repository: repo.name.clone(),
                operation: operation.clone(),
                status,
            });
        }

        Ok(RepoReport {
            repository: repo.name.clone(),
            outcomes,
        })
    }

    /// Run one operation, converting every non-fatal error into a failed outcome
    async fn execute(&self, repo: &str, operation: &Operation) -> Result<OutcomeStatus, RunError> {
        let call = async {
            match operation {
                Operation::BranchProtection { branch } => {
                    self.client
                        .protect_branch(repo, branch, &self.config.branch_protection)
                        .await
                }
                Operation::TeamAccess { team, permission } => {
                    self.client.set_team_access(repo, team, permission).await
                }
                Operation::RepositorySettings => {
                    self.client
                        .set_repository_settings(repo, &self.config.repo_settings)
                        .await
                }
            }
        };

        match timeout(self.operation_timeout, call).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(err)) if err.is_capability_misuse() => Err(RunError::Capability(err)),
            Ok(Err(err)) => Ok(OutcomeStatus::failed(err.to_string())),
            Err(_) => Ok(OutcomeStatus::failed(format!(
                "timed out after {}s",
                self.operation_timeout.as_secs()
            ))),
        }
    }
}
