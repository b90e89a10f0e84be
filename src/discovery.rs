//! Repository discovery
//!
//! Resolves the ordered, duplicate-free set of repositories a run operates
//! on: either the explicit list from the configuration (used verbatim, no
//! platform call) or a full enumeration of the organization followed by the
//! configured filters.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::{Config, FilterConfig};
use crate::platform::{PlatformClient, PlatformError, RepoDescriptor};

/// Why a repository was dropped by the filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Archived,
    Fork,
    ExcludeList,
    PatternMismatch,
}

/// Compiled discovery filters
#[derive(Debug, Clone)]
pub struct RepoFilter {
    exclude_archived: bool,
    exclude_forks: bool,
    exclude_repos: HashSet<String>,
    include_pattern: Option<Regex>,
}

impl RepoFilter {
    pub fn from_config(filters: &FilterConfig) -> Result<Self> {
        let include_pattern = filters
            .include_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid include_pattern")?;

        Ok(Self {
            exclude_archived: filters.exclude_archived,
            exclude_forks: filters.exclude_forks,
            exclude_repos: filters.exclude_repos.iter().cloned().collect(),
            include_pattern,
        })
    }

    /// The first rule that excludes `repo`, checked in a fixed order:
    /// archived, fork, exclude list, include pattern.
    pub fn exclusion(&self, repo: &RepoDescriptor) -> Option<Exclusion> {
        if self.exclude_archived && repo.archived {
            return Some(Exclusion::Archived);
        }
        if self.exclude_forks && repo.fork {
            return Some(Exclusion::Fork);
        }
        if self.exclude_repos.contains(&repo.name) {
            return Some(Exclusion::ExcludeList);
        }
        if let Some(pattern) = &self.include_pattern {
            if !pattern.is_match(&repo.name) {
                return Some(Exclusion::PatternMismatch);
            }
        }
        None
    }

    /// Keep the repositories no rule excludes, preserving order
    pub fn apply(&self, repositories: Vec<RepoDescriptor>) -> Vec<RepoDescriptor> {
        repositories
            .into_iter()
            .filter(|repo| match self.exclusion(repo) {
                Some(reason) => {
                    debug!("Excluding repository {} ({:?})", repo.name, reason);
                    false
                }
                None => true,
            })
            .collect()
    }
}

/// Where the target set comes from
#[derive(Debug, Clone)]
enum TargetSource {
    Explicit(Vec<String>),
    Enumerated(RepoFilter),
}

/// Resolves the target repository set for a run
#[derive(Debug, Clone)]
pub struct RepositoryDiscovery {
    source: TargetSource,
}

impl RepositoryDiscovery {
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = if config.uses_explicit_repositories() {
            TargetSource::Explicit(config.repositories.clone())
        } else {
            TargetSource::Enumerated(RepoFilter::from_config(&config.filters)?)
        };

        Ok(Self { source })
    }

    /// Produce the target set.
    ///
    /// A failed enumeration page aborts discovery; partial listings are
    /// never returned.
    pub async fn discover(
        &self,
        client: &dyn PlatformClient,
    ) -> Result<Vec<RepoDescriptor>, PlatformError> {
        match &self.source {
            TargetSource::Explicit(names) => {
                let repositories = dedupe(names.iter().map(RepoDescriptor::declared).collect());
                info!(
                    "Using {} explicitly configured repositories",
                    repositories.len()
                );
                Ok(repositories)
            }
            TargetSource::Enumerated(filter) => {
                let all = client.list_repositories().await?;
                let total = all.len();

                let repositories = filter.apply(dedupe(all));
                info!(
                    "Repositories after filtering: {} of {}",
                    repositories.len(),
                    total
                );
                Ok(repositories)
            }
        }
    }
}

/// Drop later repeats of a name, keeping the first occurrence
fn dedupe(repositories: Vec<RepoDescriptor>) -> Vec<RepoDescriptor> {
    let mut seen = HashSet::new();
    repositories
        .into_iter()
        .filter(|repo| {
            let first = seen.insert(repo.name.clone());
            if !first {
                warn!("Ignoring duplicate repository entry: {}", repo.name);
            }
            first
        })
        .collect()
}
